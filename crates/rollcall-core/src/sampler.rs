//! Face sampling: frame → grayscale → detected region → canonical template.

use crate::detector::FaceDetector;
use crate::template::{Template, CANONICAL_SIZE};
use crate::types::{FaceRegion, FaceSelection};
use image::{imageops, GrayImage, RgbImage};

/// Turns color frames into canonical face templates.
pub struct FaceSampler<D> {
    detector: D,
    template_size: u32,
    selection: FaceSelection,
}

impl<D: FaceDetector> FaceSampler<D> {
    pub fn new(detector: D) -> Self {
        Self {
            detector,
            template_size: CANONICAL_SIZE,
            selection: FaceSelection::default(),
        }
    }

    /// Override the canonical template side length. Zero is ignored.
    pub fn with_template_size(mut self, size: u32) -> Self {
        if size > 0 {
            self.template_size = size;
        }
        self
    }

    pub fn with_selection(mut self, selection: FaceSelection) -> Self {
        self.selection = selection;
        self
    }

    pub fn template_size(&self) -> u32 {
        self.template_size
    }

    /// Detect faces in `frame` and return the selected region, if any.
    pub fn locate(&self, frame: &RgbImage) -> Option<FaceRegion> {
        self.select(&imageops::grayscale(frame))
    }

    /// Sample a template from `frame`.
    ///
    /// Returns `None` when no face is found; this is a normal outcome and the
    /// caller should ask for another frame.
    pub fn sample(&self, frame: &RgbImage) -> Option<Template> {
        let gray = imageops::grayscale(frame);

        let Some(region) = self.select(&gray) else {
            tracing::debug!(
                width = frame.width(),
                height = frame.height(),
                "no face in frame"
            );
            return None;
        };

        let crop =
            imageops::crop_imm(&gray, region.x, region.y, region.width, region.height).to_image();

        // Region is clamped to non-zero size and the template size is non-zero.
        let template = Template::canonical(crop, self.template_size).ok()?;
        tracing::debug!(?region, "sampled face template");
        Some(template)
    }

    fn select(&self, gray: &GrayImage) -> Option<FaceRegion> {
        let regions = self.detector.detect(gray);
        let chosen = self
            .selection
            .pick(&regions)?
            .clamp_to(gray.width(), gray.height());
        if regions.len() > 1 {
            tracing::debug!(
                found = regions.len(),
                policy = ?self.selection,
                ?chosen,
                "multiple faces in frame"
            );
        }
        chosen
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cascade::tests::EDGE_CASCADE;
    use crate::cascade::HaarCascade;
    use crate::detector::{DetectParams, HaarDetector};
    use image::Rgb;

    /// Reports a fixed list of regions regardless of the frame.
    struct FixedDetector(Vec<FaceRegion>);

    impl FaceDetector for FixedDetector {
        fn detect(&self, _gray: &GrayImage) -> Vec<FaceRegion> {
            self.0.clone()
        }
    }

    fn region(x: u32, y: u32, w: u32, h: u32) -> FaceRegion {
        FaceRegion { x, y, width: w, height: h, neighbors: 6 }
    }

    fn quadrant_frame() -> RgbImage {
        // Left half black, right half white.
        RgbImage::from_fn(200, 100, |x, _| if x < 100 { Rgb([0, 0, 0]) } else { Rgb([255, 255, 255]) })
    }

    #[test]
    fn test_no_face_returns_none() {
        let sampler = FaceSampler::new(FixedDetector(vec![]));
        assert!(sampler.sample(&quadrant_frame()).is_none());
    }

    #[test]
    fn test_template_is_canonical_size() {
        let sampler = FaceSampler::new(FixedDetector(vec![region(10, 10, 57, 43)]));
        let t = sampler.sample(&quadrant_frame()).unwrap();
        assert_eq!((t.width(), t.height()), (CANONICAL_SIZE, CANONICAL_SIZE));
    }

    #[test]
    fn test_first_region_wins() {
        let sampler = FaceSampler::new(FixedDetector(vec![
            region(0, 0, 50, 50),
            region(120, 0, 80, 80),
        ]));
        let t = sampler.sample(&quadrant_frame()).unwrap();
        assert!(t.pixels().iter().all(|&p| p == 0), "expected the black crop");
    }

    #[test]
    fn test_largest_region_policy() {
        let sampler = FaceSampler::new(FixedDetector(vec![
            region(0, 0, 50, 50),
            region(120, 0, 80, 80),
        ]))
        .with_selection(FaceSelection::Largest);
        let t = sampler.sample(&quadrant_frame()).unwrap();
        assert!(t.pixels().iter().all(|&p| p == 255), "expected the white crop");
    }

    #[test]
    fn test_region_clamped_to_frame() {
        let sampler = FaceSampler::new(FixedDetector(vec![region(150, 50, 100, 100)]));
        let t = sampler.sample(&quadrant_frame()).unwrap();
        assert_eq!(t.width(), CANONICAL_SIZE);
        assert_eq!(
            sampler.locate(&quadrant_frame()),
            Some(region(150, 50, 50, 50))
        );
    }

    #[test]
    fn test_region_outside_frame_is_not_found() {
        let sampler = FaceSampler::new(FixedDetector(vec![region(500, 500, 10, 10)]));
        assert!(sampler.sample(&quadrant_frame()).is_none());
    }

    #[test]
    fn test_custom_template_size() {
        let sampler =
            FaceSampler::new(FixedDetector(vec![region(0, 0, 40, 40)])).with_template_size(64);
        let t = sampler.sample(&quadrant_frame()).unwrap();
        assert_eq!((t.width(), t.height()), (64, 64));
    }

    #[test]
    fn test_haar_sampler_on_blank_frame() {
        let cascade = HaarCascade::from_json(EDGE_CASCADE).unwrap();
        let detector = HaarDetector::new(cascade, DetectParams::default()).unwrap();
        let sampler = FaceSampler::new(detector);
        let blank = RgbImage::from_pixel(120, 90, Rgb([90, 120, 60]));
        assert!(sampler.sample(&blank).is_none());
    }

    #[test]
    fn test_haar_sampler_finds_edge_pattern() {
        let cascade = HaarCascade::from_json(EDGE_CASCADE).unwrap();
        let detector = HaarDetector::new(cascade, DetectParams::default()).unwrap();
        let sampler = FaceSampler::new(detector);
        let frame = RgbImage::from_fn(60, 60, |_, y| {
            if y < 30 { Rgb([20, 20, 20]) } else { Rgb([220, 220, 220]) }
        });
        let t = sampler.sample(&frame).unwrap();
        assert_eq!(t.width(), CANONICAL_SIZE);
        // The crop spans the edge, so both intensities survive.
        assert!(t.pixels().iter().any(|&p| p < 60));
        assert!(t.pixels().iter().any(|&p| p > 180));
    }
}
