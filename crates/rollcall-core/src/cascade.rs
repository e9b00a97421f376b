//! Haar cascade model and window evaluation.
//!
//! The model layout follows the classic Viola-Jones boosted cascade: a base
//! window, a table of rectangle features, and an ordered list of stages, each
//! a sum of decision stumps compared against a stage threshold.
//!
//! [`HaarCascade::load`] reads OpenCV's `haarcascade_*.xml` files directly
//! (see [`crate::opencv`]). Any other extension is read as JSON:
//!
//! ```json
//! {
//!   "window_width": 24, "window_height": 24,
//!   "features": [ { "rects": [[0, 0, 24, 24, -1.0], [0, 12, 24, 12, 2.0]] } ],
//!   "stages": [ { "threshold": 0.8,
//!                 "classifiers": [ { "feature": 0, "threshold": 0.1, "left": 0.0, "right": 1.0 } ] } ]
//! }
//! ```

use image::GrayImage;
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

/// Maximum number of rectangles per Haar feature.
const MAX_FEATURE_RECTS: usize = 3;
/// Smallest base window that still leaves a normalization area after the
/// one-pixel border is removed.
const MIN_WINDOW_SIZE: u32 = 3;

#[derive(Error, Debug)]
pub enum CascadeError {
    #[error("cascade file not found: {0}")]
    NotFound(String),
    #[error("failed to read cascade {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("cascade parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("cascade XML error: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("invalid cascade: {0}")]
    Invalid(String),
    #[error("invalid detection parameters: {0}")]
    InvalidParams(String),
}

/// A rectangle inside the base window with its feature weight.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(from = "(u32, u32, u32, u32, f32)")]
pub struct WeightedRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub weight: f32,
}

impl From<(u32, u32, u32, u32, f32)> for WeightedRect {
    fn from((x, y, width, height, weight): (u32, u32, u32, u32, f32)) -> Self {
        Self { x, y, width, height, weight }
    }
}

/// Up-right Haar-like feature: weighted sum of up to three rectangle sums.
#[derive(Debug, Clone, Deserialize)]
pub struct HaarFeature {
    pub rects: Vec<WeightedRect>,
}

/// Single-split decision tree over one feature.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Stump {
    pub feature: usize,
    pub threshold: f32,
    pub left: f32,
    pub right: f32,
}

/// Boosted stage: passes when the stump votes sum to at least `threshold`.
#[derive(Debug, Clone, Deserialize)]
pub struct Stage {
    pub threshold: f32,
    pub classifiers: Vec<Stump>,
}

/// Trained frontal-face cascade.
#[derive(Debug, Clone, Deserialize)]
pub struct HaarCascade {
    pub window_width: u32,
    pub window_height: u32,
    pub features: Vec<HaarFeature>,
    pub stages: Vec<Stage>,
}

impl HaarCascade {
    /// Load and validate a cascade file. `.xml` files are read as OpenCV
    /// cascades, anything else as JSON.
    pub fn load(path: &Path) -> Result<Self, CascadeError> {
        if !path.exists() {
            return Err(CascadeError::NotFound(path.display().to_string()));
        }
        let text = std::fs::read_to_string(path).map_err(|source| CascadeError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let is_xml = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("xml"));
        let cascade = if is_xml {
            Self::from_opencv_xml(&text)?
        } else {
            Self::from_json(&text)?
        };

        tracing::info!(
            path = %path.display(),
            window = ?(cascade.window_width, cascade.window_height),
            stages = cascade.stages.len(),
            features = cascade.features.len(),
            "loaded Haar cascade"
        );

        Ok(cascade)
    }

    /// Parse and validate a cascade from JSON text.
    pub fn from_json(text: &str) -> Result<Self, CascadeError> {
        let cascade: HaarCascade = serde_json::from_str(text)?;
        cascade.validate()?;
        Ok(cascade)
    }

    /// Parse and validate a cascade in OpenCV's XML layout.
    pub fn from_opencv_xml(text: &str) -> Result<Self, CascadeError> {
        let cascade = crate::opencv::parse_cascade(text)?;
        cascade.validate()?;
        Ok(cascade)
    }

    fn validate(&self) -> Result<(), CascadeError> {
        if self.window_width < MIN_WINDOW_SIZE || self.window_height < MIN_WINDOW_SIZE {
            return Err(CascadeError::Invalid(format!(
                "base window {}x{} is smaller than {MIN_WINDOW_SIZE}x{MIN_WINDOW_SIZE}",
                self.window_width, self.window_height
            )));
        }
        if self.stages.is_empty() {
            return Err(CascadeError::Invalid("cascade has no stages".into()));
        }

        for (i, feature) in self.features.iter().enumerate() {
            if feature.rects.is_empty() || feature.rects.len() > MAX_FEATURE_RECTS {
                return Err(CascadeError::Invalid(format!(
                    "feature {i} has {} rects (expected 1..={MAX_FEATURE_RECTS})",
                    feature.rects.len()
                )));
            }
            for r in &feature.rects {
                if r.width == 0
                    || r.height == 0
                    || r.x + r.width > self.window_width
                    || r.y + r.height > self.window_height
                {
                    return Err(CascadeError::Invalid(format!(
                        "feature {i} rect {r:?} lies outside the {}x{} window",
                        self.window_width, self.window_height
                    )));
                }
            }
        }

        for (s, stage) in self.stages.iter().enumerate() {
            if stage.classifiers.is_empty() {
                return Err(CascadeError::Invalid(format!("stage {s} has no classifiers")));
            }
            if let Some(stump) = stage
                .classifiers
                .iter()
                .find(|c| c.feature >= self.features.len())
            {
                return Err(CascadeError::Invalid(format!(
                    "stage {s} references feature {} of {}",
                    stump.feature,
                    self.features.len()
                )));
            }
        }

        Ok(())
    }

    /// Window size at `scale`, rounded to whole pixels.
    pub(crate) fn window_at(&self, scale: f64) -> (u32, u32) {
        (
            (self.window_width as f64 * scale).round() as u32,
            (self.window_height as f64 * scale).round() as u32,
        )
    }

    /// Precompute rectangle offsets and weights for windows at `scale`.
    pub(crate) fn scaled(&self, scale: f64) -> ScaledCascade<'_> {
        let (width, height) = self.window_at(scale);

        let features = self
            .features
            .iter()
            .map(|f| {
                let mut rects: Vec<ScaledRect> = f
                    .rects
                    .iter()
                    .map(|r| {
                        let x = ((r.x as f64 * scale).round() as u32).min(width - 1);
                        let y = ((r.y as f64 * scale).round() as u32).min(height - 1);
                        let w = ((r.width as f64 * scale).round() as u32).clamp(1, width - x);
                        let h = ((r.height as f64 * scale).round() as u32).clamp(1, height - y);
                        ScaledRect { x, y, width: w, height: h, weight: r.weight as f64 }
                    })
                    .collect();

                // Rounding changes rect areas; re-balance the first weight so the
                // feature still responds zero to a flat window.
                if rects.len() > 1 {
                    let rest: f64 = rects[1..].iter().map(|r| r.weight * r.area()).sum();
                    rects[0].weight = -rest / rects[0].area();
                }
                rects
            })
            .collect();

        ScaledCascade { cascade: self, features, width, height }
    }
}

#[derive(Debug, Clone, Copy)]
struct ScaledRect {
    x: u32,
    y: u32,
    width: u32,
    height: u32,
    weight: f64,
}

impl ScaledRect {
    fn area(&self) -> f64 {
        self.width as f64 * self.height as f64
    }
}

/// Cascade with feature geometry fixed for one window scale.
pub(crate) struct ScaledCascade<'a> {
    cascade: &'a HaarCascade,
    features: Vec<Vec<ScaledRect>>,
    pub(crate) width: u32,
    pub(crate) height: u32,
}

impl ScaledCascade<'_> {
    /// Run every stage on the window whose top-left corner is `(x, y)`.
    pub(crate) fn accepts(&self, ii: &IntegralImage, x: u32, y: u32) -> bool {
        // Normalization area: the window minus a one-pixel border.
        let nx = x + 1;
        let ny = y + 1;
        let nw = self.width - 2;
        let nh = self.height - 2;
        let area = nw as f64 * nh as f64;

        let sum = ii.sum(nx, ny, nw, nh) as f64;
        let sq_sum = ii.sq_sum(nx, ny, nw, nh) as f64;
        let mean = sum / area;
        let variance = sq_sum / area - mean * mean;
        let std_dev = if variance > 0.0 { variance.sqrt() } else { 1.0 };

        for stage in &self.cascade.stages {
            let mut votes = 0.0f64;
            for stump in &stage.classifiers {
                let value = self.features[stump.feature]
                    .iter()
                    .map(|r| r.weight * ii.sum(x + r.x, y + r.y, r.width, r.height) as f64)
                    .sum::<f64>()
                    / area;
                votes += if value < stump.threshold as f64 * std_dev {
                    stump.left as f64
                } else {
                    stump.right as f64
                };
            }
            if votes < stage.threshold as f64 {
                return false;
            }
        }
        true
    }
}

/// Summed-area tables of pixel values and squared pixel values.
pub(crate) struct IntegralImage {
    stride: usize,
    sum: Vec<u64>,
    sq: Vec<u64>,
}

impl IntegralImage {
    pub(crate) fn new(gray: &GrayImage) -> Self {
        let (width, height) = (gray.width() as usize, gray.height() as usize);
        let stride = width + 1;
        let mut sum = vec![0u64; stride * (height + 1)];
        let mut sq = vec![0u64; stride * (height + 1)];
        let pixels = gray.as_raw();

        for y in 0..height {
            let mut row_sum = 0u64;
            let mut row_sq = 0u64;
            for x in 0..width {
                let p = pixels[y * width + x] as u64;
                row_sum += p;
                row_sq += p * p;
                let idx = (y + 1) * stride + x + 1;
                sum[idx] = sum[idx - stride] + row_sum;
                sq[idx] = sq[idx - stride] + row_sq;
            }
        }

        Self { stride, sum, sq }
    }

    fn rect(table: &[u64], stride: usize, x: u32, y: u32, w: u32, h: u32) -> u64 {
        let (x, y, w, h) = (x as usize, y as usize, w as usize, h as usize);
        let tl = table[y * stride + x];
        let tr = table[y * stride + x + w];
        let bl = table[(y + h) * stride + x];
        let br = table[(y + h) * stride + x + w];
        (br + tl) - (tr + bl)
    }

    pub(crate) fn sum(&self, x: u32, y: u32, w: u32, h: u32) -> u64 {
        Self::rect(&self.sum, self.stride, x, y, w, h)
    }

    pub(crate) fn sq_sum(&self, x: u32, y: u32, w: u32, h: u32) -> u64 {
        Self::rect(&self.sq, self.stride, x, y, w, h)
    }
}
