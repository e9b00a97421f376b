//! Multi-scale Haar cascade face detector.
//!
//! Slides the cascade window over the frame at geometrically growing scales,
//! then merges overlapping hits with OpenCV-compatible rectangle grouping.

use crate::cascade::{CascadeError, HaarCascade, IntegralImage};
use crate::types::FaceRegion;
use image::GrayImage;
use std::path::Path;

// --- Named constants ---
const DEFAULT_SCALE_FACTOR: f32 = 1.3;
const DEFAULT_MIN_NEIGHBORS: u32 = 5;
const GROUP_EPS: f64 = 0.2;
const MIN_STEP: u32 = 2;

/// Locates face regions in a grayscale frame.
pub trait FaceDetector {
    /// Return candidate face regions in detector order.
    fn detect(&self, gray: &GrayImage) -> Vec<FaceRegion>;
}

/// Tuning for the multi-scale scan.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectParams {
    /// Window growth per scale step; must exceed 1.
    pub scale_factor: f32,
    /// A merged region needs more than this many raw hits. 0 disables merging.
    pub min_neighbors: u32,
    /// Smallest window side in pixels; 0 means the cascade's base window.
    pub min_size: u32,
}

impl Default for DetectParams {
    fn default() -> Self {
        Self {
            scale_factor: DEFAULT_SCALE_FACTOR,
            min_neighbors: DEFAULT_MIN_NEIGHBORS,
            min_size: 0,
        }
    }
}

/// Viola-Jones detector backed by a [`HaarCascade`].
pub struct HaarDetector {
    cascade: HaarCascade,
    params: DetectParams,
}

impl HaarDetector {
    pub fn new(cascade: HaarCascade, params: DetectParams) -> Result<Self, CascadeError> {
        if !(params.scale_factor > 1.0 && params.scale_factor.is_finite()) {
            return Err(CascadeError::InvalidParams(format!(
                "scale factor must be a finite value above 1, got {}",
                params.scale_factor
            )));
        }
        Ok(Self { cascade, params })
    }

    /// Load a cascade file and build a detector from it.
    pub fn load(cascade_path: &Path, params: DetectParams) -> Result<Self, CascadeError> {
        Self::new(HaarCascade::load(cascade_path)?, params)
    }

    pub fn params(&self) -> &DetectParams {
        &self.params
    }

    /// Every window position the cascade accepts, smallest scale first,
    /// row-major within a scale.
    fn raw_hits(&self, gray: &GrayImage) -> Vec<FaceRegion> {
        let (width, height) = gray.dimensions();
        let base = self.cascade.window_width.min(self.cascade.window_height);
        let mut scale = (self.params.min_size as f64 / base as f64).max(1.0);
        let factor = self.params.scale_factor as f64;

        let ii = IntegralImage::new(gray);
        let mut hits = Vec::new();

        loop {
            let (win_w, win_h) = self.cascade.window_at(scale);
            if win_w > width || win_h > height {
                break;
            }

            let scaled = self.cascade.scaled(scale);
            let step = (scale.round() as u32).max(MIN_STEP) as usize;
            let before = hits.len();

            for y in (0..=height - win_h).step_by(step) {
                for x in (0..=width - win_w).step_by(step) {
                    if scaled.accepts(&ii, x, y) {
                        hits.push(FaceRegion {
                            x,
                            y,
                            width: scaled.width,
                            height: scaled.height,
                            neighbors: 1,
                        });
                    }
                }
            }

            tracing::trace!(scale, window = win_w, hits = hits.len() - before, "scanned scale");
            scale *= factor;
        }

        hits
    }
}

impl FaceDetector for HaarDetector {
    fn detect(&self, gray: &GrayImage) -> Vec<FaceRegion> {
        let hits = self.raw_hits(gray);
        let raw = hits.len();
        let regions = group_rectangles(hits, self.params.min_neighbors, GROUP_EPS);
        tracing::debug!(raw, regions = regions.len(), "haar detection");
        regions
    }
}

/// Two rectangles belong together when every edge is within `eps` of the
/// smaller side lengths.
fn similar(a: &FaceRegion, b: &FaceRegion, eps: f64) -> bool {
    let delta = eps * (a.width.min(b.width) as f64 + a.height.min(b.height) as f64) * 0.5;
    let close = |p: u32, q: u32| (p as f64 - q as f64).abs() <= delta;
    close(a.x, b.x)
        && close(a.y, b.y)
        && close(a.x + a.width, b.x + b.width)
        && close(a.y + a.height, b.y + b.height)
}

/// Equivalence-class labels for `rects`, numbered in order of first member.
fn partition(rects: &[FaceRegion], eps: f64) -> (Vec<usize>, usize) {
    let mut parent: Vec<usize> = (0..rects.len()).collect();

    fn find(parent: &mut [usize], mut i: usize) -> usize {
        while parent[i] != i {
            parent[i] = parent[parent[i]];
            i = parent[i];
        }
        i
    }

    for i in 0..rects.len() {
        for j in (i + 1)..rects.len() {
            if similar(&rects[i], &rects[j], eps) {
                let ri = find(&mut parent, i);
                let rj = find(&mut parent, j);
                if ri != rj {
                    parent[rj.max(ri)] = ri.min(rj);
                }
            }
        }
    }

    let mut root_label = vec![usize::MAX; rects.len()];
    let mut labels = Vec::with_capacity(rects.len());
    let mut count = 0;
    for i in 0..rects.len() {
        let root = find(&mut parent, i);
        if root_label[root] == usize::MAX {
            root_label[root] = count;
            count += 1;
        }
        labels.push(root_label[root]);
    }
    (labels, count)
}

/// Merge overlapping detections the way OpenCV's `groupRectangles` does.
///
/// Clusters with `min_neighbors` or fewer members are discarded, as are
/// clusters sitting inside a stronger neighbour. With `min_neighbors == 0`
/// the input is returned untouched.
pub fn group_rectangles(rects: Vec<FaceRegion>, min_neighbors: u32, eps: f64) -> Vec<FaceRegion> {
    if min_neighbors == 0 || rects.is_empty() {
        return rects;
    }

    let (labels, classes) = partition(&rects, eps);

    let mut sums = vec![[0u64; 4]; classes];
    let mut counts = vec![0u32; classes];
    for (r, &label) in rects.iter().zip(&labels) {
        let s = &mut sums[label];
        s[0] += r.x as u64;
        s[1] += r.y as u64;
        s[2] += r.width as u64;
        s[3] += r.height as u64;
        counts[label] += 1;
    }

    let averaged: Vec<FaceRegion> = sums
        .iter()
        .zip(&counts)
        .map(|(s, &n)| {
            let avg = |v: u64| (v as f64 / n as f64).round() as u32;
            FaceRegion {
                x: avg(s[0]),
                y: avg(s[1]),
                width: avg(s[2]),
                height: avg(s[3]),
                neighbors: n,
            }
        })
        .collect();

    let mut kept = Vec::new();
    for (i, r1) in averaged.iter().enumerate() {
        let n1 = r1.neighbors;
        if n1 <= min_neighbors {
            continue;
        }

        let swallowed = averaged.iter().enumerate().any(|(j, r2)| {
            let n2 = r2.neighbors;
            if j == i || n2 <= min_neighbors {
                return false;
            }
            let dx = (r2.width as f64 * eps).round() as i64;
            let dy = (r2.height as f64 * eps).round() as i64;
            let (x1, y1, w1, h1) = (r1.x as i64, r1.y as i64, r1.width as i64, r1.height as i64);
            let (x2, y2, w2, h2) = (r2.x as i64, r2.y as i64, r2.width as i64, r2.height as i64);
            x1 >= x2 - dx
                && y1 >= y2 - dy
                && x1 + w1 <= x2 + w2 + dx
                && y1 + h1 <= y2 + h2 + dy
                && (n2 > n1.max(3) || n1 < 3)
        });

        if !swallowed {
            kept.push(*r1);
        }
    }

    kept
}
