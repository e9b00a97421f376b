//! Template comparison by mean absolute pixel difference.

use crate::template::Template;
use crate::types::MatchResult;

/// Default decision threshold on the 0–255 intensity scale.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 50.0;

/// Strategy for deciding whether a candidate template shows the reference face.
pub trait Matcher {
    fn compare(&self, candidate: &Template, reference: &Template) -> MatchResult;
}

/// Fixed-threshold matcher over raw grayscale intensities.
///
/// No illumination normalization is applied: very dark or very bright
/// captures and partial occlusion shift the score directly.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelDiffMatcher {
    threshold: f32,
}

impl PixelDiffMatcher {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }
}

impl Default for PixelDiffMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_MATCH_THRESHOLD)
    }
}

/// Mean of |a - b| over all pixel pairs. Empty inputs score 0.
pub fn mean_abs_diff(a: &[u8], b: &[u8]) -> f32 {
    let n = a.len().min(b.len());
    if n == 0 {
        return 0.0;
    }
    let total: u64 = a
        .iter()
        .zip(b)
        .map(|(&p, &q)| p.abs_diff(q) as u64)
        .sum();
    (total as f64 / n as f64) as f32
}

impl Matcher for PixelDiffMatcher {
    fn compare(&self, candidate: &Template, reference: &Template) -> MatchResult {
        let score = if candidate.width() == reference.width()
            && candidate.height() == reference.height()
        {
            mean_abs_diff(candidate.pixels(), reference.pixels())
        } else {
            tracing::warn!(
                candidate = ?(candidate.width(), candidate.height()),
                reference = ?(reference.width(), reference.height()),
                "template size mismatch; resizing reference"
            );
            match Template::canonical(reference.as_image().clone(), candidate.width()) {
                Ok(resized) => mean_abs_diff(candidate.pixels(), resized.pixels()),
                Err(_) => f32::MAX,
            }
        };

        MatchResult {
            matched: score < self.threshold,
            score,
        }
    }
}
