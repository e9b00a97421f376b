//! rollcall-core — Face sampling and template matching.
//!
//! Detects a face with a Haar cascade, normalizes it to a fixed-size
//! grayscale template, and compares templates by mean pixel difference.

pub mod cascade;
pub mod detector;
pub mod matcher;
pub mod opencv;
pub mod sampler;
pub mod template;
pub mod types;

pub use cascade::{CascadeError, HaarCascade};
pub use detector::{DetectParams, FaceDetector, HaarDetector};
pub use matcher::{Matcher, PixelDiffMatcher, DEFAULT_MATCH_THRESHOLD};
pub use sampler::FaceSampler;
pub use template::{Template, TemplateError, CANONICAL_SIZE};
pub use types::{FaceRegion, FaceSelection, MatchResult};
