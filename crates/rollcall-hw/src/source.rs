//! Pull-based frame producers.
//!
//! Every capture path in the system reads frames through [`FrameSource`], so
//! flows can be driven by a live camera, a list of image files, or frames
//! queued in memory.

use crate::frame::{Frame, FrameError};
use image::RgbImage;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("frame source exhausted")]
    Exhausted,
    #[error("failed to load frame {path}: {source}")]
    Load {
        path: String,
        #[source]
        source: image::ImageError,
    },
    #[error("frame conversion: {0}")]
    Frame(#[from] FrameError),
}

impl CaptureError {
    /// True when the source can never yield another frame.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CaptureError::DeviceNotFound(_) | CaptureError::DeviceBusy | CaptureError::Exhausted
        )
    }
}

/// Blocking source of color frames.
///
/// Implementations own their device handle and release it on drop.
pub trait FrameSource {
    /// Block until the next frame is available.
    fn read_frame(&mut self) -> Result<Frame, CaptureError>;
}

impl<S: FrameSource + ?Sized> FrameSource for &mut S {
    fn read_frame(&mut self) -> Result<Frame, CaptureError> {
        (**self).read_frame()
    }
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn read_frame(&mut self) -> Result<Frame, CaptureError> {
        (**self).read_frame()
    }
}

/// Frames held in memory, returned in insertion order.
#[derive(Default)]
pub struct QueuedFrames {
    frames: VecDeque<RgbImage>,
    sequence: u32,
}

impl QueuedFrames {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, image: RgbImage) {
        self.frames.push_back(image);
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

impl FromIterator<RgbImage> for QueuedFrames {
    fn from_iter<I: IntoIterator<Item = RgbImage>>(iter: I) -> Self {
        Self {
            frames: iter.into_iter().collect(),
            sequence: 0,
        }
    }
}

impl FrameSource for QueuedFrames {
    fn read_frame(&mut self) -> Result<Frame, CaptureError> {
        let image = self.frames.pop_front().ok_or(CaptureError::Exhausted)?;
        let frame = Frame::new(image, self.sequence);
        self.sequence = self.sequence.wrapping_add(1);
        Ok(frame)
    }
}

/// Frames decoded lazily from image files, one file per frame.
pub struct ImageFiles {
    paths: VecDeque<PathBuf>,
    sequence: u32,
}

impl ImageFiles {
    pub fn new<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        Self {
            paths: paths.into_iter().map(|p| p.as_ref().to_path_buf()).collect(),
            sequence: 0,
        }
    }
}

impl FrameSource for ImageFiles {
    fn read_frame(&mut self) -> Result<Frame, CaptureError> {
        let path = self.paths.pop_front().ok_or(CaptureError::Exhausted)?;
        let image = image::open(&path)
            .map_err(|source| CaptureError::Load {
                path: path.display().to_string(),
                source,
            })?
            .to_rgb8();

        tracing::debug!(
            path = %path.display(),
            width = image.width(),
            height = image.height(),
            seq = self.sequence,
            "loaded frame from file"
        );

        let frame = Frame::new(image, self.sequence);
        self.sequence = self.sequence.wrapping_add(1);
        Ok(frame)
    }
}
