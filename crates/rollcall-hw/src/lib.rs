//! rollcall-hw — Frame capture for attendance sessions.
//!
//! Defines the pull-based [`FrameSource`] abstraction with in-memory and
//! image-file producers, plus a V4L2 camera behind the `v4l2` feature.

#[cfg(feature = "v4l2")]
pub mod camera;
pub mod frame;
pub mod source;

#[cfg(feature = "v4l2")]
pub use camera::{Camera, PixelFormat};
pub use frame::{Frame, FrameError};
pub use source::{CaptureError, FrameSource, ImageFiles, QueuedFrames};
