//! Normalized grayscale face templates and their on-disk encoding.
//!
//! A template is a square single-channel image at the canonical size. It is
//! persisted as PNG so a stored template decodes to exactly the pixels that
//! were sampled.

use image::imageops::{self, FilterType};
use image::{GrayImage, ImageFormat};
use std::io::Cursor;
use thiserror::Error;

/// Default width and height of every template.
pub const CANONICAL_SIZE: u32 = 100;

#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("template image is empty ({width}x{height})")]
    Empty { width: u32, height: u32 },
    #[error("canonical size must be non-zero")]
    ZeroSize,
    #[error("image codec: {0}")]
    Image(#[from] image::ImageError),
}

/// Fixed-size grayscale face sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    image: GrayImage,
}

impl Template {
    /// Normalize a grayscale crop to `size` × `size`.
    ///
    /// Crops already at the target size are taken as-is; anything else is
    /// resized with bilinear filtering.
    pub fn canonical(image: GrayImage, size: u32) -> Result<Self, TemplateError> {
        if size == 0 {
            return Err(TemplateError::ZeroSize);
        }
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(TemplateError::Empty { width, height });
        }
        if width == size && height == size {
            return Ok(Self { image });
        }
        Ok(Self {
            image: imageops::resize(&image, size, size, FilterType::Triangle),
        })
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Row-major pixel intensities.
    pub fn pixels(&self) -> &[u8] {
        self.image.as_raw()
    }

    pub fn as_image(&self) -> &GrayImage {
        &self.image
    }

    /// Encode as single-channel PNG bytes for storage.
    pub fn encode(&self) -> Result<Vec<u8>, TemplateError> {
        let mut buf = Vec::new();
        self.image
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;
        Ok(buf)
    }

    /// Decode stored bytes and normalize them to `size` × `size`.
    ///
    /// Any format the image codec understands is accepted; color data is
    /// converted to luma first.
    pub fn decode(bytes: &[u8], size: u32) -> Result<Self, TemplateError> {
        let image = image::load_from_memory(bytes)?.to_luma8();
        Self::canonical(image, size)
    }
}
