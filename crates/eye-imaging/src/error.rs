//! Error types for image rendering.

use thiserror::Error;

/// Errors that can occur while rendering images.
#[derive(Debug, Error)]
pub enum ImagingError {
    /// Buffer does not match the stated dimensions.
    #[error("Invalid image dimensions {width}x{height} for {len} bytes")]
    InvalidDimensions { width: u32, height: u32, len: usize },

    /// Encoding failed.
    #[error("Image encode error: {0}")]
    Encode(#[from] image::ImageError),
}
