//! Image rendering for published frame artifacts.
//!
//! Frames arrive as BGRA buffers; this crate scales and encodes them as the
//! PNG/JPEG images stored in the cache, and derives content keys for pointer
//! shapes.

mod error;
mod render;

pub use error::ImagingError;
pub use render::{
    content_hash, pointer_image, scaled_dimensions, snapshot, thumbnail, RenderedImage,
};

/// Result type for imaging operations.
pub type ImagingResult<T> = Result<T, ImagingError>;
