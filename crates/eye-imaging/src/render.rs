//! BGRA to PNG/JPEG rendering.

use std::io::Cursor;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use eye_capture::FrameBuffer;
use eye_ipc::SnapshotFormat;
use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageFormat, RgbaImage};
use sha2::{Digest, Sha256};
use tracing::trace;

use crate::error::ImagingError;
use crate::ImagingResult;

/// An encoded image and its pixel size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedImage {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Target size for `scale`, rounded up and at least one pixel.
///
/// Images are never enlarged: scales above 1 (and NaN) render at full size.
pub fn scaled_dimensions(width: u32, height: u32, scale: f64) -> (u32, u32) {
    let scale = scale.min(1.0);
    let scale_side = |side: u32| ((side as f64 * scale).ceil() as u32).max(1);
    (scale_side(width), scale_side(height))
}

/// PNG thumbnail of `frame` scaled by `scale`.
///
/// Returns `None` for frames without data.
pub fn thumbnail(frame: &FrameBuffer, scale: f64) -> ImagingResult<Option<RenderedImage>> {
    snapshot(frame, scale, SnapshotFormat::Png)
}

/// Snapshot of `frame` scaled by `scale` in the requested format.
///
/// Returns `None` for frames without data.
pub fn snapshot(
    frame: &FrameBuffer,
    scale: f64,
    format: SnapshotFormat,
) -> ImagingResult<Option<RenderedImage>> {
    if !frame.has_data() {
        return Ok(None);
    }

    let image = bgra_to_rgba(frame.width, frame.height, &frame.data)?;
    let (width, height) = scaled_dimensions(frame.width, frame.height, scale);
    let image = if (width, height) == image.dimensions() {
        image
    } else {
        imageops::resize(&image, width, height, FilterType::Triangle)
    };

    let bytes = match format {
        SnapshotFormat::Png => encode(DynamicImage::ImageRgba8(image), ImageFormat::Png)?,
        SnapshotFormat::Jpeg => {
            let rgb = DynamicImage::ImageRgba8(image).to_rgb8();
            encode(DynamicImage::ImageRgb8(rgb), ImageFormat::Jpeg)?
        }
    };

    trace!(width, height, len = bytes.len(), ?format, "Rendered frame image");
    Ok(Some(RenderedImage {
        bytes,
        width,
        height,
    }))
}

/// PNG of the frame's pointer shape.
///
/// Returns `None` unless the frame carries a shape whose buffer is exactly
/// `width * height * 4` bytes.
pub fn pointer_image(frame: &FrameBuffer) -> ImagingResult<Option<RenderedImage>> {
    let (Some(shape), Some(buffer)) = (&frame.pointer_shape, &frame.pointer_shape_buffer) else {
        return Ok(None);
    };
    let (Some(width), Some(height)) = (shape.width, shape.height) else {
        return Ok(None);
    };
    if width == 0 || height == 0 || shape.expected_buffer_len() != Some(buffer.len()) {
        return Ok(None);
    }

    let image = bgra_to_rgba(width, height, buffer)?;
    let bytes = encode(DynamicImage::ImageRgba8(image), ImageFormat::Png)?;
    Ok(Some(RenderedImage {
        bytes,
        width,
        height,
    }))
}

/// Base64 of the SHA-256 digest of `bytes`.
pub fn content_hash(bytes: &[u8]) -> String {
    STANDARD.encode(Sha256::digest(bytes))
}

fn bgra_to_rgba(width: u32, height: u32, bgra: &[u8]) -> ImagingResult<RgbaImage> {
    let mut rgba = bgra.to_vec();
    for pixel in rgba.chunks_exact_mut(4) {
        pixel.swap(0, 2);
    }

    let len = rgba.len();
    RgbaImage::from_raw(width, height, rgba).ok_or(ImagingError::InvalidDimensions {
        width,
        height,
        len,
    })
}

fn encode(image: DynamicImage, format: ImageFormat) -> ImagingResult<Vec<u8>> {
    let mut bytes = Vec::new();
    image.write_to(&mut Cursor::new(&mut bytes), format)?;
    Ok(bytes)
}
