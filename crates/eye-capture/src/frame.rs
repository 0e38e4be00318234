//! Captured frame buffers.

use std::path::Path;

use bytes::Bytes;
use eye_ipc::{PointerPosition, PointerShape};
use tracing::debug;

use crate::error::CaptureError;
use crate::geometry::{MovedRegion, Rect};
use crate::CaptureResult;

/// Bytes per BGRA pixel.
pub(crate) const BYTES_PER_PIXEL: usize = 4;

/// One captured output image with its change and pointer metadata.
///
/// `data` holds `height * width * 4` bytes in `[B, G, R, A]` order with no
/// row padding.
#[derive(Debug, Clone, Default)]
pub struct FrameBuffer {
    /// Frame width in pixels.
    pub width: u32,

    /// Frame height in pixels.
    pub height: u32,

    /// BGRA pixel data.
    pub data: Bytes,

    /// True iff every byte of `data` is zero.
    pub is_empty: bool,

    /// Regions the OS moved within the image since the last frame.
    pub moved_regions: Vec<MovedRegion>,

    /// Non-overlapping regions the OS updated since the last frame.
    pub updated_regions: Vec<Rect>,

    /// Arbitrated pointer position.
    pub pointer_position: PointerPosition,

    /// Pointer shape, present only on frames that carry a new non-blank shape.
    pub pointer_shape: Option<PointerShape>,

    /// 32bpp pointer bitmap matching `pointer_shape`.
    pub pointer_shape_buffer: Option<Bytes>,

    /// Frames the OS accumulated into this image since the last one.
    pub accumulated_frames: u32,

    /// Protected content was blacked out in this image.
    pub protected_content_masked_out: bool,

    /// Updated regions were coalesced and may contain unmodified pixels.
    pub rects_coalesced: bool,
}

impl FrameBuffer {
    /// Buffer length required for the given dimensions.
    pub fn expected_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * BYTES_PER_PIXEL
    }

    /// Create a frame from tightly packed BGRA pixels.
    pub fn from_bgra(width: u32, height: u32, data: impl Into<Bytes>) -> CaptureResult<Self> {
        let data = data.into();
        let expected = Self::expected_len(width, height);
        if data.len() != expected {
            return Err(CaptureError::InvalidArgument(format!(
                "buffer of {} bytes does not match {}x{} BGRA ({} bytes)",
                data.len(),
                width,
                height,
                expected
            )));
        }

        let is_empty = is_all_zero(&data);
        Ok(Self {
            width,
            height,
            data,
            is_empty,
            ..Default::default()
        })
    }

    /// Load a still image from disk as a frame.
    ///
    /// Any format the `image` crate can decode is accepted; pixels are
    /// converted to BGRA.
    pub fn load_from_file(path: impl AsRef<Path>) -> CaptureResult<Self> {
        let path = path.as_ref();
        if path.as_os_str().to_string_lossy().trim().is_empty() {
            return Err(CaptureError::InvalidArgument(
                "path must not be blank".to_string(),
            ));
        }

        let rgba = image::open(path)?.to_rgba8();
        let (width, height) = rgba.dimensions();

        let mut data = rgba.into_raw();
        for pixel in data.chunks_exact_mut(BYTES_PER_PIXEL) {
            pixel.swap(0, 2);
        }

        debug!(path = %path.display(), width, height, "Loaded frame from file");
        Self::from_bgra(width, height, data)
    }

    /// Whether the frame carries pixels worth decoding.
    pub fn has_data(&self) -> bool {
        !self.is_empty && !self.data.is_empty()
    }

    /// BGRA value of the pixel at `(x, y)`, if inside the frame.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y as usize * self.width as usize + x as usize) * BYTES_PER_PIXEL;
        let bytes = self.data.get(offset..offset + BYTES_PER_PIXEL)?;
        Some([bytes[0], bytes[1], bytes[2], bytes[3]])
    }
}

pub(crate) fn is_all_zero(data: &[u8]) -> bool {
    data.iter().all(|b| *b == 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_bgra_validates_length() {
        assert!(FrameBuffer::from_bgra(2, 2, vec![0u8; 15]).is_err());
        let frame = FrameBuffer::from_bgra(2, 2, vec![0u8; 16]).unwrap();
        assert!(frame.is_empty);
        assert!(!frame.has_data());
    }

    #[test]
    fn test_pixel_access() {
        let mut data = vec![0u8; 3 * 2 * 4];
        // Row 1, column 2.
        let offset = (3 + 2) * 4;
        data[offset..offset + 4].copy_from_slice(&[1, 2, 3, 4]);
        let frame = FrameBuffer::from_bgra(3, 2, data).unwrap();

        assert!(frame.has_data());
        assert_eq!(frame.pixel(2, 1), Some([1, 2, 3, 4]));
        assert_eq!(frame.pixel(3, 1), None);
    }

    #[test]
    fn test_blank_path_is_rejected() {
        assert!(matches!(
            FrameBuffer::load_from_file("  "),
            Err(CaptureError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_load_from_file_converts_to_bgra() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.png");

        let mut image = image::RgbaImage::new(4, 3);
        image.put_pixel(1, 2, image::Rgba([10, 20, 30, 255]));
        image.save(&path).unwrap();

        let frame = FrameBuffer::load_from_file(&path).unwrap();
        assert_eq!((frame.width, frame.height), (4, 3));
        assert_eq!(frame.data.len(), 4 * 3 * 4);
        assert_eq!(frame.pixel(1, 2), Some([30, 20, 10, 255]));
        assert!(!frame.is_empty);
    }

    #[test]
    fn test_load_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = FrameBuffer::load_from_file(dir.path().join("missing.png"));
        assert!(matches!(result, Err(CaptureError::Image(_))));
    }
}
