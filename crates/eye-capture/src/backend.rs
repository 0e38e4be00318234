//! The native frame source boundary.

use std::time::Duration;

use eye_ipc::PointerShape;

use crate::geometry::{MovedRegion, Rect};
use crate::CaptureResult;

/// Per-frame information reported on acquisition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameInfo {
    /// Time of the last desktop image update (0 if only the pointer changed).
    pub last_present_time: i64,

    /// Time of the last pointer update; 0 means no pointer update this frame.
    pub last_mouse_update_time: i64,

    pub accumulated_frames: u32,
    pub rects_coalesced: bool,
    pub protected_content_masked_out: bool,

    /// Pointer position reported with this frame.
    pub pointer_x: i32,
    pub pointer_y: i32,
    pub pointer_visible: bool,

    /// Size in bytes of the moved/dirty region metadata; 0 means none.
    pub total_metadata_buffer_size: u32,

    /// Size in bytes of a new pointer shape; 0 means no new shape.
    pub pointer_shape_buffer_size: u32,
}

/// Pointer shape description returned alongside the shape bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PointerShapeInfo {
    pub shape_type: u32,
    pub width: u32,
    pub height: u32,
    pub pitch: u32,
    pub hot_spot_x: i32,
    pub hot_spot_y: i32,
}

impl From<PointerShapeInfo> for PointerShape {
    fn from(info: PointerShapeInfo) -> Self {
        Self {
            shape_type: Some(info.shape_type),
            width: Some(info.width),
            height: Some(info.height),
            pitch: Some(info.pitch),
            hot_spot_x: Some(info.hot_spot_x),
            hot_spot_y: Some(info.hot_spot_y),
        }
    }
}

/// A native desktop duplication session for one output.
///
/// Between a successful [`acquire_next_frame`](Self::acquire_next_frame) and
/// [`release_frame`](Self::release_frame) the session holds one native frame;
/// the region, pointer and copy calls operate on that frame.
pub trait DuplicationBackend: Send {
    /// Index of the duplicated output on its adapter.
    fn output_index(&self) -> u32;

    /// Output dimensions in pixels.
    fn dimensions(&self) -> (u32, u32);

    /// Wait up to `timeout` for the next frame.
    ///
    /// Fails with `CaptureError::Timeout` when nothing arrived and with
    /// `CaptureError::AccessLost` when the session must be recreated.
    fn acquire_next_frame(&mut self, timeout: Duration) -> CaptureResult<FrameInfo>;

    /// Moved regions of the held frame.
    fn moved_regions(&mut self, metadata_size: u32) -> CaptureResult<Vec<MovedRegion>>;

    /// Dirty regions of the held frame.
    fn dirty_regions(&mut self, metadata_size: u32) -> CaptureResult<Vec<Rect>>;

    /// Copy the new pointer shape into `buffer`, which is already sized to
    /// the reported shape buffer size.
    fn pointer_shape(&mut self, buffer: &mut [u8]) -> CaptureResult<PointerShapeInfo>;

    /// Copy the held frame's pixels into `buffer` and return its row pitch.
    ///
    /// `buffer` is resized to `height * row_pitch`.
    fn copy_frame(&mut self, buffer: &mut Vec<u8>) -> CaptureResult<usize>;

    /// Release the held frame.
    fn release_frame(&mut self) -> CaptureResult<()>;
}

/// Creates duplication sessions; used to recreate a session after access loss.
pub trait BackendFactory: Send + Sync {
    fn create(
        &self,
        adapter_index: u32,
        output_index: u32,
    ) -> CaptureResult<Box<dyn DuplicationBackend>>;
}
