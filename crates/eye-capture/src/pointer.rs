//! Pointer authority tracking across duplicated outputs.

use bytes::Bytes;
use eye_ipc::{PointerPosition, PointerShape};
use tracing::trace;

use crate::backend::{FrameInfo, PointerShapeInfo};
use crate::frame::is_all_zero;
use crate::CaptureResult;

/// Pointer state resolved for one frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointerUpdate {
    /// Last accepted position, echoed when the frame carried no pointer update.
    pub position: PointerPosition,

    /// New non-blank shape and its bitmap.
    pub shape: Option<(PointerShape, Bytes)>,
}

/// Arbitrates pointer updates reported by one or more outputs.
///
/// Every output reports the pointer, but only one of them actually shows it.
/// The tracker remembers which output last set the position and rejects
/// updates that would let another output hide the pointer or roll it back
/// to an older timestamp.
#[derive(Debug, Default)]
pub struct PointerTracker {
    who_updated_last: Option<u32>,
    last_timestamp: i64,
    position: PointerPosition,
    shape_buffer: Vec<u8>,
}

impl PointerTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last accepted pointer position.
    pub fn position(&self) -> PointerPosition {
        self.position
    }

    /// Output that last set the position.
    pub fn authority(&self) -> Option<u32> {
        self.who_updated_last
    }

    /// Apply the pointer part of a frame reported by `output`.
    ///
    /// `fetch_shape` fills the shape buffer when the frame carries a new shape.
    pub fn update<F>(
        &mut self,
        output: u32,
        info: &FrameInfo,
        fetch_shape: F,
    ) -> CaptureResult<PointerUpdate>
    where
        F: FnOnce(&mut [u8]) -> CaptureResult<PointerShapeInfo>,
    {
        if info.last_mouse_update_time == 0 {
            return Ok(PointerUpdate {
                position: self.position,
                shape: None,
            });
        }

        if self.accepts(output, info) {
            self.position =
                PointerPosition::new(info.pointer_x, info.pointer_y, info.pointer_visible);
            self.who_updated_last = Some(output);
            self.last_timestamp = info.last_mouse_update_time;
        } else {
            trace!(output, "Rejected pointer update from non-authoritative output");
        }

        let mut update = PointerUpdate {
            position: self.position,
            shape: None,
        };

        if info.pointer_shape_buffer_size == 0 {
            return Ok(update);
        }

        self.shape_buffer
            .resize(info.pointer_shape_buffer_size as usize, 0);
        let shape_info = fetch_shape(&mut self.shape_buffer)?;

        if !is_all_zero(&self.shape_buffer) {
            update.shape = Some((
                PointerShape::from(shape_info),
                Bytes::copy_from_slice(&self.shape_buffer),
            ));
        }

        Ok(update)
    }

    fn accepts(&self, output: u32, info: &FrameInfo) -> bool {
        let claimed_elsewhere = self.who_updated_last != Some(output);

        // Another output cannot hide a pointer it does not own.
        if !info.pointer_visible && claimed_elsewhere {
            return false;
        }

        // Two outputs both showing the pointer: the newer report wins.
        if info.pointer_visible
            && self.position.is_visible()
            && claimed_elsewhere
            && self.last_timestamp > info.last_mouse_update_time
        {
            return false;
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(x: i32, y: i32, visible: bool, timestamp: i64) -> FrameInfo {
        FrameInfo {
            last_mouse_update_time: timestamp,
            pointer_x: x,
            pointer_y: y,
            pointer_visible: visible,
            ..Default::default()
        }
    }

    fn no_shape(_: &mut [u8]) -> CaptureResult<PointerShapeInfo> {
        panic!("shape should not be fetched")
    }

    #[test]
    fn test_no_update_echoes_last_state() {
        let mut tracker = PointerTracker::new();
        let update = tracker.update(0, &FrameInfo::default(), no_shape).unwrap();
        assert_eq!(update.position, PointerPosition::default());

        tracker.update(0, &report(4, 5, true, 10), no_shape).unwrap();
        let update = tracker.update(0, &FrameInfo::default(), no_shape).unwrap();
        assert_eq!(update.position, PointerPosition::new(4, 5, true));
    }

    #[test]
    fn test_other_output_cannot_hide_pointer() {
        let mut tracker = PointerTracker::new();
        tracker.update(0, &report(5, 5, true, 10), no_shape).unwrap();

        let update = tracker.update(1, &report(0, 0, false, 12), no_shape).unwrap();
        assert_eq!(update.position, PointerPosition::new(5, 5, true));
        assert_eq!(tracker.authority(), Some(0));
    }

    #[test]
    fn test_newer_visible_report_takes_authority() {
        let mut tracker = PointerTracker::new();
        tracker.update(0, &report(5, 5, true, 10), no_shape).unwrap();

        let update = tracker.update(1, &report(7, 8, true, 11), no_shape).unwrap();
        assert_eq!(update.position, PointerPosition::new(7, 8, true));
        assert_eq!(tracker.authority(), Some(1));

        // Older report from the previous owner is ignored.
        let update = tracker.update(0, &report(1, 1, true, 9), no_shape).unwrap();
        assert_eq!(update.position, PointerPosition::new(7, 8, true));

        // The owner may hide the pointer.
        let update = tracker.update(1, &report(7, 8, false, 13), no_shape).unwrap();
        assert_eq!(update.position, PointerPosition::new(7, 8, false));
    }

    #[test]
    fn test_shape_forwarded_only_when_not_blank() {
        let mut tracker = PointerTracker::new();
        let mut info = report(1, 1, true, 10);
        info.pointer_shape_buffer_size = 2 * 2 * 4;

        let shape_info = PointerShapeInfo {
            shape_type: 2,
            width: 2,
            height: 2,
            pitch: 8,
            ..Default::default()
        };

        let update = tracker
            .update(0, &info, |buffer| {
                buffer.fill(0);
                Ok(shape_info)
            })
            .unwrap();
        assert!(update.shape.is_none());

        let update = tracker
            .update(0, &info, |buffer| {
                buffer[3] = 0xFF;
                Ok(shape_info)
            })
            .unwrap();
        let (shape, bytes) = update.shape.unwrap();
        assert_eq!(shape.width, Some(2));
        assert_eq!(shape.pitch, Some(8));
        assert_eq!(bytes.len(), 16);
        assert_eq!(bytes[3], 0xFF);
    }
}
