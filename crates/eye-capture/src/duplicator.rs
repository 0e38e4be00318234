//! The desktop duplication capture loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, info, instrument, trace, warn};

use crate::backend::DuplicationBackend;
use crate::error::CaptureError;
use crate::frame::{is_all_zero, FrameBuffer, BYTES_PER_PIXEL};
use crate::pointer::PointerTracker;
use crate::CaptureResult;

/// Default wait for the next native frame.
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_millis(100);

/// Releases the held native frame on every exit path.
struct HeldFrame<'a> {
    backend: &'a mut dyn DuplicationBackend,
}

impl Drop for HeldFrame<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.backend.release_frame() {
            warn!("Failed to release frame: {}", e);
        }
    }
}

/// Turns a duplication backend into a sequence of non-empty frames.
///
/// One duplicator is one capture session. After `AccessLost` or any other
/// error a new duplicator must be built from a fresh backend.
pub struct DesktopDuplicator {
    backend: Box<dyn DuplicationBackend>,
    pointer: PointerTracker,
    staging: Vec<u8>,
    acquire_timeout: Duration,
}

impl DesktopDuplicator {
    /// Create a capture session over `backend`.
    #[instrument(name = "duplicator_new", skip(backend))]
    pub fn new(backend: Box<dyn DuplicationBackend>, acquire_timeout: Duration) -> Self {
        let (width, height) = backend.dimensions();
        info!(
            output = backend.output_index(),
            width, height, "Beginning desktop duplication"
        );

        Self {
            backend,
            pointer: PointerTracker::new(),
            staging: Vec::new(),
            acquire_timeout,
        }
    }

    /// Output dimensions of the session.
    pub fn dimensions(&self) -> (u32, u32) {
        self.backend.dimensions()
    }

    /// Acquire and process one native frame.
    ///
    /// Returns `Ok(None)` when no frame arrived within the acquire timeout or
    /// the frame was entirely black. `AccessLost` and fatal errors end the
    /// session.
    pub fn try_acquire_next(&mut self) -> CaptureResult<Option<FrameBuffer>> {
        let info = match self.backend.acquire_next_frame(self.acquire_timeout) {
            Ok(info) => info,
            Err(CaptureError::Timeout) => return Ok(None),
            Err(e) => return Err(e),
        };

        let output = self.backend.output_index();
        let (width, height) = self.backend.dimensions();
        let held = HeldFrame {
            backend: self.backend.as_mut(),
        };

        let mut frame = FrameBuffer {
            width,
            height,
            accumulated_frames: info.accumulated_frames,
            protected_content_masked_out: info.protected_content_masked_out,
            rects_coalesced: info.rects_coalesced,
            ..Default::default()
        };

        if info.total_metadata_buffer_size > 0 {
            frame.moved_regions = held.backend.moved_regions(info.total_metadata_buffer_size)?;
            frame.updated_regions = held.backend.dirty_regions(info.total_metadata_buffer_size)?;
        }

        let pointer = self
            .pointer
            .update(output, &info, |buffer| held.backend.pointer_shape(buffer))?;
        frame.pointer_position = pointer.position;
        if let Some((shape, bytes)) = pointer.shape {
            frame.pointer_shape = Some(shape);
            frame.pointer_shape_buffer = Some(bytes);
        }

        let row_pitch = held.backend.copy_frame(&mut self.staging)?;
        let data = compact_rows(&self.staging, width, height, row_pitch)?;
        frame.is_empty = is_all_zero(&data);
        frame.data = data.into();

        drop(held);

        if frame.is_empty {
            trace!("Skipping empty frame");
            return Ok(None);
        }

        Ok(Some(frame))
    }

    /// Iterate over non-empty frames until `stop` is set or the session fails.
    ///
    /// The first error is yielded and ends the iteration.
    pub fn frames<'a>(&'a mut self, stop: &'a AtomicBool) -> Frames<'a> {
        Frames {
            duplicator: self,
            stop,
            finished: false,
        }
    }
}

/// Iterator returned by [`DesktopDuplicator::frames`].
pub struct Frames<'a> {
    duplicator: &'a mut DesktopDuplicator,
    stop: &'a AtomicBool,
    finished: bool,
}

impl Iterator for Frames<'_> {
    type Item = CaptureResult<FrameBuffer>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.finished && !self.stop.load(Ordering::SeqCst) {
            match self.duplicator.try_acquire_next() {
                Ok(Some(frame)) => {
                    if self.stop.load(Ordering::SeqCst) {
                        break;
                    }
                    return Some(Ok(frame));
                }
                Ok(None) => continue,
                Err(e) => {
                    debug!("Capture session ended: {}", e);
                    self.finished = true;
                    return Some(Err(e));
                }
            }
        }
        None
    }
}

/// Copy `height` rows of `width * 4` bytes out of a pitched buffer.
fn compact_rows(
    staging: &[u8],
    width: u32,
    height: u32,
    row_pitch: usize,
) -> CaptureResult<Vec<u8>> {
    let row_len = width as usize * BYTES_PER_PIXEL;
    let height = height as usize;

    if row_pitch < row_len || staging.len() < row_pitch * height {
        return Err(CaptureError::duplication(format!(
            "staging buffer of {} bytes with pitch {} cannot hold {} rows of {} bytes",
            staging.len(),
            row_pitch,
            height,
            row_len
        )));
    }

    if row_pitch == row_len {
        return Ok(staging[..row_len * height].to_vec());
    }

    let mut data = Vec::with_capacity(row_len * height);
    for row in staging.chunks(row_pitch).take(height) {
        data.extend_from_slice(&row[..row_len]);
    }
    Ok(data)
}
