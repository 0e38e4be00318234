//! A duplication backend that replays prepared frames.
//!
//! Replays still images (see [`FrameBuffer::load_from_file`]) as if they came
//! from a live output, so the capture loop and everything downstream can run
//! without a display.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::debug;

use crate::backend::{BackendFactory, DuplicationBackend, FrameInfo, PointerShapeInfo};
use crate::error::CaptureError;
use crate::frame::{FrameBuffer, BYTES_PER_PIXEL};
use crate::geometry::{MovedRegion, Rect};
use crate::CaptureResult;

/// One scripted acquisition.
#[derive(Debug, Clone)]
pub enum ReplayStep {
    /// Deliver a frame with the given frame info and region metadata.
    Frame {
        frame: FrameBuffer,
        info: FrameInfo,
        moved: Vec<MovedRegion>,
        dirty: Vec<Rect>,
    },

    /// No frame within the timeout.
    Timeout,

    /// The session lost access.
    AccessLost,

    /// A fatal backend failure.
    Fail(String),
}

impl ReplayStep {
    /// Deliver `frame`, reporting its pointer fields as a pointer update.
    pub fn frame(frame: FrameBuffer) -> Self {
        let position = frame.pointer_position;
        let has_position = position.x.is_some() && position.y.is_some();
        let info = FrameInfo {
            last_present_time: 1,
            last_mouse_update_time: if has_position { 1 } else { 0 },
            pointer_x: position.x.unwrap_or_default(),
            pointer_y: position.y.unwrap_or_default(),
            pointer_visible: position.is_visible(),
            pointer_shape_buffer_size: frame
                .pointer_shape_buffer
                .as_ref()
                .map_or(0, |b| b.len() as u32),
            ..Default::default()
        };

        Self::Frame {
            frame,
            info,
            moved: Vec::new(),
            dirty: Vec::new(),
        }
    }
}

/// Replays a list of [`ReplayStep`]s.
///
/// When the steps run out the backend either starts over (`repeat`) or
/// behaves like an idle output and times out.
pub struct ReplayBackend {
    output_index: u32,
    dimensions: (u32, u32),
    steps: Arc<Vec<ReplayStep>>,
    cursor: usize,
    repeat: bool,
    held: Option<usize>,
    mouse_clock: i64,
    releases: Arc<AtomicUsize>,
}

impl ReplayBackend {
    pub fn new(output_index: u32, dimensions: (u32, u32), steps: Vec<ReplayStep>) -> Self {
        Self {
            output_index,
            dimensions,
            steps: Arc::new(steps),
            cursor: 0,
            repeat: false,
            held: None,
            mouse_clock: 0,
            releases: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Start over once all steps were delivered.
    pub fn repeating(mut self) -> Self {
        self.repeat = true;
        self
    }

    /// Counter of released frames.
    pub fn release_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.releases)
    }

    fn held_frame(&self) -> CaptureResult<(&FrameBuffer, &FrameInfo, &[MovedRegion], &[Rect])> {
        match self.held.and_then(|index| self.steps.get(index)) {
            Some(ReplayStep::Frame {
                frame,
                info,
                moved,
                dirty,
            }) => Ok((frame, info, moved, dirty)),
            _ => Err(CaptureError::duplication("no frame is held")),
        }
    }
}

impl DuplicationBackend for ReplayBackend {
    fn output_index(&self) -> u32 {
        self.output_index
    }

    fn dimensions(&self) -> (u32, u32) {
        match self.held_frame() {
            Ok((frame, ..)) => (frame.width, frame.height),
            Err(_) => self.dimensions,
        }
    }

    fn acquire_next_frame(&mut self, timeout: Duration) -> CaptureResult<FrameInfo> {
        if self.held.is_some() {
            return Err(CaptureError::duplication("previous frame was not released"));
        }

        if self.cursor >= self.steps.len() {
            // Pace each pass like an output presenting at most once per timeout.
            thread::sleep(timeout);
            if !self.repeat || self.steps.is_empty() {
                return Err(CaptureError::Timeout);
            }
            self.cursor = 0;
        }

        let index = self.cursor;
        self.cursor += 1;

        match &self.steps[index] {
            ReplayStep::Frame { info, .. } => {
                self.held = Some(index);
                let mut info = *info;
                if info.last_mouse_update_time != 0 {
                    // Keep pointer timestamps increasing across repeats.
                    self.mouse_clock += 1;
                    info.last_mouse_update_time = self.mouse_clock;
                }
                Ok(info)
            }
            ReplayStep::Timeout => Err(CaptureError::Timeout),
            ReplayStep::AccessLost => Err(CaptureError::AccessLost),
            ReplayStep::Fail(message) => Err(CaptureError::duplication(message.clone())),
        }
    }

    fn moved_regions(&mut self, _metadata_size: u32) -> CaptureResult<Vec<MovedRegion>> {
        let (_, _, moved, _) = self.held_frame()?;
        Ok(moved.to_vec())
    }

    fn dirty_regions(&mut self, _metadata_size: u32) -> CaptureResult<Vec<Rect>> {
        let (_, _, _, dirty) = self.held_frame()?;
        Ok(dirty.to_vec())
    }

    fn pointer_shape(&mut self, buffer: &mut [u8]) -> CaptureResult<PointerShapeInfo> {
        let (frame, ..) = self.held_frame()?;
        let source = frame.pointer_shape_buffer.as_deref().unwrap_or_default();
        let len = source.len().min(buffer.len());
        buffer[..len].copy_from_slice(&source[..len]);

        let shape = frame.pointer_shape.unwrap_or_default();
        Ok(PointerShapeInfo {
            shape_type: shape.shape_type.unwrap_or_default(),
            width: shape.width.unwrap_or_default(),
            height: shape.height.unwrap_or_default(),
            pitch: shape.pitch.unwrap_or_default(),
            hot_spot_x: shape.hot_spot_x.unwrap_or_default(),
            hot_spot_y: shape.hot_spot_y.unwrap_or_default(),
        })
    }

    fn copy_frame(&mut self, buffer: &mut Vec<u8>) -> CaptureResult<usize> {
        let (frame, ..) = self.held_frame()?;
        buffer.clear();
        buffer.extend_from_slice(&frame.data);
        Ok(frame.width as usize * BYTES_PER_PIXEL)
    }

    fn release_frame(&mut self) -> CaptureResult<()> {
        if self.held.take().is_some() {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Builds [`ReplayBackend`]s over a shared list of steps.
pub struct ReplayBackendFactory {
    dimensions: (u32, u32),
    steps: Vec<ReplayStep>,
    repeat: bool,
    sessions: Arc<AtomicUsize>,
}

impl ReplayBackendFactory {
    pub fn new(dimensions: (u32, u32), steps: Vec<ReplayStep>, repeat: bool) -> Self {
        Self {
            dimensions,
            steps,
            repeat,
            sessions: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Factory that loops over still images loaded from `paths`.
    pub fn from_files<P: AsRef<std::path::Path>>(paths: &[P]) -> CaptureResult<Self> {
        let frames = paths
            .iter()
            .map(FrameBuffer::load_from_file)
            .collect::<CaptureResult<Vec<_>>>()?;

        let dimensions = frames
            .first()
            .map(|frame| (frame.width, frame.height))
            .ok_or_else(|| CaptureError::InvalidArgument("no replay images".to_string()))?;

        let steps = frames.into_iter().map(ReplayStep::frame).collect();
        Ok(Self::new(dimensions, steps, true))
    }

    /// Number of sessions created so far.
    pub fn session_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.sessions)
    }
}

impl BackendFactory for ReplayBackendFactory {
    fn create(
        &self,
        adapter_index: u32,
        output_index: u32,
    ) -> CaptureResult<Box<dyn DuplicationBackend>> {
        let session = self.sessions.fetch_add(1, Ordering::SeqCst);
        debug!(adapter_index, output_index, session, "Creating replay session");

        let mut backend = ReplayBackend::new(output_index, self.dimensions, self.steps.clone());
        backend.repeat = self.repeat;
        Ok(Box::new(backend))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use eye_ipc::{PointerPosition, PointerShape};

    #[test]
    fn test_exhausted_backend_times_out() {
        let mut backend = ReplayBackend::new(0, (1, 1), Vec::new());
        assert!(matches!(
            backend.acquire_next_frame(Duration::from_millis(1)),
            Err(CaptureError::Timeout)
        ));
    }

    #[test]
    fn test_frame_step_reports_pointer() {
        let mut frame = FrameBuffer::from_bgra(1, 1, vec![1, 1, 1, 1]).unwrap();
        frame.pointer_position = PointerPosition::new(1, 2, true);
        frame.pointer_shape = Some(PointerShape {
            width: Some(1),
            height: Some(1),
            ..Default::default()
        });
        frame.pointer_shape_buffer = Some(Bytes::from_static(&[9, 9, 9, 9]));

        let mut backend = ReplayBackend::new(0, (1, 1), vec![ReplayStep::frame(frame)]).repeating();
        let info = backend.acquire_next_frame(Duration::ZERO).unwrap();
        assert_eq!(info.pointer_shape_buffer_size, 4);
        assert_eq!((info.pointer_x, info.pointer_y), (1, 2));

        let mut shape = vec![0u8; 4];
        let shape_info = backend.pointer_shape(&mut shape).unwrap();
        assert_eq!(shape, vec![9, 9, 9, 9]);
        assert_eq!(shape_info.width, 1);

        backend.release_frame().unwrap();
        let info = backend.acquire_next_frame(Duration::ZERO).unwrap();
        assert_eq!(info.last_mouse_update_time, 2);
    }

    #[test]
    fn test_repeating_backend_waits_between_passes() {
        let frame = FrameBuffer::from_bgra(1, 1, vec![1, 1, 1, 1]).unwrap();
        let mut backend = ReplayBackend::new(0, (1, 1), vec![ReplayStep::frame(frame)]).repeating();
        let timeout = Duration::from_millis(30);

        backend.acquire_next_frame(timeout).unwrap();
        backend.release_frame().unwrap();

        let started = std::time::Instant::now();
        backend.acquire_next_frame(timeout).unwrap();
        assert!(started.elapsed() >= timeout);
    }

    #[test]
    fn test_factory_counts_sessions() {
        let factory = ReplayBackendFactory::new((1, 1), vec![ReplayStep::Timeout], false);
        let sessions = factory.session_counter();
        let backend = factory.create(0, 1).unwrap();
        assert_eq!(backend.output_index(), 1);
        assert_eq!(sessions.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_factory_from_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("still.png");
        image::RgbaImage::from_pixel(3, 2, image::Rgba([1, 2, 3, 255]))
            .save(&path)
            .unwrap();

        let factory = ReplayBackendFactory::from_files(&[path]).unwrap();
        let mut backend = factory.create(0, 0).unwrap();
        assert_eq!(backend.dimensions(), (3, 2));
        backend.acquire_next_frame(Duration::ZERO).unwrap();

        let mut buffer = Vec::new();
        let pitch = backend.copy_frame(&mut buffer).unwrap();
        assert_eq!(pitch, 12);
        assert_eq!(&buffer[..4], &[3, 2, 1, 255]);
    }

    #[test]
    fn test_factory_without_files_fails() {
        let paths: [&str; 0] = [];
        assert!(ReplayBackendFactory::from_files(&paths).is_err());
    }
}
