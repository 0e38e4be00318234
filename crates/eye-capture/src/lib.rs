//! Desktop duplication capture for the observer.
//!
//! This crate turns a native frame source into a sequence of [`FrameBuffer`]s
//! carrying BGRA pixels, moved/dirty region metadata and arbitrated pointer
//! state. The native source sits behind [`DuplicationBackend`]; on Windows the
//! DXGI Desktop Duplication API provides it.

mod backend;
mod duplicator;
mod error;
mod frame;
mod geometry;
mod pointer;
mod replay;

#[cfg(windows)]
mod dxgi;

pub use backend::{BackendFactory, DuplicationBackend, FrameInfo, PointerShapeInfo};
pub use duplicator::{DesktopDuplicator, Frames, DEFAULT_ACQUIRE_TIMEOUT};
pub use error::CaptureError;
pub use frame::FrameBuffer;
pub use geometry::{MovedRegion, Point, Rect};
pub use pointer::{PointerTracker, PointerUpdate};
pub use replay::{ReplayBackend, ReplayBackendFactory, ReplayStep};

#[cfg(windows)]
pub use dxgi::{DxgiBackend, DxgiBackendFactory};

/// Result type for capture operations.
pub type CaptureResult<T> = Result<T, CaptureError>;
