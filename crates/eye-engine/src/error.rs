//! Error types for the engine.

use eye_capture::CaptureError;
use thiserror::Error;

/// Errors that end an observation or reject a command.
#[derive(Debug, Error)]
pub enum EngineError {
    /// An observation is already running.
    #[error("Already observing")]
    AlreadyObserving,

    /// No observation is running.
    #[error("Not observing")]
    NotObserving,

    /// The capture session failed.
    #[error("Capture failed: {0}")]
    Capture(#[from] CaptureError),

    /// The worker thread could not be started.
    #[error("Failed to spawn observer thread: {0}")]
    Spawn(#[source] std::io::Error),
}
