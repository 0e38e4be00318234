//! Error types for the capture module.

use thiserror::Error;

/// Errors that can occur during capture operations.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// A caller supplied an invalid argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A still image could not be loaded.
    #[error("Image load error: {0}")]
    Image(#[from] image::ImageError),

    /// No frame arrived within the acquire timeout.
    #[error("Timed out waiting for the next frame")]
    Timeout,

    /// The duplication interface is no longer valid (mode change, desktop switch).
    #[error("Desktop duplication access lost")]
    AccessLost,

    /// Fatal duplication failure; ends the session.
    #[error("Desktop duplication failed: {message}")]
    Duplication { message: String },

    /// Windows API error.
    #[error("Windows API error: {message}")]
    WindowsApi {
        message: String,
        #[cfg(windows)]
        #[source]
        source: Option<windows::core::Error>,
    },

    /// Desktop duplication not available on this platform.
    #[error("Desktop duplication not supported")]
    NotSupported,
}

impl CaptureError {
    pub fn duplication(message: impl Into<String>) -> Self {
        Self::Duplication {
            message: message.into(),
        }
    }

    /// Whether the capture loop can continue after this error.
    ///
    /// `AccessLost` still requires a new session.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout | Self::AccessLost)
    }
}

#[cfg(windows)]
impl From<windows::core::Error> for CaptureError {
    fn from(err: windows::core::Error) -> Self {
        Self::WindowsApi {
            message: err.message().to_string(),
            source: Some(err),
        }
    }
}
