//! Error types for matrix decoding.

use thiserror::Error;

/// Precondition failures of the matrix codec.
///
/// Malformed payloads never produce an error; they decode to default data.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MatrixError {
    /// No settings were supplied.
    #[error("Matrix settings are required")]
    NullSettings,

    /// The settings cannot be applied to the frame.
    #[error("Invalid matrix settings: {0}")]
    InvalidSettings(String),
}
