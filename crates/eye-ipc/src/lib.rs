//! Typed hub messages and wire models for the observer.
//!
//! This crate defines the commands the hub sends to the observer, the
//! `EyeReport` events the observer publishes back, and every JSON model
//! carried by either direction.

mod commands;
mod events;
mod matrix;
mod pointer;
mod state;
mod types;

pub use commands::{CommandParseError, EyeCommand};
pub use events::{EyeEvent, HubInvocation, EYE_REPORT_TARGET, INFO_TARGET, STATUS_TARGET};
pub use matrix::{DataMatrixFormat, MatrixData, MatrixEvent, MatrixFrame, MatrixSettings};
pub use pointer::{PointerPosition, PointerShape};
pub use state::EyeState;
pub use types::{
    AlignRequest, ExtensionData, ImageSettings, ObservationRegion, ObservationRegionKind,
    ObservationRequest, SnapshotFormat, SnapshotRequest, ThumbnailStreamSettings,
};

use crossbeam_channel::{Receiver, Sender};

/// Channel capacity for commands (hub → engine).
pub const COMMAND_CHANNEL_CAPACITY: usize = 64;

/// Creates a bounded command channel.
pub fn command_channel() -> (Sender<EyeCommand>, Receiver<EyeCommand>) {
    crossbeam_channel::bounded(COMMAND_CHANNEL_CAPACITY)
}
