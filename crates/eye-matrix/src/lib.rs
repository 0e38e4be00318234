//! Matrix frame recovery from captured frames.
//!
//! An encoder paints application data into fixed pixels of its window. This
//! crate finds those pixels ([`generate_alignment_map`]) and turns their
//! colors back into a [`MatrixFrame`](eye_ipc::MatrixFrame) ([`decode`]).
//! Both are pure functions of the frame and may run on any thread.

mod alignment;
mod codec;
mod error;
mod uptime;

pub use alignment::{generate_alignment_map, AlignmentMap, ANCHOR_COLOR_BGR};
pub use codec::{decode, decode_at, frame_id_from_triplet, HEX_LINE_LENGTH, TEXT_GRID_LINE_LENGTH};
pub use error::MatrixError;
pub use uptime::{boot_time, system_uptime};

/// Result type for matrix operations.
pub type MatrixResult<T> = Result<T, MatrixError>;
