//! Observer state machine types.

use serde::{Deserialize, Serialize};

/// The current state of the observer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EyeState {
    /// Not observing.
    #[default]
    Idle,

    /// A capture session is running.
    Observing {
        adapter_index: u32,
        device_index: u32,
    },

    /// The last observation ended with a fatal capture error.
    Error { message: String },
}

impl EyeState {
    pub fn is_observing(&self) -> bool {
        matches!(self, Self::Observing { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Observing { .. } => "Observing",
            Self::Error { .. } => "Error",
        }
    }
}
