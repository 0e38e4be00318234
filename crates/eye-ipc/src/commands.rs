//! Commands sent from the hub to the observer.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::events::HubInvocation;
use crate::types::{AlignRequest, ObservationRequest, SnapshotRequest};

/// Commands that the hub (or the local process) can send to the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EyeCommand {
    /// Start observing with the given request.
    StartObserving(ObservationRequest),

    /// Stop the current observation.
    StopObserving,

    /// Regenerate the alignment map from the next frame.
    Align(AlignRequest),

    /// Capture a snapshot of the next frame.
    Snapshot(SnapshotRequest),

    /// Shutdown the engine completely.
    Shutdown,
}

/// Failure to map a hub invocation onto a command.
#[derive(Debug, Error)]
pub enum CommandParseError {
    #[error("unknown hub method: {0}")]
    UnknownMethod(String),

    #[error("invalid arguments for {method}: {source}")]
    InvalidArguments {
        method: String,
        #[source]
        source: serde_json::Error,
    },
}

impl EyeCommand {
    /// Hub method name of this command.
    pub fn method(&self) -> &'static str {
        match self {
            Self::StartObserving(_) => "StartObserving",
            Self::StopObserving => "StopObserving",
            Self::Align(_) => "Align",
            Self::Snapshot(_) => "Snapshot",
            Self::Shutdown => "Shutdown",
        }
    }

    /// Parse an inbound hub invocation.
    ///
    /// A missing or `null` first argument yields the request's defaults.
    pub fn from_invocation(invocation: &HubInvocation) -> Result<Self, CommandParseError> {
        let method = invocation.target.as_str();
        match method {
            "StartObserving" => first_argument(invocation).map(Self::StartObserving),
            "StopObserving" => Ok(Self::StopObserving),
            "Align" => first_argument(invocation).map(Self::Align),
            "Snapshot" => first_argument(invocation).map(Self::Snapshot),
            _ => Err(CommandParseError::UnknownMethod(method.to_string())),
        }
    }
}

fn first_argument<T>(invocation: &HubInvocation) -> Result<T, CommandParseError>
where
    T: DeserializeOwned + Default,
{
    match invocation.arguments.first() {
        None | Some(serde_json::Value::Null) => Ok(T::default()),
        Some(value) => {
            serde_json::from_value(value.clone()).map_err(|source| {
                CommandParseError::InvalidArguments {
                    method: invocation.target.clone(),
                    source,
                }
            })
        }
    }
}
