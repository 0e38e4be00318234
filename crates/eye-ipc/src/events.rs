//! Events sent from the observer to the hub.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::matrix::MatrixFrame;
use crate::pointer::{PointerPosition, PointerShape};

/// Hub method carrying every observation report.
pub const EYE_REPORT_TARGET: &str = "EyeReport";

/// Hub method for informational replies to commands.
pub const INFO_TARGET: &str = "Info";

/// Hub method for connection status.
pub const STATUS_TARGET: &str = "Status";

/// A named hub invocation with positional JSON arguments.
///
/// This is the unit exchanged with the hub in both directions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubInvocation {
    pub target: String,

    #[serde(default)]
    pub arguments: Vec<Value>,
}

impl HubInvocation {
    pub fn new(target: impl Into<String>, arguments: Vec<Value>) -> Self {
        Self {
            target: target.into(),
            arguments,
        }
    }
}

/// Events that the engine publishes to the hub.
#[derive(Debug, Clone, PartialEq)]
pub enum EyeEvent {
    /// Output dimensions changed.
    ScreenDimensions { width: u32, height: u32 },

    /// A new thumbnail was stored under `key`.
    Thumbnail { key: String, width: u32, height: u32 },

    /// Pointer position or visibility changed.
    PointerPosition(PointerPosition),

    /// A visible pointer shape, its image stored under `key`.
    PointerShape { shape: PointerShape, key: String },

    /// A snapshot was stored under `key`.
    Snapshot { key: String, width: u32, height: u32 },

    /// The alignment map was regenerated and stored under `key`.
    AlignmentMapUpdated { key: String },

    /// A newly decoded matrix frame.
    MatrixFrame(MatrixFrame),

    /// Informational reply.
    Info(String),

    /// Connection status.
    Status(String),
}

impl EyeEvent {
    /// The `EyeReport` sub-type, or `None` for non-report events.
    pub fn report_type(&self) -> Option<&'static str> {
        match self {
            Self::ScreenDimensions { .. } => Some("ScreenDimensions"),
            Self::Thumbnail { .. } => Some("Thumbnail"),
            Self::PointerPosition(_) => Some("PointerPosition"),
            Self::PointerShape { .. } => Some("PointerShape"),
            Self::Snapshot { .. } => Some("Snapshot"),
            Self::AlignmentMapUpdated { .. } => Some("AlignmentMapUpdated"),
            Self::MatrixFrame(_) => Some("MatrixFrame"),
            Self::Info(_) | Self::Status(_) => None,
        }
    }

    /// Convert to the hub wire form.
    ///
    /// Reports become `EyeReport(subType, [args...])`; `Info` and `Status`
    /// carry their message as the only argument.
    pub fn into_invocation(self) -> Result<HubInvocation, serde_json::Error> {
        let report_type = self.report_type();
        let args = match self {
            Self::Info(message) => {
                return Ok(HubInvocation::new(INFO_TARGET, vec![json!(message)]))
            }
            Self::Status(message) => {
                return Ok(HubInvocation::new(STATUS_TARGET, vec![json!(message)]))
            }
            Self::ScreenDimensions { width, height } => vec![json!(width), json!(height)],
            Self::Thumbnail { key, width, height } | Self::Snapshot { key, width, height } => {
                vec![json!(key), json!(width), json!(height)]
            }
            Self::PointerPosition(position) => vec![serde_json::to_value(position)?],
            Self::PointerShape { shape, key } => vec![serde_json::to_value(shape)?, json!(key)],
            Self::AlignmentMapUpdated { key } => vec![json!(key)],
            Self::MatrixFrame(frame) => vec![serde_json::to_value(frame)?],
        };

        Ok(HubInvocation::new(
            EYE_REPORT_TARGET,
            vec![json!(report_type), Value::Array(args)],
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_wire_form() {
        let invocation = EyeEvent::Thumbnail {
            key: "Eye_Thumb_x.png".into(),
            width: 10,
            height: 20,
        }
        .into_invocation()
        .unwrap();

        assert_eq!(invocation.target, EYE_REPORT_TARGET);
        assert_eq!(invocation.arguments[0], "Thumbnail");
        assert_eq!(invocation.arguments[1], json!(["Eye_Thumb_x.png", 10, 20]));
    }

    #[test]
    fn test_pointer_position_wire_form() {
        let invocation = EyeEvent::PointerPosition(PointerPosition::new(3, 4, true))
            .into_invocation()
            .unwrap();
        assert_eq!(invocation.arguments[0], "PointerPosition");
        assert_eq!(invocation.arguments[1][0]["x"], 3);
        assert_eq!(invocation.arguments[1][0]["v"], true);
    }

    #[test]
    fn test_info_and_status() {
        let info = EyeEvent::Info("hello".into()).into_invocation().unwrap();
        assert_eq!(info.target, INFO_TARGET);
        assert_eq!(info.arguments, vec![json!("hello")]);

        let status = EyeEvent::Status("Eye Connected.".into()).into_invocation().unwrap();
        assert_eq!(status.target, STATUS_TARGET);
    }
}
