//! Matrix frame models: decode settings, decoded frames and events.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use crate::types::ExtensionData;

/// Output encoding of the sampled matrix bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataMatrixFormat {
    Raw,
    Hex,
    Text,
    TextGrid,
    #[default]
    Json,
    MatrixEvents,
}

/// Settings for decoding one matrix region.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatrixSettings {
    /// Flattened sample coordinates `[x0, y0, x1, y1, ...]`.
    #[serde(default)]
    pub map: Option<Vec<i32>>,

    /// Sample index of the frame id triplet (default 0, negative disables).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_id_index: Option<i32>,

    /// Sample index of the metadata triplet (default 1, negative disables).
    ///
    /// The wire name is historical; the value is an index.
    #[serde(
        default,
        rename = "useFrameMetadata",
        skip_serializing_if = "Option::is_none"
    )]
    pub frame_metadata_index: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_format: Option<DataMatrixFormat>,

    #[serde(flatten)]
    pub additional_data: ExtensionData,
}

impl MatrixSettings {
    pub const DEFAULT_FRAME_ID_INDEX: i32 = 0;
    pub const DEFAULT_FRAME_METADATA_INDEX: i32 = 1;

    /// Settings for the given map and format with default indices.
    pub fn new(map: Vec<i32>, data_format: DataMatrixFormat) -> Self {
        Self {
            map: Some(map),
            data_format: Some(data_format),
            ..Default::default()
        }
    }

    pub fn frame_id_index(&self) -> i32 {
        self.frame_id_index.unwrap_or(Self::DEFAULT_FRAME_ID_INDEX)
    }

    pub fn frame_metadata_index(&self) -> i32 {
        self.frame_metadata_index
            .unwrap_or(Self::DEFAULT_FRAME_METADATA_INDEX)
    }

    pub fn data_format(&self) -> DataMatrixFormat {
        self.data_format.unwrap_or_default()
    }
}

/// Format-dependent payload of a decoded matrix frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MatrixData {
    /// Every sampled byte, serialized as base64.
    Raw(#[serde(serialize_with = "serialize_base64")] Vec<u8>),
    Hex(String),
    Text(String),
    TextGrid(String),
    /// Parsed JSON value; `Null` when the payload did not parse.
    Json(Value),
    /// Parsed events; empty when the payload did not parse.
    Events(Vec<MatrixEvent>),
}

impl MatrixData {
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Raw(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Hex(text) | Self::Text(text) | Self::TextGrid(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_events(&self) -> Option<&[MatrixEvent]> {
        match self {
            Self::Events(events) => Some(events),
            _ => None,
        }
    }
}

fn serialize_base64<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&STANDARD.encode(bytes))
}

/// A decoded matrix frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatrixFrame {
    #[serde(rename = "id")]
    pub frame_id: Option<u32>,

    /// `[width_code, height_code, packed]`; packed holds the frame type in
    /// the high nibble and the pixel size in the low nibble.
    #[serde(rename = "m")]
    pub metadata: Option<[u8; 3]>,

    #[serde(rename = "ft")]
    pub frame_time: DateTime<Utc>,

    #[serde(rename = "d")]
    pub data: MatrixData,

    #[serde(flatten)]
    pub additional_data: ExtensionData,
}

impl MatrixFrame {
    pub fn frame_type(&self) -> Option<u8> {
        self.metadata.map(|m| m[2] >> 4)
    }

    pub fn pixel_size(&self) -> Option<u8> {
        self.metadata.map(|m| m[2] % 16)
    }
}

/// One application event carried in a `MatrixEvents` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixEvent {
    #[serde(default, rename = "t")]
    pub topic: Option<String>,

    #[serde(default, rename = "et")]
    pub event_time: Option<DateTime<Utc>>,

    #[serde(default, rename = "d")]
    pub data: Value,

    #[serde(default, rename = "p")]
    pub priority: Option<String>,

    #[serde(flatten)]
    pub additional_data: ExtensionData,
}
