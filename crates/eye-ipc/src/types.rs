//! Request models received from the hub.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::matrix::MatrixSettings;

/// Catch-all map for JSON members a model does not know about.
///
/// Unknown members survive a decode/encode cycle untouched.
pub type ExtensionData = Map<String, Value>;

/// Request to start observing a display output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservationRequest {
    /// Index of the graphics adapter (default 0).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adapter_index: Option<u32>,

    /// Index of the output on the adapter (default 0).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_index: Option<u32>,

    /// Regions to observe on every frame.
    #[serde(default)]
    pub regions: Vec<ObservationRegion>,

    /// Whether to publish desktop thumbnails (default true).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_desktop_thumbnail: Option<bool>,

    /// Thumbnail throttle and scale.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desktop_thumbnail_stream_settings: Option<ThumbnailStreamSettings>,

    /// Whether to publish pointer position and shape (default true).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_pointer_position: Option<bool>,

    #[serde(flatten)]
    pub additional_data: ExtensionData,
}

impl ObservationRequest {
    /// Thumbnail settings with defaults applied to missing or non-positive values.
    pub fn effective_thumbnail_settings(&self) -> ThumbnailStreamSettings {
        let mut settings = ThumbnailStreamSettings::default();
        if let Some(requested) = &self.desktop_thumbnail_stream_settings {
            if let Some(max_fps) = requested.max_fps.filter(|v| *v > 0.0) {
                settings.max_fps = Some(max_fps);
            }
            if let Some(scale) = requested.scale_factor.filter(|v| *v > 0.0) {
                settings.scale_factor = Some(scale);
            }
        }
        settings
    }

    pub fn streams_thumbnails(&self) -> bool {
        self.stream_desktop_thumbnail.unwrap_or(true)
    }

    pub fn streams_pointer(&self) -> bool {
        self.stream_pointer_position.unwrap_or(true)
    }
}

/// Thumbnail publication settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThumbnailStreamSettings {
    /// Minimum seconds between two thumbnails.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_fps: Option<f64>,

    /// Thumbnail size relative to the frame.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale_factor: Option<f64>,
}

impl ThumbnailStreamSettings {
    pub const DEFAULT_MAX_FPS: f64 = 0.5;
    pub const DEFAULT_SCALE_FACTOR: f64 = 0.15;
}

impl Default for ThumbnailStreamSettings {
    fn default() -> Self {
        Self {
            max_fps: Some(Self::DEFAULT_MAX_FPS),
            scale_factor: Some(Self::DEFAULT_SCALE_FACTOR),
        }
    }
}

/// Kind of an observation region.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObservationRegionKind {
    #[default]
    Image,
    MatrixFrame,
}

/// A region of the output to observe.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservationRegion {
    #[serde(default)]
    pub kind: ObservationRegionKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matrix_settings: Option<MatrixSettings>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bitmap_settings: Option<ImageSettings>,

    #[serde(flatten)]
    pub additional_data: ExtensionData,
}

/// Bitmap region settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageSettings {
    #[serde(default)]
    pub x: i32,

    #[serde(default)]
    pub y: i32,

    #[serde(default)]
    pub width: i32,

    #[serde(default)]
    pub height: i32,

    #[serde(default, rename = "maxFPS")]
    pub max_fps: i32,

    #[serde(flatten)]
    pub additional_data: ExtensionData,
}

/// Image format of a snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnapshotFormat {
    #[default]
    Png,
    Jpeg,
}

impl SnapshotFormat {
    /// File extension used in cache keys.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
        }
    }
}

/// One-shot request for a full-resolution (or scaled) snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale_factor: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<SnapshotFormat>,

    /// Opaque caller data stored next to the snapshot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl SnapshotRequest {
    pub const DEFAULT_SCALE_FACTOR: f64 = 1.0;

    /// Fill in missing scale factor and format.
    pub fn apply_defaults(&mut self) {
        if self.scale_factor.is_none() {
            self.scale_factor = Some(Self::DEFAULT_SCALE_FACTOR);
        }
        if self.format.is_none() {
            self.format = Some(SnapshotFormat::Png);
        }
    }
}

/// One-shot request to regenerate the alignment map.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlignRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pixel_size: Option<i32>,
}

impl AlignRequest {
    /// Requested anchor size, or `default` when absent or non-positive.
    pub fn pixel_size_or(&self, default: u32) -> u32 {
        match self.pixel_size {
            Some(size) if size > 0 => size as u32,
            _ => default,
        }
    }
}
