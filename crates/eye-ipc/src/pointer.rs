//! Pointer (cursor) models.

use serde::{Deserialize, Serialize};

/// Last known pointer location. `None` members mean unknown, not zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointerPosition {
    #[serde(default)]
    pub x: Option<i32>,

    #[serde(default)]
    pub y: Option<i32>,

    #[serde(default, rename = "v")]
    pub visible: Option<bool>,
}

impl PointerPosition {
    pub fn new(x: i32, y: i32, visible: bool) -> Self {
        Self {
            x: Some(x),
            y: Some(y),
            visible: Some(visible),
        }
    }

    /// Whether the pointer is known to be visible.
    pub fn is_visible(&self) -> bool {
        self.visible.unwrap_or(false)
    }
}

/// Pointer shape description as reported by the capture backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointerShape {
    #[serde(default, rename = "type")]
    pub shape_type: Option<u32>,

    #[serde(default)]
    pub width: Option<u32>,

    #[serde(default)]
    pub height: Option<u32>,

    #[serde(default)]
    pub pitch: Option<u32>,

    #[serde(default, rename = "hotspotX")]
    pub hot_spot_x: Option<i32>,

    #[serde(default, rename = "hotspotY")]
    pub hot_spot_y: Option<i32>,
}

impl PointerShape {
    /// Byte length of a 32bpp bitmap of this shape, when dimensions are known.
    pub fn expected_buffer_len(&self) -> Option<usize> {
        Some(self.width? as usize * self.height? as usize * 4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pointer_position_wire_names() {
        let json = serde_json::to_value(PointerPosition::new(10, 20, true)).unwrap();
        assert_eq!(json, serde_json::json!({"x": 10, "y": 20, "v": true}));
    }

    #[test]
    fn test_unknown_position_is_not_visible() {
        assert!(!PointerPosition::default().is_visible());
    }

    #[test]
    fn test_pointer_shape_wire_names() {
        let shape = PointerShape {
            shape_type: Some(2),
            width: Some(32),
            height: Some(32),
            pitch: Some(128),
            hot_spot_x: Some(1),
            hot_spot_y: Some(3),
        };
        let json = serde_json::to_value(shape).unwrap();
        assert_eq!(json["type"], 2);
        assert_eq!(json["hotspotX"], 1);
        assert_eq!(json["hotspotY"], 3);
        assert_eq!(shape.expected_buffer_len(), Some(32 * 32 * 4));
    }
}
