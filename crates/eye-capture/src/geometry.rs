//! Region geometry reported by the duplication backend.

/// A point in output coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// An edge-based rectangle (`right`/`bottom` exclusive).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }
}

/// A region copied unscaled from `source` to `destination`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct MovedRegion {
    /// Top-left corner of the source area in the previous frame.
    pub source: Point,
    pub destination: Rect,
}

impl MovedRegion {
    /// The area the region was copied from.
    pub fn source_rect(&self) -> Rect {
        Rect::new(
            self.source.x,
            self.source.y,
            self.source.x + self.destination.width(),
            self.source.y + self.destination.height(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_moved_region_source_matches_destination_size() {
        let region = MovedRegion {
            source: Point::new(10, 20),
            destination: Rect::new(100, 200, 150, 230),
        };
        let source = region.source_rect();
        assert_eq!(source, Rect::new(10, 20, 60, 50));
        assert_eq!(source.width(), region.destination.width());
        assert_eq!(source.height(), region.destination.height());
    }
}
