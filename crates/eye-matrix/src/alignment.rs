//! Alignment map discovery.

use eye_capture::{FrameBuffer, Point};
use tracing::debug;

/// Anchor block color in frame byte order (`B, G, R`): pure green.
pub const ANCHOR_COLOR_BGR: [u8; 3] = [0, 255, 0];

const BYTES_PER_PIXEL: usize = 4;

/// Ordered anchor coordinates; index `i` is matrix sample `i`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlignmentMap {
    points: Vec<Point>,
}

impl AlignmentMap {
    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Flatten to `[x0, y0, x1, y1, ...]`, the form matrix settings carry.
    pub fn to_flat(&self) -> Vec<i32> {
        self.points.iter().flat_map(|p| [p.x, p.y]).collect()
    }
}

impl From<Vec<Point>> for AlignmentMap {
    fn from(points: Vec<Point>) -> Self {
        Self { points }
    }
}

/// Find the anchor blocks of a calibration frame.
///
/// An anchor is a square of side `block_size + 2` whose pixels all have the
/// anchor color. Anchors are returned in row-major order. After an anchor the
/// search resumes `block_size + 1` pixels to its right on the same row; when a
/// search finds nothing it restarts once at column 0, `block_size + 1` rows
/// below the last anchor, and otherwise ends. A frame without anchors yields
/// an empty map.
///
/// Returns `None` for frames without data or a zero `block_size`.
pub fn generate_alignment_map(frame: &FrameBuffer, block_size: u32) -> Option<AlignmentMap> {
    if !frame.has_data() || block_size == 0 {
        return None;
    }

    let scanner = BlockScanner {
        data: &frame.data,
        width: frame.width as usize,
        height: frame.height as usize,
        side: block_size as usize + 2,
    };
    let step = block_size as usize + 1;

    let mut points: Vec<Point> = Vec::new();
    let (mut x, mut y) = (0usize, 0usize);

    while y + scanner.side <= scanner.height {
        match scanner.find(x, y) {
            Some((found_x, found_y)) => {
                points.push(Point::new(found_x as i32, found_y as i32));
                x = found_x + step;
                y = found_y;
            }
            None => {
                let Some(last) = points.last() else {
                    break;
                };
                let next_row = last.y as usize + step;
                if y >= next_row {
                    break;
                }
                x = 0;
                y = next_row;
            }
        }
    }

    debug!(
        anchors = points.len(),
        block_size,
        width = frame.width,
        height = frame.height,
        "Generated alignment map"
    );
    Some(AlignmentMap::from(points))
}

struct BlockScanner<'a> {
    data: &'a [u8],
    width: usize,
    height: usize,
    side: usize,
}

impl BlockScanner<'_> {
    /// First block at or after `(start_x, start_y)` in row-major order.
    fn find(&self, start_x: usize, start_y: usize) -> Option<(usize, usize)> {
        if self.side > self.width || self.side > self.height {
            return None;
        }
        let last_x = self.width - self.side;
        let last_y = self.height - self.side;

        for y in start_y..=last_y {
            let first_x = if y == start_y { start_x } else { 0 };
            for x in first_x..=last_x {
                if self.is_block(x, y) {
                    return Some((x, y));
                }
            }
        }
        None
    }

    fn is_block(&self, x: usize, y: usize) -> bool {
        (y..y + self.side).all(|row| self.is_anchor_run(x, row))
    }

    fn is_anchor_run(&self, x: usize, y: usize) -> bool {
        let start = (y * self.width + x) * BYTES_PER_PIXEL;
        let end = start + self.side * BYTES_PER_PIXEL;
        self.data
            .get(start..end)
            .is_some_and(|run| {
                run.chunks_exact(BYTES_PER_PIXEL)
                    .all(|pixel| pixel[..3] == ANCHOR_COLOR_BGR)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GREEN: [u8; 4] = [0, 255, 0, 255];
    const GREY: [u8; 4] = [40, 40, 40, 255];

    fn paint(data: &mut [u8], width: u32, x: u32, y: u32, side: u32, color: [u8; 4]) {
        for row in y..y + side {
            for col in x..x + side {
                let offset = ((row * width + col) * 4) as usize;
                data[offset..offset + 4].copy_from_slice(&color);
            }
        }
    }

    /// Anchors of side `block_size + 2` every `pitch` pixels from `(origin, origin)`.
    fn grid_frame(columns: u32, rows: u32, block_size: u32, pitch: u32, origin: u32) -> FrameBuffer {
        let width = origin * 2 + columns * pitch;
        let height = origin * 2 + rows * pitch;
        let mut data = GREY.repeat((width * height) as usize);
        for row in 0..rows {
            for column in 0..columns {
                paint(
                    &mut data,
                    width,
                    origin + column * pitch,
                    origin + row * pitch,
                    block_size + 2,
                    GREEN,
                );
            }
        }
        FrameBuffer::from_bgra(width, height, data).unwrap()
    }

    #[test]
    fn test_full_calibration_grid() {
        let frame = grid_frame(156, 46, 2, 5, 2);
        let map = generate_alignment_map(&frame, 2).unwrap();

        assert_eq!(map.len(), 156 * 46);
        assert_eq!(map.points()[0], Point::new(2, 2));
        assert_eq!(map.points()[1], Point::new(7, 2));
        assert_eq!(map.points()[156], Point::new(2, 7));
        assert_eq!(map.points()[map.len() - 1], Point::new(2 + 155 * 5, 2 + 45 * 5));
    }

    #[test]
    fn test_generation_is_repeatable() {
        let frame = grid_frame(12, 5, 3, 8, 1);
        let first = generate_alignment_map(&frame, 3).unwrap();
        let second = generate_alignment_map(&frame, 3).unwrap();
        assert_eq!(first.len(), 60);
        assert_eq!(first, second);
    }

    #[test]
    fn test_empty_frame_has_no_map() {
        let frame = FrameBuffer::from_bgra(8, 8, vec![0u8; 8 * 8 * 4]).unwrap();
        assert!(generate_alignment_map(&frame, 2).is_none());
        assert!(generate_alignment_map(&FrameBuffer::default(), 2).is_none());
    }

    #[test]
    fn test_frame_without_anchors_yields_empty_map() {
        let frame = FrameBuffer::from_bgra(16, 16, GREY.repeat(16 * 16)).unwrap();
        let map = generate_alignment_map(&frame, 2).unwrap();
        assert!(map.is_empty());
    }

    #[test]
    fn test_blocks_smaller_than_anchor_are_ignored() {
        let width = 20;
        let mut data = GREY.repeat((width * width) as usize);
        // 3x3 is too small for block size 2 (side 4).
        paint(&mut data, width, 1, 1, 3, GREEN);
        paint(&mut data, width, 10, 10, 4, GREEN);
        let frame = FrameBuffer::from_bgra(width, width, data).unwrap();

        let map = generate_alignment_map(&frame, 2).unwrap();
        assert_eq!(map.points(), &[Point::new(10, 10)]);
    }

    #[test]
    fn test_flat_map() {
        let map = AlignmentMap::from(vec![Point::new(1, 2), Point::new(3, 4)]);
        assert_eq!(map.to_flat(), vec![1, 2, 3, 4]);
    }
}
