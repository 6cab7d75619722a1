//! Pixel-space rectangles.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Axis-aligned pixel rectangle.
///
/// The origin may be negative so that rectangles expanded past an image edge
/// stay representable. A pixel at (x, y) is inside if
/// `x0 <= x < x0 + width` and `y0 <= y < y0 + height`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelRect {
    pub x0: i64,
    pub y0: i64,
    pub width: usize,
    pub height: usize,
}

impl PixelRect {
    #[inline]
    pub const fn new(x0: i64, y0: i64, width: usize, height: usize) -> Self {
        Self {
            x0,
            y0,
            width,
            height,
        }
    }

    /// Square window of side `2 * half_size + 1` centred on (cx, cy).
    #[inline]
    pub const fn centered(cx: i64, cy: i64, half_size: usize) -> Self {
        let side = 2 * half_size + 1;
        Self::new(cx - half_size as i64, cy - half_size as i64, side, side)
    }

    /// Rectangle spanning two inclusive corners, in any order.
    pub fn from_corners(a: (i64, i64), b: (i64, i64)) -> Self {
        let x0 = a.0.min(b.0);
        let y0 = a.1.min(b.1);
        let x1 = a.0.max(b.0);
        let y1 = a.1.max(b.1);
        Self::new(x0, y0, (x1 - x0 + 1) as usize, (y1 - y0 + 1) as usize)
    }

    /// Exclusive right edge.
    #[inline]
    pub const fn x1(&self) -> i64 {
        self.x0 + self.width as i64
    }

    /// Exclusive bottom edge.
    #[inline]
    pub const fn y1(&self) -> i64 {
        self.y0 + self.height as i64
    }

    #[inline]
    pub const fn area(&self) -> usize {
        self.width * self.height
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    #[inline]
    pub const fn contains(&self, x: i64, y: i64) -> bool {
        x >= self.x0 && x < self.x1() && y >= self.y0 && y < self.y1()
    }

    #[inline]
    pub fn contains_rect(&self, other: &PixelRect) -> bool {
        other.x0 >= self.x0 && other.y0 >= self.y0 && other.x1() <= self.x1() && other.y1() <= self.y1()
    }

    /// Overlap of two rectangles, `None` when they do not share a pixel.
    pub fn intersect(&self, other: &PixelRect) -> Option<PixelRect> {
        let x0 = self.x0.max(other.x0);
        let y0 = self.y0.max(other.y0);
        let x1 = self.x1().min(other.x1());
        let y1 = self.y1().min(other.y1());
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(PixelRect::new(x0, y0, (x1 - x0) as usize, (y1 - y0) as usize))
    }

    /// Grows the rectangle by `margin` pixels on every side.
    #[inline]
    pub const fn expand(&self, margin: usize) -> PixelRect {
        PixelRect::new(
            self.x0 - margin as i64,
            self.y0 - margin as i64,
            self.width + 2 * margin,
            self.height + 2 * margin,
        )
    }

    #[inline]
    pub const fn translate(&self, dx: i64, dy: i64) -> PixelRect {
        PixelRect::new(self.x0 + dx, self.y0 + dy, self.width, self.height)
    }

    /// Row-major grid of tiles covering the rectangle. Edge tiles are clipped.
    pub fn tiles(&self, tile_width: usize, tile_height: usize) -> TileIter {
        assert!(
            tile_width > 0 && tile_height > 0,
            "tile size must be positive"
        );
        TileIter {
            area: *self,
            tile_width,
            tile_height,
            next: (self.x0, self.y0),
        }
    }

    /// Number of tiles `tiles()` yields for the given tile size.
    pub fn tile_count(&self, tile_width: usize, tile_height: usize) -> usize {
        if self.is_empty() {
            return 0;
        }
        self.width.div_ceil(tile_width) * self.height.div_ceil(tile_height)
    }
}

impl fmt::Display for PixelRect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {}] {}x{}",
            self.x0, self.y0, self.width, self.height
        )
    }
}

pub struct TileIter {
    area: PixelRect,
    tile_width: usize,
    tile_height: usize,
    next: (i64, i64),
}

impl Iterator for TileIter {
    type Item = PixelRect;

    fn next(&mut self) -> Option<PixelRect> {
        if self.area.is_empty() {
            return None;
        }
        let (x, y) = self.next;
        if y >= self.area.y1() {
            return None;
        }
        let width = (self.area.x1() - x).min(self.tile_width as i64) as usize;
        let height = (self.area.y1() - y).min(self.tile_height as i64) as usize;

        let next_x = x + self.tile_width as i64;
        self.next = if next_x >= self.area.x1() {
            (self.area.x0, y + self.tile_height as i64)
        } else {
            (next_x, y)
        };

        Some(PixelRect::new(x, y, width, height))
    }
}
