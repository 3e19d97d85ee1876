use serde::{Deserialize, Serialize};

/// An edit rectangle in canvas coordinates, as tools report it.
///
/// Edges may be fractional; [`PixelRect::from_rect`] rounds them outward.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub min_x: f32,
    pub min_y: f32,
    pub max_x: f32,
    pub max_y: f32,
}

impl Rect {
    pub fn from_min_max(min_x: f32, min_y: f32, max_x: f32, max_y: f32) -> Self {
        Self { min_x, min_y, max_x, max_y }
    }

    pub fn from_pixel_rect(r: PixelRect) -> Self {
        Self {
            min_x: r.x as f32,
            min_y: r.y as f32,
            max_x: r.right() as f32,
            max_y: r.bottom() as f32,
        }
    }
}

/// Integer pixel rectangle, half-open on the right and bottom edges.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub const fn from_size(width: u32, height: u32) -> Self {
        Self { x: 0, y: 0, width, height }
    }

    /// Round `rect` outward to whole pixels and clamp it to `bounds`.
    pub fn from_rect(rect: Rect, bounds: PixelRect) -> Self {
        let clamp_x = |v: f32| (v.max(bounds.x as f32) as u32).min(bounds.right());
        let clamp_y = |v: f32| (v.max(bounds.y as f32) as u32).min(bounds.bottom());

        let min_x = clamp_x(rect.min_x.floor());
        let min_y = clamp_y(rect.min_y.floor());
        let max_x = clamp_x(rect.max_x.ceil());
        let max_y = clamp_y(rect.max_y.ceil());

        Self {
            x: min_x,
            y: min_y,
            width: max_x.saturating_sub(min_x),
            height: max_y.saturating_sub(min_y),
        }
    }

    pub const fn right(&self) -> u32 {
        self.x + self.width
    }

    pub const fn bottom(&self) -> u32 {
        self.y + self.height
    }

    pub const fn area(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x && x < self.right() && y >= self.y && y < self.bottom()
    }

    pub fn contains_rect(&self, other: &PixelRect) -> bool {
        other.is_empty()
            || (other.x >= self.x
                && other.y >= self.y
                && other.right() <= self.right()
                && other.bottom() <= self.bottom())
    }

    pub fn intersect(&self, other: &PixelRect) -> PixelRect {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        if right <= x || bottom <= y {
            return PixelRect::new(x, y, 0, 0);
        }
        PixelRect::new(x, y, right - x, bottom - y)
    }

    /// Smallest rectangle covering both. Empty rectangles are ignored.
    pub fn union(&self, other: &PixelRect) -> PixelRect {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        let right = self.right().max(other.right());
        let bottom = self.bottom().max(other.bottom());
        PixelRect::new(x, y, right - x, bottom - y)
    }

    /// Split into four quadrants (top-left, top-right, bottom-left, bottom-right).
    /// Odd extents give the extra pixel to the right/bottom halves.
    pub fn quadrants(&self) -> [PixelRect; 4] {
        let left_w = self.width / 2;
        let top_h = self.height / 2;
        let right_w = self.width - left_w;
        let bottom_h = self.height - top_h;
        let mid_x = self.x + left_w;
        let mid_y = self.y + top_h;
        [
            PixelRect::new(self.x, self.y, left_w, top_h),
            PixelRect::new(mid_x, self.y, right_w, top_h),
            PixelRect::new(self.x, mid_y, left_w, bottom_h),
            PixelRect::new(mid_x, mid_y, right_w, bottom_h),
        ]
    }
}
