use serde::{Deserialize, Serialize};

/// Ball position in pixels, in the coordinate space of the normalized frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Position) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Axis-aligned integer pixel rectangle given as top-left corner plus size.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Build a box from two corners `(x1, y1)`-`(x2, y2)`. Coordinates are
    /// truncated to whole pixels and negative values are clamped to zero.
    pub fn from_corners(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        let (x1, x2) = if x1 <= x2 { (x1, x2) } else { (x2, x1) };
        let (y1, y2) = if y1 <= y2 { (y1, y2) } else { (y2, y1) };
        Self {
            x: x1.max(0.0) as u32,
            y: y1.max(0.0) as u32,
            width: (x2 - x1).max(0.0) as u32,
            height: (y2 - y1).max(0.0) as u32,
        }
    }

    /// Build a box of the given size centered on `center`. Each side is
    /// floored at `min_size` so degenerate fits still produce a visible box.
    pub fn centered(center: Position, width: f64, height: f64, min_size: f64) -> Self {
        let width = sanitize_extent(width).max(min_size);
        let height = sanitize_extent(height).max(min_size);
        Self {
            x: (center.x - width / 2.0).max(0.0) as u32,
            y: (center.y - height / 2.0).max(0.0) as u32,
            width: width as u32,
            height: height as u32,
        }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn center(&self) -> Position {
        Position::new(
            self.x as f64 + self.width as f64 / 2.0,
            self.y as f64 + self.height as f64 / 2.0,
        )
    }

    /// `[x, y, width, height]`, the layout used in label files.
    pub fn to_array(&self) -> [u32; 4] {
        [self.x, self.y, self.width, self.height]
    }
}

fn sanitize_extent(value: f64) -> f64 {
    if value.is_finite() {
        value.max(0.0)
    } else {
        0.0
    }
}

/// Search window inside a frame. `top_left` is inclusive and `bottom_right`
/// exclusive; a constructed `Roi` is never empty and never exceeds the frame
/// it was clipped against.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roi {
    pub top_left: (u32, u32),
    pub bottom_right: (u32, u32),
}

impl Roi {
    /// Clip the rectangle `(x0, y0)`-`(x1, y1)` to a `frame_width` x
    /// `frame_height` frame. Returns `None` if nothing is left.
    pub fn clipped(
        x0: i64,
        y0: i64,
        x1: i64,
        y1: i64,
        frame_width: u32,
        frame_height: u32,
    ) -> Option<Roi> {
        let x0 = x0.clamp(0, frame_width as i64);
        let y0 = y0.clamp(0, frame_height as i64);
        let x1 = x1.clamp(0, frame_width as i64);
        let y1 = y1.clamp(0, frame_height as i64);
        if x0 >= x1 || y0 >= y1 {
            return None;
        }
        Some(Roi {
            top_left: (x0 as u32, y0 as u32),
            bottom_right: (x1 as u32, y1 as u32),
        })
    }

    /// Square window of `2 * half_extent` around `center`, clipped to the frame.
    pub fn around(
        center: Position,
        half_extent: u32,
        frame_width: u32,
        frame_height: u32,
    ) -> Option<Roi> {
        if !center.is_finite() {
            return None;
        }
        let cx = center.x.floor() as i64;
        let cy = center.y.floor() as i64;
        let half = half_extent as i64;
        Self::clipped(
            cx - half,
            cy - half,
            cx + half,
            cy + half,
            frame_width,
            frame_height,
        )
    }

    /// The whole frame minus `margin` on every side.
    pub fn inset(margin: u32, frame_width: u32, frame_height: u32) -> Option<Roi> {
        let margin = margin as i64;
        Self::clipped(
            margin,
            margin,
            frame_width as i64 - margin,
            frame_height as i64 - margin,
            frame_width,
            frame_height,
        )
    }

    pub fn x(&self) -> u32 {
        self.top_left.0
    }

    pub fn y(&self) -> u32 {
        self.top_left.1
    }

    pub fn width(&self) -> u32 {
        self.bottom_right.0 - self.top_left.0
    }

    pub fn height(&self) -> u32 {
        self.bottom_right.1 - self.top_left.1
    }

    pub fn contains(&self, position: Position) -> bool {
        position.x >= self.top_left.0 as f64
            && position.y >= self.top_left.1 as f64
            && position.x < self.bottom_right.0 as f64
            && position.y < self.bottom_right.1 as f64
    }
}
