//! Axis-aligned rectangle math shared by table assembly, grid inference and
//! cell collection. Coordinates are top-left origin; `eps` absorbs sub-pixel
//! rounding from hand-drawn guides and transform math.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    #[serde(alias = "w")]
    pub width: f64,
    #[serde(alias = "h")]
    pub height: f64,
}

impl Rect {
    #[must_use]
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    #[must_use]
    pub fn from_edges(left: f64, top: f64, right: f64, bottom: f64) -> Self {
        Self {
            x: left,
            y: top,
            width: (right - left).max(0.0),
            height: (bottom - top).max(0.0),
        }
    }

    /// Same area with non-negative extents; a rect drawn right-to-left or
    /// bottom-to-top keeps its covered region.
    #[must_use]
    pub fn normalized(&self) -> Self {
        let (left, right) = (self.x.min(self.right()), self.x.max(self.right()));
        let (top, bottom) = (self.y.min(self.bottom()), self.y.max(self.bottom()));
        Self::from_edges(left, top, right, bottom)
    }

    #[must_use]
    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    #[must_use]
    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    #[must_use]
    pub fn area(&self) -> f64 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    #[must_use]
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    #[must_use]
    pub fn contains_point(&self, x: f64, y: f64, eps: f64) -> bool {
        x >= self.x - eps && x <= self.right() + eps && y >= self.y - eps && y <= self.bottom() + eps
    }

    /// Smallest rectangle covering both.
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        Self::from_edges(
            self.x.min(other.x),
            self.y.min(other.y),
            self.right().max(other.right()),
            self.bottom().max(other.bottom()),
        )
    }

    /// Scales a unit-normalized rect into pixel space.
    #[must_use]
    pub fn to_pixels(&self, viewport_width: f64, viewport_height: f64) -> Self {
        Self {
            x: self.x * viewport_width,
            y: self.y * viewport_height,
            width: self.width * viewport_width,
            height: self.height * viewport_height,
        }
    }

    /// Inverse of [`Rect::to_pixels`]. A zero-sized viewport yields a zero rect.
    #[must_use]
    pub fn to_normalized(&self, viewport_width: f64, viewport_height: f64) -> Self {
        if viewport_width <= 0.0 || viewport_height <= 0.0 {
            return Self::default();
        }
        Self {
            x: self.x / viewport_width,
            y: self.y / viewport_height,
            width: self.width / viewport_width,
            height: self.height / viewport_height,
        }
    }

    /// Restricts the rect to the vertical band `[top, bottom]`.
    #[must_use]
    pub fn clip_vertical(&self, top: f64, bottom: f64) -> Self {
        Self::from_edges(self.x, self.y.max(top), self.right(), self.bottom().min(bottom))
    }

    #[must_use]
    pub fn bounding<'a>(rects: impl IntoIterator<Item = &'a Rect>) -> Option<Self> {
        rects
            .into_iter()
            .copied()
            .reduce(|acc, rect| acc.union(&rect))
    }
}

#[must_use]
pub fn contains(outer: &Rect, inner: &Rect, eps: f64) -> bool {
    inner.x >= outer.x - eps
        && inner.y >= outer.y - eps
        && inner.right() <= outer.right() + eps
        && inner.bottom() <= outer.bottom() + eps
}

#[must_use]
pub fn intersects(a: &Rect, b: &Rect, eps: f64) -> bool {
    a.x < b.right() + eps && b.x < a.right() + eps && a.y < b.bottom() + eps && b.y < a.bottom() + eps
}

#[must_use]
pub fn intersection(a: &Rect, b: &Rect) -> Option<Rect> {
    let left = a.x.max(b.x);
    let top = a.y.max(b.y);
    let right = a.right().min(b.right());
    let bottom = a.bottom().min(b.bottom());
    if right <= left || bottom <= top {
        return None;
    }
    Some(Rect::from_edges(left, top, right, bottom))
}

/// Share of `candidate` covered by `container`, in `[0, 1]`.
#[must_use]
pub fn overlap_ratio(container: &Rect, candidate: &Rect) -> f64 {
    let candidate_area = candidate.area();
    if candidate_area <= 0.0 {
        return 0.0;
    }
    intersection(container, candidate).map_or(0.0, |shared| shared.area() / candidate_area)
}

#[must_use]
pub fn center_inside(container: &Rect, candidate: &Rect, eps: f64) -> bool {
    let (cx, cy) = candidate.center();
    container.contains_point(cx, cy, eps)
}

/// Whether a row/column guide belongs to a table: either enough of it lies
/// inside, or its center does.
#[must_use]
pub fn attaches(table: &Rect, guide: &Rect, overlap_threshold: f64, eps: f64) -> bool {
    overlap_ratio(table, guide) >= overlap_threshold || center_inside(table, guide, eps)
}
