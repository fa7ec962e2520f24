use serde::{Deserialize, Serialize};

/// Reference segments shorter than this are treated as degenerate.
const DEGENERATE_SPAN: f32 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn as_tuple(self) -> (f32, f32) {
        (self.x, self.y)
    }

    pub fn distance(self, other: Point) -> f32 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        (dx * dx + dy * dy).sqrt()
    }
}

impl From<(f32, f32)> for Point {
    fn from(value: (f32, f32)) -> Self {
        Self::new(value.0, value.1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    #[serde(rename = "w")]
    pub width: f32,
    #[serde(rename = "h")]
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn expand(&self, pad: f32) -> Rect {
        Rect::new(
            self.x - pad,
            self.y - pad,
            self.width + pad * 2.0,
            self.height + pad * 2.0,
        )
    }

    pub fn translate(&self, dx: f32, dy: f32) -> Rect {
        Rect::new(self.x + dx, self.y + dy, self.width, self.height)
    }

    pub fn contains_point(&self, x: f32, y: f32) -> bool {
        x >= self.x && x <= self.right() && y >= self.y && y <= self.bottom()
    }

    /// Whether `other` lies entirely inside `self`, allowing `tolerance` of slack.
    pub fn contains_rect(&self, other: &Rect, tolerance: f32) -> bool {
        other.x >= self.x - tolerance
            && other.y >= self.y - tolerance
            && other.right() <= self.right() + tolerance
            && other.bottom() <= self.bottom() + tolerance
    }

    /// Strict overlap: touching borders do not count.
    pub fn overlaps(&self, other: &Rect) -> bool {
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }

    pub fn union(&self, other: &Rect) -> Rect {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        let right = self.right().max(other.right());
        let bottom = self.bottom().max(other.bottom());
        Rect::new(x, y, right - x, bottom - y)
    }

    pub fn bounding(rects: impl IntoIterator<Item = Rect>) -> Option<Rect> {
        rects.into_iter().reduce(|acc, rect| acc.union(&rect))
    }
}

/// Drops repeated points and interior points that sit on a straight run.
pub fn compress_path(points: &[Point]) -> Vec<Point> {
    const EPS: f32 = 1e-4;
    let mut out: Vec<Point> = Vec::with_capacity(points.len());
    for &point in points {
        if let Some(last) = out.last()
            && (point.x - last.x).abs() <= EPS
            && (point.y - last.y).abs() <= EPS
        {
            continue;
        }
        if out.len() >= 2 {
            let prev = out[out.len() - 2];
            let curr = out[out.len() - 1];
            let dx1 = curr.x - prev.x;
            let dy1 = curr.y - prev.y;
            let dx2 = point.x - curr.x;
            let dy2 = point.y - curr.y;
            let same_line = (dx1 * dy2 - dy1 * dx2).abs() <= EPS;
            let same_way = dx1 * dx2 + dy1 * dy2 >= 0.0;
            if same_line && same_way {
                out.pop();
            }
        }
        out.push(point);
    }
    if out.len() == 1 && points.len() >= 2 {
        out.push(out[0]);
    }
    out
}

/// Rounds `value` to the nearest multiple of `grid_size`; a non-positive grid disables snapping.
pub fn snap_grid(value: f32, grid_size: f32) -> f32 {
    if grid_size <= 0.0 || !value.is_finite() {
        return value;
    }
    let snapped = (value / grid_size).round() * grid_size;
    // Avoid persisting negative zero.
    if snapped == 0.0 { 0.0 } else { snapped }
}

/// One-dimensional affine map `world = source * scale + offset`.
///
/// Used wherever an algorithm works in its own frame (routing grid indices,
/// screen pixels) and the result has to be mapped back to world space. The
/// map is fitted from two reference pairs; a zero-length reference segment
/// cannot determine a scale, so `fit` falls back to `scale = 1` and takes the
/// offset from the first pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisTransform {
    pub scale: f32,
    pub offset: f32,
}

impl AxisTransform {
    pub const IDENTITY: AxisTransform = AxisTransform {
        scale: 1.0,
        offset: 0.0,
    };

    pub fn fit(source_a: f32, target_a: f32, source_b: f32, target_b: f32) -> Self {
        let span = source_b - source_a;
        if span.abs() < DEGENERATE_SPAN || !span.is_finite() {
            return Self {
                scale: 1.0,
                offset: target_a - source_a,
            };
        }
        let scale = (target_b - target_a) / span;
        Self {
            scale,
            offset: target_a - source_a * scale,
        }
    }

    pub fn apply(&self, value: f32) -> f32 {
        value * self.scale + self.offset
    }

    pub fn invert(&self) -> Self {
        if self.scale.abs() < DEGENERATE_SPAN {
            return Self {
                scale: 1.0,
                offset: -self.offset,
            };
        }
        Self {
            scale: 1.0 / self.scale,
            offset: -self.offset / self.scale,
        }
    }
}

/// Independent x/y axis transforms fitted from two point correspondences.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlaneTransform {
    pub x: AxisTransform,
    pub y: AxisTransform,
}

impl PlaneTransform {
    pub const IDENTITY: PlaneTransform = PlaneTransform {
        x: AxisTransform::IDENTITY,
        y: AxisTransform::IDENTITY,
    };

    pub fn fit(source_a: (f32, f32), target_a: (f32, f32), source_b: (f32, f32), target_b: (f32, f32)) -> Self {
        Self {
            x: AxisTransform::fit(source_a.0, target_a.0, source_b.0, target_b.0),
            y: AxisTransform::fit(source_a.1, target_a.1, source_b.1, target_b.1),
        }
    }

    pub fn apply(&self, point: (f32, f32)) -> (f32, f32) {
        (self.x.apply(point.0), self.y.apply(point.1))
    }

    pub fn apply_rect(&self, rect: &Rect) -> Rect {
        let (x1, y1) = self.apply((rect.x, rect.y));
        let (x2, y2) = self.apply((rect.right(), rect.bottom()));
        Rect::new(x1.min(x2), y1.min(y2), (x2 - x1).abs(), (y2 - y1).abs())
    }

    pub fn invert(&self) -> Self {
        Self {
            x: self.x.invert(),
            y: self.y.invert(),
        }
    }
}
