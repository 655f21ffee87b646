//! Geometry primitives shared by the mapper and the render side.
//!
//! `AffineTransform` follows the usual 2D graphics convention:
//! `x' = a*x + c*y + tx`, `y' = b*x + d*y + ty`.

use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};

/// Rotation applied to sensor frames: they arrive landscape, the display is portrait.
pub const SENSOR_ROTATION_DEGREES: f64 = 90.0;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    /// Zero, negative or non-finite on either axis.
    pub fn is_degenerate(&self) -> bool {
        !(self.width.is_finite() && self.height.is_finite())
            || self.width <= 0.0
            || self.height <= 0.0
    }

    pub fn area(&self) -> f64 {
        self.width * self.height
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned rectangle, origin at its top-left corner.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn from_size(size: Size) -> Self {
        Self::new(0.0, 0.0, size.width, size.height)
    }

    pub fn max_x(&self) -> f64 {
        self.x + self.width
    }

    pub fn max_y(&self) -> f64 {
        self.y + self.height
    }

    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn area(&self) -> f64 {
        self.width * self.height
    }

    /// True when `other` lies inside `self`, allowing `eps` of rounding slack.
    pub fn contains_rect(&self, other: &Rect, eps: f64) -> bool {
        other.x >= self.x - eps
            && other.y >= self.y - eps
            && other.max_x() <= self.max_x() + eps
            && other.max_y() <= self.max_y() + eps
    }

    pub fn approx_eq(&self, other: &Rect, eps: f64) -> bool {
        (self.x - other.x).abs() <= eps
            && (self.y - other.y).abs() <= eps
            && (self.width - other.width).abs() <= eps
            && (self.height - other.height).abs() <= eps
    }
}

/// Bounding box as fractions of the analyzed buffer, origin top-left.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl NormalizedRect {
    pub const FULL: NormalizedRect = NormalizedRect {
        x: 0.0,
        y: 0.0,
        width: 1.0,
        height: 1.0,
    };

    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Clamp both edges of each axis into [0, 1]. NaN edges collapse to 0.
    pub fn clamped(&self) -> Self {
        let (x, width) = clamp_span(self.x, self.width);
        let (y, height) = clamp_span(self.y, self.height);
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Scale into pixel space of a `buffer`-sized image.
    pub fn to_pixels(&self, buffer: Size) -> Rect {
        Rect::new(
            self.x as f64 * buffer.width,
            self.y as f64 * buffer.height,
            self.width as f64 * buffer.width,
            self.height as f64 * buffer.height,
        )
    }

    /// Intersection over union.
    pub fn iou(&self, other: &NormalizedRect) -> f32 {
        let ix1 = self.x.max(other.x);
        let iy1 = self.y.max(other.y);
        let ix2 = (self.x + self.width).min(other.x + other.width);
        let iy2 = (self.y + self.height).min(other.y + other.height);
        let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        if inter == 0.0 {
            return 0.0;
        }
        let union = self.width * self.height + other.width * other.height - inter;
        inter / union
    }
}

fn clamp_span(origin: f32, extent: f32) -> (f32, f32) {
    let unit = |v: f32| if v.is_nan() { 0.0 } else { v.clamp(0.0, 1.0) };
    let start = unit(origin);
    let end = unit(origin + extent).max(start);
    (start, end - start)
}

// ----------------------------------------------------------------------------
// Content fit
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentFit {
    /// Whole frame visible, may letterbox. Scale uses the smaller axis ratio.
    AspectFit,
    /// Display fully covered, may crop. Scale uses the larger axis ratio.
    #[default]
    AspectFill,
}

impl std::str::FromStr for ContentFit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "aspect_fit" | "aspectfit" | "fit" => Ok(Self::AspectFit),
            "aspect_fill" | "aspectfill" | "fill" => Ok(Self::AspectFill),
            other => Err(format!("unknown content fit '{other}'")),
        }
    }
}

// ----------------------------------------------------------------------------
// Affine transform
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AffineTransform {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub tx: f64,
    pub ty: f64,
}

impl AffineTransform {
    pub const IDENTITY: AffineTransform = AffineTransform {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        tx: 0.0,
        ty: 0.0,
    };

    /// Counter-clockwise rotation in degrees. Quarter turns are exact.
    pub fn rotation(degrees: f64) -> Self {
        let (sin, cos) = quarter_turn_sin_cos(degrees)
            .unwrap_or_else(|| degrees.to_radians().sin_cos());
        Self {
            a: cos,
            b: sin,
            c: -sin,
            d: cos,
            tx: 0.0,
            ty: 0.0,
        }
    }

    pub fn scale(sx: f64, sy: f64) -> Self {
        Self {
            a: sx,
            d: sy,
            ..Self::IDENTITY
        }
    }

    pub fn translation(tx: f64, ty: f64) -> Self {
        Self {
            tx,
            ty,
            ..Self::IDENTITY
        }
    }

    /// `self` followed by `next`.
    pub fn then(&self, next: &AffineTransform) -> Self {
        Self {
            a: self.a * next.a + self.b * next.c,
            b: self.a * next.b + self.b * next.d,
            c: self.c * next.a + self.d * next.c,
            d: self.c * next.b + self.d * next.d,
            tx: self.tx * next.a + self.ty * next.c + next.tx,
            ty: self.tx * next.b + self.ty * next.d + next.ty,
        }
    }

    pub fn apply(&self, p: Point) -> Point {
        Point::new(
            self.a * p.x + self.c * p.y + self.tx,
            self.b * p.x + self.d * p.y + self.ty,
        )
    }

    /// Axis-aligned bounds of the transformed rectangle.
    pub fn apply_rect(&self, r: &Rect) -> Rect {
        let corners = [
            self.apply(Point::new(r.x, r.y)),
            self.apply(Point::new(r.max_x(), r.y)),
            self.apply(Point::new(r.x, r.max_y())),
            self.apply(Point::new(r.max_x(), r.max_y())),
        ];
        let mut min = corners[0];
        let mut max = corners[0];
        for p in &corners[1..] {
            min.x = min.x.min(p.x);
            min.y = min.y.min(p.y);
            max.x = max.x.max(p.x);
            max.y = max.y.max(p.y);
        }
        Rect::new(min.x, min.y, max.x - min.x, max.y - min.y)
    }

    pub fn determinant(&self) -> f64 {
        self.a * self.d - self.b * self.c
    }

    /// `None` for singular transforms.
    pub fn inverse(&self) -> Option<Self> {
        let det = self.determinant();
        if det == 0.0 || !det.is_finite() {
            return None;
        }
        Some(Self {
            a: self.d / det,
            b: -self.b / det,
            c: -self.c / det,
            d: self.a / det,
            tx: (self.c * self.ty - self.d * self.tx) / det,
            ty: (self.b * self.tx - self.a * self.ty) / det,
        })
    }
}

fn quarter_turn_sin_cos(degrees: f64) -> Option<(f64, f64)> {
    let turns = degrees / 90.0;
    if turns.fract() != 0.0 {
        return None;
    }
    Some(match (turns as i64).rem_euclid(4) {
        0 => (0.0, 1.0),
        1 => (1.0, 0.0),
        2 => (0.0, -1.0),
        _ => (-1.0, 0.0),
    })
}

// ----------------------------------------------------------------------------
// Geometry context
// ----------------------------------------------------------------------------

/// Everything needed to map normalized buffer coordinates into display space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GeometryContext {
    pub buffer: Size,
    pub display: Size,
    pub rotation_degrees: f64,
    /// Reflect one axis after rotating so the overlay stays right-reading.
    pub mirrored: bool,
    pub fit: ContentFit,
}

impl GeometryContext {
    /// Sensor geometry: rotated 90 degrees and mirrored.
    pub fn new(buffer: Size, display: Size, fit: ContentFit) -> Self {
        Self {
            buffer,
            display,
            rotation_degrees: SENSOR_ROTATION_DEGREES,
            mirrored: true,
            fit,
        }
    }

    fn swaps_axes(&self) -> bool {
        let turns = (self.rotation_degrees / 90.0).round() as i64;
        turns.rem_euclid(2) == 1
    }

    /// Per-axis ratios `(x_scale, y_scale)`; axes pair crosswise under a quarter turn.
    pub fn axis_scales(&self) -> (f64, f64) {
        if self.swaps_axes() {
            (
                self.display.width / self.buffer.height,
                self.display.height / self.buffer.width,
            )
        } else {
            (
                self.display.width / self.buffer.width,
                self.display.height / self.buffer.height,
            )
        }
    }

    /// Uniform scale for the content fit. Degenerate geometry yields 1.0.
    pub fn scale(&self) -> f64 {
        if self.buffer.is_degenerate() || self.display.is_degenerate() {
            return 1.0;
        }
        let (x_scale, y_scale) = self.axis_scales();
        let scale = match self.fit {
            ContentFit::AspectFill => x_scale.max(y_scale),
            ContentFit::AspectFit => x_scale.min(y_scale),
        };
        if scale.is_finite() && scale > 0.0 {
            scale
        } else {
            1.0
        }
    }

    /// Buffer-pixel space to display space.
    ///
    /// The buffer rectangle is centered on the origin, scaled (with the mirror
    /// sign on the y axis), rotated, then centered on the display bounds.
    pub fn transform(&self) -> AffineTransform {
        let scale = self.scale();
        let y_sign = if self.mirrored { -1.0 } else { 1.0 };
        AffineTransform::translation(-self.buffer.width / 2.0, -self.buffer.height / 2.0)
            .then(&AffineTransform::scale(scale, scale * y_sign))
            .then(&AffineTransform::rotation(self.rotation_degrees))
            .then(&AffineTransform::translation(
                self.display.width / 2.0,
                self.display.height / 2.0,
            ))
    }
}

// ----------------------------------------------------------------------------
// Shared geometry
// ----------------------------------------------------------------------------

/// Display-side half of the geometry, stamped with a version.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GeometrySnapshot {
    pub version: u64,
    pub display: Size,
    pub fit: ContentFit,
}

impl GeometrySnapshot {
    /// Combine with the size of the frame being analyzed.
    pub fn context_for(&self, buffer: Size) -> GeometryContext {
        GeometryContext::new(buffer, self.display, self.fit)
    }
}

/// Display geometry written by the render thread and read by the worker.
///
/// Readers always copy out a whole snapshot, so they never see a display size
/// from one update paired with a fit mode from another.
#[derive(Debug)]
pub struct SharedGeometry {
    inner: RwLock<GeometrySnapshot>,
}

impl SharedGeometry {
    pub fn new(display: Size, fit: ContentFit) -> Self {
        Self {
            inner: RwLock::new(GeometrySnapshot {
                version: 0,
                display,
                fit,
            }),
        }
    }

    pub fn snapshot(&self) -> GeometrySnapshot {
        *self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record new display bounds. Returns true when they actually changed.
    pub fn set_display_bounds(&self, display: Size) -> bool {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if guard.display == display {
            return false;
        }
        guard.display = display;
        guard.version += 1;
        true
    }

    pub fn set_content_fit(&self, fit: ContentFit) -> bool {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if guard.fit == fit {
            return false;
        }
        guard.fit = fit;
        guard.version += 1;
        true
    }
}
