use std::f32::consts::{PI, TAU};

use serde::{Deserialize, Serialize};

/// 2D vector used for positions and sizes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Self = Self { x: 0.0, y: 0.0 };
    pub const ONE: Self = Self { x: 1.0, y: 1.0 };

    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Vector with both components set to `v`.
    pub const fn splat(v: f32) -> Self {
        Self { x: v, y: v }
    }

    pub fn length(&self) -> f32 {
        self.x.hypot(self.y)
    }

    /// Half of this vector, used to turn a size into half-extents.
    pub fn half(self) -> Self {
        self * 0.5
    }

    /// Rotates the vector by `angle` radians.
    pub fn rotated(self, angle: f32) -> Self {
        let (sin, cos) = angle.sin_cos();
        Self::new(self.x * cos - self.y * sin, self.x * sin + self.y * cos)
    }
}

impl From<(f32, f32)> for Vec2 {
    fn from((x, y): (f32, f32)) -> Self {
        Self { x, y }
    }
}

impl From<glam::Vec2> for Vec2 {
    fn from(v: glam::Vec2) -> Self {
        Self::new(v.x, v.y)
    }
}

impl From<Vec2> for glam::Vec2 {
    fn from(v: Vec2) -> Self {
        glam::Vec2::new(v.x, v.y)
    }
}

impl std::ops::Add for Vec2 {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl std::ops::AddAssign for Vec2 {
    fn add_assign(&mut self, rhs: Self) {
        self.x += rhs.x;
        self.y += rhs.y;
    }
}

impl std::ops::Sub for Vec2 {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl std::ops::Mul<f32> for Vec2 {
    type Output = Self;

    fn mul(self, rhs: f32) -> Self::Output {
        Self::new(self.x * rhs, self.y * rhs)
    }
}

impl std::ops::Neg for Vec2 {
    type Output = Self;

    fn neg(self) -> Self::Output {
        Self::new(-self.x, -self.y)
    }
}

/// Axis-aligned rectangle given by its min and max corners.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub min: Vec2,
    pub max: Vec2,
}

impl Rect {
    pub fn new(min: Vec2, max: Vec2) -> Self {
        Self { min, max }
    }

    /// Footprint of an entity centred on `center` with the given `size`.
    pub fn from_center(center: Vec2, size: Vec2) -> Self {
        let half = size.half();
        Self {
            min: center - half,
            max: center + half,
        }
    }

    pub fn width(&self) -> f32 {
        self.max.x - self.min.x
    }

    pub fn height(&self) -> f32 {
        self.max.y - self.min.y
    }

    pub fn center(&self) -> Vec2 {
        (self.min + self.max) * 0.5
    }

    /// True when the rectangles overlap or touch.
    pub fn intersects(&self, other: &Rect) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
    }

    pub fn contains(&self, point: Vec2) -> bool {
        point.x >= self.min.x && point.x <= self.max.x && point.y >= self.min.y && point.y <= self.max.y
    }
}

/// Wraps an angle in radians into `(-PI, PI]`.
pub fn normalize_angle(angle: f32) -> f32 {
    if !angle.is_finite() {
        return angle;
    }
    let mut wrapped = angle.rem_euclid(TAU);
    if wrapped > PI {
        wrapped -= TAU;
    }
    wrapped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_angle_keeps_half_open_range() {
        assert!((normalize_angle(PI) - PI).abs() < 1e-6);
        assert!((normalize_angle(-PI) - PI).abs() < 1e-6);
        assert!((normalize_angle(3.0 * PI / 2.0) + PI / 2.0).abs() < 1e-5);
        assert_eq!(normalize_angle(0.0), 0.0);
        assert!((normalize_angle(TAU + 0.5) - 0.5).abs() < 1e-5);
    }

    #[test]
    fn rect_from_center_spans_half_size() {
        let rect = Rect::from_center(Vec2::new(10.0, 10.0), Vec2::new(4.0, 2.0));
        assert_eq!(rect.min, Vec2::new(8.0, 9.0));
        assert_eq!(rect.max, Vec2::new(12.0, 11.0));
        assert!(rect.contains(Vec2::new(10.0, 10.0)));
        assert!(!rect.intersects(&Rect::from_center(Vec2::new(20.0, 10.0), Vec2::ONE)));
    }

    #[test]
    fn glam_round_trip_preserves_components() {
        let v = Vec2::new(1.5, -2.0);
        let g: glam::Vec2 = v.into();
        assert_eq!(Vec2::from(g), v);
    }
}
