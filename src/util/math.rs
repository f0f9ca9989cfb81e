//! Math type re-exports and raycasting primitives.
//!
//! This module re-exports types from `glam` and provides the object-space
//! ray and float box used by every shading pass.

pub use glam::{IVec3, Mat4, UVec2, UVec3, Vec2, Vec3, Vec4};

use bytemuck::{Pod, Zeroable};

/// Axis-aligned float box in object space.
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Box3 {
    pub min: Vec3,
    pub max: Vec3,
}

impl Box3 {
    /// Create a new box from min and max corners.
    #[inline]
    pub const fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Check whether a point lies inside the box (inclusive).
    #[inline]
    pub fn contains(&self, p: Vec3) -> bool {
        p.cmpge(self.min).all() && p.cmple(self.max).all()
    }

    /// Size of the box.
    #[inline]
    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }
}

/// Object-space ray.
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Ray {
    /// Origin
    pub o: Vec3,
    /// Direction (not required to be normalized)
    pub d: Vec3,
}

impl Ray {
    #[inline]
    pub const fn new(o: Vec3, d: Vec3) -> Self {
        Self { o, d }
    }

    /// Slab test against a box.
    ///
    /// Returns `(tnear, tfar)` when the ray's supporting line crosses the box
    /// with `tfar > tnear`. `tnear` may be negative when the origin is inside.
    #[inline]
    pub fn intersect(&self, bbox: &Box3) -> Option<(f32, f32)> {
        let invr = Vec3::ONE / self.d;
        let tbot = invr * (bbox.min - self.o);
        let ttop = invr * (bbox.max - self.o);

        let tmin = ttop.min(tbot);
        let tmax = ttop.max(tbot);

        let tnear = tmin.max_element();
        let tfar = tmax.min_element();

        (tfar > tnear).then_some((tnear, tfar))
    }

    /// Point along the ray.
    #[inline]
    pub fn at(&self, t: f32) -> Vec3 {
        self.o + self.d * t
    }
}

/// Integer division rounding towards positive infinity.
#[inline]
pub fn round_up_div(a: u32, b: u32) -> u32 {
    a.div_ceil(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ray_hits_box() {
        let bbox = Box3::new(Vec3::ZERO, Vec3::splat(4.0));
        let ray = Ray::new(Vec3::new(2.0, 2.0, -3.0), Vec3::Z);
        let (tnear, tfar) = ray.intersect(&bbox).expect("ray crosses the box");
        assert!((tnear - 3.0).abs() < 1e-6);
        assert!((tfar - 7.0).abs() < 1e-6);
        assert!(bbox.contains(ray.at(tnear + 0.5)));
    }

    #[test]
    fn test_ray_misses_box() {
        let bbox = Box3::new(Vec3::ZERO, Vec3::ONE);
        let ray = Ray::new(Vec3::new(5.0, 5.0, -3.0), Vec3::Z);
        assert!(ray.intersect(&bbox).is_none());
    }

    #[test]
    fn test_ray_from_inside() {
        let bbox = Box3::new(Vec3::ZERO, Vec3::splat(2.0));
        let ray = Ray::new(Vec3::ONE, Vec3::X);
        let (tnear, tfar) = ray.intersect(&bbox).unwrap();
        assert!(tnear < 0.0);
        assert!((tfar - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_round_up_div() {
        assert_eq!(round_up_div(64, 32), 2);
        assert_eq!(round_up_div(65, 32), 3);
        assert_eq!(round_up_div(1, 32), 1);
        assert_eq!(round_up_div(0, 32), 0);
    }
}
