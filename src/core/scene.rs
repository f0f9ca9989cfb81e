//! Exhibit and camera: the minimal scene contract a raycast needs.
//!
//! The exhibit places the volume's object space (grid cells) in the world;
//! the camera places the viewer. Both only have to produce matrices.

use std::f32::consts::FRAC_PI_3;

use glam::{Mat4, UVec3, Vec3};
use serde::{Deserialize, Serialize};

/// Placement of the volume in world space.
///
/// The volume's center sits at the world origin, so the world→object
/// transform is a translation by `center`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Exhibit {
    /// Volume center in object space.
    pub center: Vec3,
    /// Volume extent in object space.
    pub size: Vec3,
}

impl Exhibit {
    pub fn new(center: Vec3, size: Vec3) -> Self {
        Self { center, size }
    }

    /// Exhibit covering a whole grid of `dim` cells.
    pub fn for_grid(dim: UVec3) -> Self {
        let size = dim.as_vec3();
        Self {
            center: size * 0.5,
            size,
        }
    }

    /// World → object transform.
    pub fn matrix(&self) -> Mat4 {
        Mat4::from_translation(self.center)
    }
}

/// Pinhole camera looking down its local -Z axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Camera {
    pub position: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    /// Vertical field of view in radians.
    pub fovy: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 0.0, 4.0),
            target: Vec3::ZERO,
            up: Vec3::Y,
            fovy: FRAC_PI_3,
        }
    }
}

impl Camera {
    pub fn new(position: Vec3, target: Vec3, up: Vec3) -> Self {
        Self {
            position,
            target,
            up,
            ..Default::default()
        }
    }

    /// Camera on a sphere around `target`.
    ///
    /// `yaw` rotates around +Y, `pitch` tilts towards +Y, both in degrees.
    pub fn orbit(target: Vec3, yaw: f32, pitch: f32, distance: f32) -> Self {
        let (yaw, pitch) = (yaw.to_radians(), pitch.clamp(-89.0, 89.0).to_radians());
        let dir = Vec3::new(yaw.sin() * pitch.cos(), pitch.sin(), yaw.cos() * pitch.cos());
        Self::new(target + dir * distance, target, Vec3::Y)
    }

    /// World → camera (view) transform.
    pub fn matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.target, self.up)
    }

    /// Inverse tangent of half the vertical field of view.
    pub fn itg_fovy(&self) -> f32 {
        1.0 / (self.fovy * 0.5).tan()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exhibit_for_grid() {
        let e = Exhibit::for_grid(UVec3::new(16, 8, 4));
        assert_eq!(e.center, Vec3::new(8.0, 4.0, 2.0));
        let origin = e.matrix().transform_point3(Vec3::ZERO);
        assert_eq!(origin, e.center);
    }

    #[test]
    fn test_orbit_distance() {
        let c = Camera::orbit(Vec3::ZERO, 30.0, 20.0, 5.0);
        assert!((c.position.length() - 5.0).abs() < 1e-4);
        let front = Camera::orbit(Vec3::ZERO, 0.0, 0.0, 3.0);
        assert!((front.position - Vec3::new(0.0, 0.0, 3.0)).length() < 1e-5);
    }

    #[test]
    fn test_view_matrix_maps_target_forward() {
        let c = Camera::default();
        let p = c.matrix().transform_point3(c.target);
        assert!(p.z < 0.0);
        assert!(p.x.abs() < 1e-5 && p.y.abs() < 1e-5);
    }

    #[test]
    fn test_itg_fovy() {
        let c = Camera::default();
        assert!((c.itg_fovy() - 1.0 / (std::f32::consts::PI / 6.0).tan()).abs() < 1e-5);
    }
}
