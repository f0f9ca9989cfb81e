//! Culling contract between the frame loop and the shading setup.

use glam::Vec3;

use super::{Camera, Exhibit};
use crate::util::BoundingBox;

/// Restricts shading to a sub-box of the volume.
pub trait Culler {
    /// Bound culling to `bbox` (clamped to the volume).
    fn set_bbox(&mut self, bbox: BoundingBox);

    /// Current bound.
    fn bbox(&self) -> BoundingBox;

    /// Camera position in object space.
    fn camera_origin(&self, camera: &Camera) -> Vec3;

    /// Bound narrowed to what a shader marching at most `max_distance`
    /// from the camera can reach.
    fn effective_bbox(&self, camera: &Camera, max_distance: f32) -> BoundingBox {
        let o = self.camera_origin(camera);
        let reach = BoundingBox::new(
            (o - max_distance).floor().as_ivec3(),
            (o + max_distance).ceil().as_ivec3(),
        );
        self.bbox().intersection(&reach)
    }
}

/// Culler over an exhibit without occupancy data.
#[derive(Debug, Clone)]
pub struct ExhibitCuller {
    exhibit: Exhibit,
    volume: BoundingBox,
    bbox: BoundingBox,
}

impl ExhibitCuller {
    pub fn new(exhibit: Exhibit, volume: BoundingBox) -> Self {
        Self {
            exhibit,
            volume,
            bbox: volume,
        }
    }

    pub fn exhibit(&self) -> &Exhibit {
        &self.exhibit
    }
}

impl Culler for ExhibitCuller {
    fn set_bbox(&mut self, bbox: BoundingBox) {
        self.bbox = self.volume.intersection(&bbox);
    }

    fn bbox(&self) -> BoundingBox {
        self.bbox
    }

    fn camera_origin(&self, camera: &Camera) -> Vec3 {
        self.exhibit.matrix().transform_point3(camera.position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{IVec3, UVec3};

    fn culler() -> ExhibitCuller {
        let dim = UVec3::splat(16);
        ExhibitCuller::new(Exhibit::for_grid(dim), BoundingBox::from_dim(dim))
    }

    #[test]
    fn test_set_bbox_clamps_to_volume() {
        let mut c = culler();
        c.set_bbox(BoundingBox::new(IVec3::new(-4, 2, 8), IVec3::new(8, 30, 16)));
        assert_eq!(c.bbox(), BoundingBox::new(IVec3::new(0, 2, 8), IVec3::new(8, 16, 16)));
    }

    #[test]
    fn test_camera_origin_in_object_space() {
        let c = culler();
        let cam = Camera::default();
        assert_eq!(c.camera_origin(&cam), Vec3::new(8.0, 8.0, 12.0));
    }

    #[test]
    fn test_effective_bbox() {
        let c = culler();
        let cam = Camera::default();
        let b = c.effective_bbox(&cam, 6.0);
        assert_eq!(b.min, IVec3::new(2, 2, 6));
        assert_eq!(b.max, IVec3::new(14, 14, 16));
    }
}
