//! Compositing order of rank partitions.

use glam::Vec3;

use crate::util::Box3;

/// Camera distance to a partition, for ordering only.
///
/// Minimum distance from `pt` to the eight corners of `bbox` inset by half
/// a cell. This is not the true point-to-box distance when the nearest
/// feature is a face or edge.
pub fn dist_point_bbox(pt: Vec3, bbox: &Box3) -> f32 {
    let a = bbox.min + 0.5;
    let b = bbox.max - 0.5;
    [
        Vec3::new(a.x, a.y, a.z),
        Vec3::new(a.x, a.y, b.z),
        Vec3::new(a.x, b.y, a.z),
        Vec3::new(b.x, a.y, a.z),
        Vec3::new(a.x, b.y, b.z),
        Vec3::new(b.x, b.y, a.z),
        Vec3::new(b.x, a.y, b.z),
        Vec3::new(b.x, b.y, b.z),
    ]
    .into_iter()
    .map(|c| pt.distance(c))
    .fold(f32::INFINITY, f32::min)
}

/// Ranks sorted by ascending distance; equal distances keep rank order.
pub fn z_order(dist: &[f32]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..dist.len()).collect();
    order.sort_by(|&a, &b| dist[a].total_cmp(&dist[b]));
    order
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dist_uses_inset_corners() {
        let bbox = Box3::new(Vec3::ZERO, Vec3::splat(4.0));
        let d = dist_point_bbox(Vec3::new(-1.0, 0.5, 0.5), &bbox);
        assert!((d - 1.5).abs() < 1e-6);
    }

    #[test]
    fn test_face_is_not_nearest() {
        // nearest surface point is on a face 1 unit away; the heuristic
        // only sees corners
        let bbox = Box3::new(Vec3::ZERO, Vec3::splat(10.0));
        let d = dist_point_bbox(Vec3::new(5.0, 5.0, -1.0), &bbox);
        assert!(d > 1.0);
    }

    #[test]
    fn test_z_order() {
        assert_eq!(z_order(&[3.0, 1.0, 2.0, 1.0]), vec![1, 3, 2, 0]);
        assert!(z_order(&[]).is_empty());
    }
}
