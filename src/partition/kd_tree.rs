//! Dynamic kd tree for load balancing.
//!
//! The tree is built once for a fixed rank count by bisecting the rank range
//! `[0, N)` at its midpoint, cycling the split axis x → y → z with depth.
//! Leaves (single ranks) are not stored. Only node ratios change afterwards:
//! [`DynKdTree::update`] nudges each ratio so that the side that rendered
//! slower gives up territory.
//!
//! Child boxes are always clamped copies of their parent's box at the
//! node's cut, so the rank boxes tile the volume exactly.

use std::time::Duration;

use glam::UVec3;

use crate::util::{Axis, BoundingBox, Error, RangeSum, Result};

/// Damping of the ratio controller: fraction of the way to the balanced
/// ratio moved per update.
pub const RATIO_SPEED: f64 = 0.1;

/// Internal tree node. Children are arena indices; `None` is a leaf rank.
#[derive(Debug, Clone, PartialEq)]
pub struct KdNode {
    /// First rank of the right subtree.
    pub rank: usize,
    pub axis: Axis,
    /// Fraction of the parent box (along `axis`) given to the left subtree.
    pub ratio: f32,
    /// Integer cut coordinate derived from `ratio`.
    pub cut: i32,
    left: Option<usize>,
    right: Option<usize>,
}

impl KdNode {
    /// Recompute the cut for `parent` and return the two child boxes.
    fn split_box(&mut self, parent: &BoundingBox) -> (BoundingBox, BoundingBox) {
        let a = self.axis.index();
        let lo = parent.min[a] as f32;
        let hi = parent.max[a] as f32;
        self.cut = (lo * (1.0 - self.ratio) + hi * self.ratio).round() as i32;
        (
            parent.with_max(self.axis, self.cut),
            parent.with_min(self.axis, self.cut),
        )
    }
}

/// Balanced kd tree assigning one box of the grid to each rank.
#[derive(Debug, Clone)]
pub struct DynKdTree {
    bbox: BoundingBox,
    ranks: usize,
    nodes: Vec<KdNode>,
    root: Option<usize>,
}

impl DynKdTree {
    /// Tree over a grid of `dim` cells for `ranks` ranks, all ratios 0.5.
    pub fn new(dim: UVec3, ranks: usize) -> Result<Self> {
        if ranks == 0 {
            return Err(Error::InvalidRankCount(ranks));
        }
        let mut tree = Self {
            bbox: BoundingBox::from_dim(dim),
            ranks,
            nodes: Vec::with_capacity(ranks - 1),
            root: None,
        };
        tree.root = tree.split(tree.bbox, 0, ranks, Axis::X);
        Ok(tree)
    }

    fn split(&mut self, bbox: BoundingBox, low: usize, high: usize, axis: Axis) -> Option<usize> {
        if high - low <= 1 {
            return None;
        }
        let mut node = KdNode {
            rank: (low + high) / 2,
            axis,
            ratio: 0.5,
            cut: 0,
            left: None,
            right: None,
        };
        let (bbox_l, bbox_r) = node.split_box(&bbox);
        let rank = node.rank;
        let idx = self.nodes.len();
        self.nodes.push(node);

        let left = self.split(bbox_l, low, rank, axis.next());
        let right = self.split(bbox_r, rank, high, axis.next());
        self.nodes[idx].left = left;
        self.nodes[idx].right = right;
        Some(idx)
    }

    /// Box assigned to `rank`. Ranks outside `[0, N)` are clamped.
    pub fn search(&self, rank: usize) -> BoundingBox {
        let mut res = self.bbox;
        let mut cur = self.root;
        while let Some(idx) = cur {
            let node = &self.nodes[idx];
            if rank < node.rank {
                res = res.with_max(node.axis, node.cut);
                cur = node.left;
            } else {
                res = res.with_min(node.axis, node.cut);
                cur = node.right;
            }
        }
        res
    }

    /// Rebalance from the last frame's per-rank render times.
    ///
    /// `timings` must hold exactly one entry per rank. A node whose left or
    /// right side reports zero total time keeps its ratio for this call.
    pub fn update(&mut self, timings: &[Duration]) -> Result<()> {
        let nanos: Vec<u64> = timings
            .iter()
            .map(|t| u64::try_from(t.as_nanos()).unwrap_or(u64::MAX))
            .collect();
        self.update_nanos(&nanos)
    }

    /// [`update`](Self::update) with timings in nanoseconds.
    pub fn update_nanos(&mut self, timings: &[u64]) -> Result<()> {
        if timings.len() != self.ranks {
            return Err(Error::TimingLength {
                expected: self.ranks,
                got: timings.len(),
            });
        }
        let sum = RangeSum::new(timings);
        self.update_node(self.root, &sum, self.bbox, 0, self.ranks);
        Ok(())
    }

    fn update_node(
        &mut self,
        idx: Option<usize>,
        sum: &RangeSum,
        bbox: BoundingBox,
        low: usize,
        high: usize,
    ) {
        let Some(idx) = idx else {
            return;
        };
        let node = &mut self.nodes[idx];
        let l_t = sum.range_sum(low, node.rank);
        let r_t = sum.range_sum(node.rank, high);

        if l_t > 0 && r_t > 0 {
            let ratio = node.ratio as f64;
            let l = ratio / l_t as f64;
            let r = (1.0 - ratio) / r_t as f64;
            node.ratio = (RATIO_SPEED * l / (l + r) + (1.0 - RATIO_SPEED) * ratio) as f32;
        }
        tracing::trace!(rank = node.rank, axis = ?node.axis, ratio = node.ratio, "kd: node ratio");

        let (bbox_l, bbox_r) = node.split_box(&bbox);
        let (rank, left, right) = (node.rank, node.left, node.right);
        self.update_node(left, sum, bbox_l, low, rank);
        self.update_node(right, sum, bbox_r, rank, high);
    }

    /// Fraction of the volume `rank` owns under the continuous ratios.
    ///
    /// Unlike the integer box from [`search`](Self::search), this moves on
    /// every update, even when the change is below one cell.
    pub fn share(&self, rank: usize) -> f64 {
        let mut share = 1.0;
        let mut cur = self.root;
        while let Some(idx) = cur {
            let node = &self.nodes[idx];
            let ratio = node.ratio as f64;
            if rank < node.rank {
                share *= ratio;
                cur = node.left;
            } else {
                share *= 1.0 - ratio;
                cur = node.right;
            }
        }
        share
    }

    /// Ratio of every internal node, in pre-order.
    pub fn ratios(&self) -> Vec<f32> {
        self.nodes.iter().map(|n| n.ratio).collect()
    }

    /// Internal nodes in pre-order (root first).
    pub fn nodes(&self) -> &[KdNode] {
        &self.nodes
    }

    /// Box of every rank, indexed by rank.
    pub fn bounds(&self) -> Vec<BoundingBox> {
        (0..self.ranks).map(|r| self.search(r)).collect()
    }

    pub fn rank_count(&self) -> usize {
        self.ranks
    }

    /// The whole volume.
    pub fn bbox(&self) -> BoundingBox {
        self.bbox
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::IVec3;

    #[test]
    fn test_zero_ranks_rejected() {
        let err = DynKdTree::new(UVec3::splat(8), 0).unwrap_err();
        assert!(matches!(err, Error::InvalidRankCount(0)));
    }

    #[test]
    fn test_single_rank_owns_volume() {
        let tree = DynKdTree::new(UVec3::new(4, 5, 6), 1).unwrap();
        assert!(tree.nodes().is_empty());
        assert_eq!(tree.search(0), BoundingBox::from_dim(UVec3::new(4, 5, 6)));
        assert_eq!(tree.share(0), 1.0);
    }

    #[test]
    fn test_four_ranks_initial_layout() {
        let tree = DynKdTree::new(UVec3::splat(16), 4).unwrap();
        assert_eq!(tree.nodes().len(), 3);
        assert_eq!(tree.nodes()[0].axis, Axis::X);
        assert_eq!(tree.nodes()[1].axis, Axis::Y);

        let b = tree.bounds();
        assert_eq!(b[0], BoundingBox::new(IVec3::ZERO, IVec3::new(8, 8, 16)));
        assert_eq!(b[1], BoundingBox::new(IVec3::new(0, 8, 0), IVec3::new(8, 16, 16)));
        assert_eq!(b[2], BoundingBox::new(IVec3::new(8, 0, 0), IVec3::new(16, 8, 16)));
        assert_eq!(b[3], BoundingBox::new(IVec3::new(8, 8, 0), IVec3::new(16, 16, 16)));
    }

    #[test]
    fn test_three_ranks_split_at_midpoint() {
        // [0, 3) splits at rank 1: rank 0 alone on the left
        let tree = DynKdTree::new(UVec3::splat(16), 3).unwrap();
        assert_eq!(tree.nodes()[0].rank, 1);
        assert_eq!(tree.search(0).max.x, 8);
        assert_eq!(tree.search(1).max.y, 8);
        assert_eq!(tree.search(2).min.y, 8);
    }

    #[test]
    fn test_timing_length_checked() {
        let mut tree = DynKdTree::new(UVec3::splat(16), 4).unwrap();
        let err = tree.update_nanos(&[1, 2, 3]).unwrap_err();
        assert!(matches!(err, Error::TimingLength { expected: 4, got: 3 }));
    }

    #[test]
    fn test_zero_time_keeps_ratio() {
        let mut tree = DynKdTree::new(UVec3::splat(16), 2).unwrap();
        tree.update_nanos(&[0, 100]).unwrap();
        assert_eq!(tree.ratios(), vec![0.5]);
        tree.update_nanos(&[0, 0]).unwrap();
        assert_eq!(tree.ratios(), vec![0.5]);
    }

    #[test]
    fn test_slow_left_shrinks() {
        let mut tree = DynKdTree::new(UVec3::splat(16), 2).unwrap();
        tree.update(&[Duration::from_millis(20), Duration::from_millis(10)])
            .unwrap();
        // l = 0.5/20, r = 0.5/10 → target 1/3; 0.1 * 1/3 + 0.9 * 0.5
        let expected = 0.1 / 3.0 + 0.45;
        assert!((tree.ratios()[0] as f64 - expected).abs() < 1e-6);
        assert!(tree.share(0) < 0.5);
    }

    #[test]
    fn test_shares_sum_to_one() {
        let mut tree = DynKdTree::new(UVec3::splat(32), 7).unwrap();
        tree.update_nanos(&[7, 1, 3, 9, 2, 2, 5]).unwrap();
        let total: f64 = (0..7).map(|r| tree.share(r)).sum();
        assert!((total - 1.0).abs() < 1e-9);
    }
}
