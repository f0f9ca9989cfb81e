//! Adaptive spatial partition of the volume across ranks.
//!
//! - [`DynKdTree`] - Balanced kd tree over rank indices whose split ratios
//!   follow measured per-rank render times

mod kd_tree;

pub use kd_tree::{DynKdTree, KdNode, RATIO_SPEED};
