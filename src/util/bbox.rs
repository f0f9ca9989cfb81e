//! Integer bounding boxes over grid cells.

use std::fmt;

use glam::{IVec3, UVec3};
use serde::{Deserialize, Serialize};

use super::math::Box3;

/// Split axis of a partition node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Axis {
    X = 0,
    Y = 1,
    Z = 2,
}

impl Axis {
    /// Axis used one tree level deeper (x → y → z → x).
    #[inline]
    pub fn next(self) -> Self {
        match self {
            Self::X => Self::Y,
            Self::Y => Self::Z,
            Self::Z => Self::X,
        }
    }

    /// Component index.
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Axis-aligned box in grid-cell units.
///
/// `min <= max` component-wise. A box may be flat (zero extent on an axis)
/// when there are more ranks than cells along that axis.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min: IVec3,
    pub max: IVec3,
}

impl BoundingBox {
    #[inline]
    pub const fn new(min: IVec3, max: IVec3) -> Self {
        Self { min, max }
    }

    /// Box spanning `[0, dim)` of a grid.
    #[inline]
    pub fn from_dim(dim: UVec3) -> Self {
        Self {
            min: IVec3::ZERO,
            max: dim.as_ivec3(),
        }
    }

    /// Extent along each axis.
    #[inline]
    pub fn extent(&self) -> IVec3 {
        self.max - self.min
    }

    /// Number of cells covered.
    #[inline]
    pub fn volume(&self) -> u64 {
        let e = self.extent().max(IVec3::ZERO).as_u64vec3();
        e.x * e.y * e.z
    }

    /// True when the box covers no cells.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.extent().cmple(IVec3::ZERO).any()
    }

    /// Overlap with another box (may be empty).
    pub fn intersection(&self, other: &Self) -> Self {
        let min = self.min.max(other.min);
        let max = self.max.min(other.max).max(min);
        Self { min, max }
    }

    /// True when `other` lies entirely inside `self`.
    pub fn contains_box(&self, other: &Self) -> bool {
        other.min.cmpge(self.min).all() && other.max.cmple(self.max).all()
    }

    /// Copy with the max corner clamped to `value` on `axis`.
    #[inline]
    pub fn with_max(mut self, axis: Axis, value: i32) -> Self {
        self.max[axis.index()] = value;
        self
    }

    /// Copy with the min corner clamped to `value` on `axis`.
    #[inline]
    pub fn with_min(mut self, axis: Axis, value: i32) -> Self {
        self.min[axis.index()] = value;
        self
    }

    /// Float box with the same corners.
    #[inline]
    pub fn to_box3(&self) -> Box3 {
        Box3::new(self.min.as_vec3(), self.max.as_vec3())
    }
}

impl fmt::Debug for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {}, {}]..[{}, {}, {}]",
            self.min.x, self.min.y, self.min.z, self.max.x, self.max.y, self.max.z
        )
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
