//! Utility types and functions for volcast.
//!
//! This module contains fundamental types used throughout the library:
//! - [`BoundingBox`] / [`Axis`] - Integer grid boxes
//! - [`RangeSum`] - Prefix sums over per-rank timings
//! - [`Error`] / [`Result`] - Error handling
//! - Math type re-exports from glam, plus [`Ray`] and [`Box3`]

mod bbox;
mod error;
mod math;
mod range_sum;

pub use bbox::*;
pub use error::*;
pub use math::*;
pub use range_sum::*;
