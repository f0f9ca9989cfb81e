//! Core layer - scene collaborators and frame storage.
//!
//! This module provides:
//! - [`Exhibit`] / [`Camera`] - Placement of the volume and the viewer
//! - [`Image`] - Per-pixel shading state, host and device resident
//! - [`Culler`] / [`ExhibitCuller`] - Restricting shading to a rank's box

mod cull;
mod image;
mod scene;

pub use cull::{Culler, ExhibitCuller};
pub use image::Image;
pub use scene::{Camera, Exhibit};
