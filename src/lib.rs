//! # Volcast
//!
//! Distributed volume raycasting with load-balanced spatial partitioning.
//!
//! A volume is split across a cluster of ranks by a kd tree whose split
//! ratios follow each rank's measured render time. Every rank shades its
//! box through a registry of shaders that run on either a CPU worker pool
//! or a GPU compute dispatch, inside a double-buffered frame loop.
//!
//! ## Modules
//!
//! - [`util`] - Basic types (boxes, rays, prefix sums, errors)
//! - [`core`] - Scene collaborators (exhibit, camera, culler) and images
//! - [`shader`] - Shader traits, CPU/GPU backends and the shader registry
//! - [`raycaster`] - One shading pass over an image
//! - [`partition`] - Adaptive kd tree partition
//! - [`cluster`] - Collectives, double buffering and the distributed loop
//! - [`render`] - Per-rank volume renderer and frame sink
//! - [`config`] - JSON render configuration
//!
//! ## Example
//!
//! ```ignore
//! use volcast::prelude::*;
//!
//! let registry = Arc::new(ShaderRegistry::with_builtin()?);
//! let raycaster = Raycaster::new(registry);
//! let dim = UVec3::splat(64);
//! let mut image = Image::<VolumePixel>::new(512, 512);
//! let shader = DensityShader::new(dim);
//! let id = ShaderId::from(builtin::DENSITY);
//!
//! raycaster.cast_emit(&Exhibit::for_grid(dim), &Camera::default(), &mut image, &id, &shader, Backend::Cpu)?;
//! raycaster.cast_march(&mut image, &id, &shader, Backend::Cpu)?;
//! ```

pub mod util;
pub mod core;
pub mod shader;
pub mod raycaster;
pub mod partition;
pub mod cluster;
pub mod render;
pub mod config;

// Re-export commonly used types
pub use util::{Error, ErrorKind, Result};
pub use raycaster::Raycaster;
pub use partition::DynKdTree;

/// Build date stamped by build.rs
pub const BUILD_DATE: &str = env!("VOLCAST_BUILD_DATE");

/// Prelude module for convenient imports
pub mod prelude {
    pub use std::sync::Arc;

    pub use crate::util::{BoundingBox, Error, Result, UVec2, UVec3, Vec3};
    pub use crate::core::{Camera, Culler, Exhibit, ExhibitCuller, Image};
    pub use crate::shader::builtin::{self, DensityShader, MipShader, MipPixel, VolumePixel};
    pub use crate::shader::{Backend, GpuContext, Shader, ShaderId, ShaderRegistry};
    pub use crate::raycaster::Raycaster;
    pub use crate::partition::DynKdTree;
    pub use crate::cluster::{Communicator, DistributedRenderer, LocalCluster};
    pub use crate::config::RenderConfig;
}
