//! Shader backends and the registry that binds them.
//!
//! A shader is a `Pod` constant block plus a per-pixel `main` function. The
//! registry stores, per shader identity, one monomorphized [`EntryPoint`]
//! for each backend it supports, so callers can dispatch any registered
//! shader without knowing its concrete type.
//!
//! ## Architecture
//! ```text
//! Shader type ──cpu_entry::<S>()──┐
//!             ──gpu_entry::<S>()──┤→ ShaderRegistry ──resolve(id, backend)──→ Raycaster
//! ```

pub mod builtin;
mod cpu;
mod gpu;
mod pass;
mod registry;

pub use cpu::{cpu_entry, dispatch_rows};
pub use gpu::{gpu_entry, GpuContext, BLOCK_DIM};
pub use pass::*;
pub use registry::{ShaderId, ShaderMeta, ShaderRegistrar, ShaderRegistry};

use bytemuck::{Pod, Zeroable};
use glam::Vec3;

use crate::util::{Box3, Ray};

/// Default cap on march steps per ray.
pub const DEFAULT_MAX_STEPS: i32 = 500;

/// Common prefix of every shader's constant block.
///
/// Laid out to match the WGSL `ShaderHeader` struct (32 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ShaderHeader {
    pub bbox_min: Vec3,
    /// Object-space distance between samples.
    pub step: f32,
    pub bbox_max: Vec3,
    pub max_steps: i32,
}

impl ShaderHeader {
    pub fn new(bbox: Box3, step: f32) -> Self {
        Self {
            bbox_min: bbox.min,
            step,
            bbox_max: bbox.max,
            max_steps: DEFAULT_MAX_STEPS,
        }
    }

    #[inline]
    pub fn bbox(&self) -> Box3 {
        Box3::new(self.bbox_min, self.bbox_max)
    }

    #[inline]
    pub fn set_bbox(&mut self, bbox: Box3) {
        self.bbox_min = bbox.min;
        self.bbox_max = bbox.max;
    }
}

/// Per-pixel ray state carried between passes.
pub trait RayPixel: Pod + Send + Sync {
    fn ray(&self) -> Ray;
    fn set_ray(&mut self, ray: Ray);
    /// Remaining march budget; `0` marks a finished or missed pixel.
    fn nsteps(&self) -> i32;
    fn set_nsteps(&mut self, nsteps: i32);

    /// Final color of the pixel.
    fn write_rgba(&self, dst: &mut [u8; 4]) {
        *dst = [0, 0, 0, 255];
    }
}

/// A shading kernel.
///
/// Implementors are plain-data constant blocks whose first field is a
/// [`ShaderHeader`]; they are copied byte-wise to whichever backend runs.
pub trait Shader: Pod + Send + Sync {
    type Pixel: RayPixel;

    fn header(&self) -> &ShaderHeader;
    fn header_mut(&mut self) -> &mut ShaderHeader;

    /// Advance one pixel. Called once after emission for pixels that hit the
    /// bounding box, then once per march pass while `nsteps > 0`.
    fn main(&self, pixel: &mut Self::Pixel);
}

/// A shader with a WGSL implementation.
///
/// `WGSL` must define `struct Shader` (leading field `header: ShaderHeader`),
/// `struct Pixel`, `pixel_nsteps`, `pixel_set_nsteps`, `pixel_set_ray` and
/// `shader_main`, all layout-compatible with the Rust types. The shared
/// raycast prelude is appended when the pipeline is built.
pub trait GpuShader: Shader {
    const LABEL: &'static str;
    const WGSL: &'static str;
}

/// Initialize a pixel from a primary ray (RayEmit semantics).
#[inline]
pub fn emit_pixel<S: Shader>(shader: &S, mut ray: Ray, out: &mut S::Pixel) {
    let mut pixel = S::Pixel::zeroed();
    let header = shader.header();
    match ray.intersect(&header.bbox()) {
        Some((tnear, tfar)) if tfar > 0.0 => {
            let tnear = tnear.max(0.0);
            ray.o = ray.at(tnear);
            let nsteps = ((tfar - tnear) / header.step) as i32;
            pixel.set_ray(ray);
            pixel.set_nsteps(nsteps.min(header.max_steps));
            shader.main(&mut pixel);
        }
        _ => {
            pixel.set_ray(ray);
            pixel.set_nsteps(0);
        }
    }
    *out = pixel;
}

/// Advance a pixel (RayMarch semantics). Finished pixels are skipped.
#[inline]
pub fn march_pixel<S: Shader>(shader: &S, pixel: &mut S::Pixel) {
    if pixel.nsteps() <= 0 {
        return;
    }
    let mut reg = *pixel;
    shader.main(&mut reg);
    *pixel = reg;
}
