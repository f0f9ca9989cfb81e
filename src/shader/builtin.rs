//! Built-in volume shaders.
//!
//! Both integrate a procedural radial field (1 at the grid center, falling
//! to 0 at the inscribed sphere) so the renderer works without a dataset.
//!
//! - `volume.density` - front-to-back emission/absorption, early exit once
//!   the accumulated opacity passes a threshold
//! - `volume.mip` - maximum intensity projection

use bytemuck::{Pod, Zeroable};
use glam::{UVec3, Vec3, Vec4};

use super::{GpuShader, RayPixel, Shader, ShaderHeader, ShaderRegistry};
use crate::util::{Box3, Ray, Result};

/// Identity of [`DensityShader`].
pub const DENSITY: &str = "volume.density";
/// Identity of [`MipShader`].
pub const MIP: &str = "volume.mip";

/// Register every built-in shader with both backends.
pub fn register_all(registry: &mut ShaderRegistry) -> Result<()> {
    registry
        .register(DENSITY, "Density integration")
        .cpu::<DensityShader>()
        .gpu::<DensityShader>()
        .finish()?;
    registry
        .register(MIP, "Maximum intensity projection")
        .cpu::<MipShader>()
        .gpu::<MipShader>()
        .finish()
}

/// Radial test field over a grid of `grid` cells.
#[inline]
fn sample_field(grid: Vec3, p: Vec3) -> f32 {
    let c = grid * 0.5;
    let r = c.min_element();
    (1.0 - (p - c).length() / r).clamp(0.0, 1.0)
}

#[inline]
fn to_u8(v: f32) -> u8 {
    (v * 255.0).clamp(0.0, 255.0) as u8
}

// ============================================================================
// volume.density
// ============================================================================

/// Constants of the density integrator (64 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct DensityShader {
    pub header: ShaderHeader,
    /// Grid extent in cells.
    pub grid: Vec3,
    /// Scale applied to every sample.
    pub density: f32,
    /// Accumulated alpha at which a ray terminates.
    pub opacity_threshold: f32,
    /// Samples taken per call of `main`.
    pub steps_per_pass: i32,
    _pad0: f32,
    _pad1: f32,
}

impl DensityShader {
    /// Shader over the full `grid`, one sample per cell.
    pub fn new(grid: UVec3) -> Self {
        let grid = grid.as_vec3();
        Self {
            header: ShaderHeader::new(Box3::new(Vec3::ZERO, grid), 1.0),
            grid,
            density: 0.05,
            opacity_threshold: 0.95,
            steps_per_pass: 64,
            _pad0: 0.0,
            _pad1: 0.0,
        }
    }

    pub fn with_density(mut self, density: f32) -> Self {
        self.density = density;
        self
    }
}

/// Pixel state of the density integrator (48 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct VolumePixel {
    /// Premultiplied accumulated color.
    pub color: Vec4,
    pub ray_o: Vec3,
    pub nsteps: i32,
    pub ray_d: Vec3,
    _pad: f32,
}

impl RayPixel for VolumePixel {
    fn ray(&self) -> Ray {
        Ray::new(self.ray_o, self.ray_d)
    }

    fn set_ray(&mut self, ray: Ray) {
        self.ray_o = ray.o;
        self.ray_d = ray.d;
    }

    fn nsteps(&self) -> i32 {
        self.nsteps
    }

    fn set_nsteps(&mut self, nsteps: i32) {
        self.nsteps = nsteps;
    }

    fn write_rgba(&self, dst: &mut [u8; 4]) {
        let c = self.color;
        *dst = [to_u8(c.x), to_u8(c.y), to_u8(c.z), 255];
    }
}

impl Shader for DensityShader {
    type Pixel = VolumePixel;

    fn header(&self) -> &ShaderHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut ShaderHeader {
        &mut self.header
    }

    fn main(&self, px: &mut VolumePixel) {
        let mut v = px.color;
        let mut p = px.ray_o;
        let d = px.ray_d * self.header.step;
        let n = px.nsteps.min(self.steps_per_pass);

        let mut i = 0;
        while i < n && v.w <= self.opacity_threshold {
            let val = sample_field(self.grid, p);
            let col = (p / self.grid).extend(1.0) * val * self.density;
            v += col * (1.0 - v.w);
            p += d;
            i += 1;
        }

        px.color = v;
        px.ray_o = p;
        px.nsteps -= i;
        if v.w > self.opacity_threshold {
            px.nsteps = 0;
        }
    }
}

impl GpuShader for DensityShader {
    const LABEL: &'static str = DENSITY;
    const WGSL: &'static str = include_str!("wgsl/density.wgsl");
}

// ============================================================================
// volume.mip
// ============================================================================

/// Constants of the maximum intensity projection (48 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct MipShader {
    pub header: ShaderHeader,
    pub grid: Vec3,
    pub steps_per_pass: i32,
}

impl MipShader {
    pub fn new(grid: UVec3) -> Self {
        let grid = grid.as_vec3();
        Self {
            header: ShaderHeader::new(Box3::new(Vec3::ZERO, grid), 1.0),
            grid,
            steps_per_pass: 64,
        }
    }
}

/// Pixel state of the MIP shader (32 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct MipPixel {
    pub ray_o: Vec3,
    pub nsteps: i32,
    pub ray_d: Vec3,
    pub max_value: f32,
}

impl RayPixel for MipPixel {
    fn ray(&self) -> Ray {
        Ray::new(self.ray_o, self.ray_d)
    }

    fn set_ray(&mut self, ray: Ray) {
        self.ray_o = ray.o;
        self.ray_d = ray.d;
    }

    fn nsteps(&self) -> i32 {
        self.nsteps
    }

    fn set_nsteps(&mut self, nsteps: i32) {
        self.nsteps = nsteps;
    }

    fn write_rgba(&self, dst: &mut [u8; 4]) {
        let g = to_u8(self.max_value);
        *dst = [g, g, g, 255];
    }
}

impl Shader for MipShader {
    type Pixel = MipPixel;

    fn header(&self) -> &ShaderHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut ShaderHeader {
        &mut self.header
    }

    fn main(&self, px: &mut MipPixel) {
        let mut m = px.max_value;
        let mut p = px.ray_o;
        let d = px.ray_d * self.header.step;
        let n = px.nsteps.min(self.steps_per_pass).max(0);
        for _ in 0..n {
            m = m.max(sample_field(self.grid, p));
            p += d;
        }
        px.max_value = m;
        px.ray_o = p;
        px.nsteps -= n;
    }
}

impl GpuShader for MipShader {
    const LABEL: &'static str = MIP;
    const WGSL: &'static str = include_str!("wgsl/mip.wgsl");
}
