//! Pass descriptors: everything a backend entry point receives.
//!
//! Every backend entry point shares one canonical signature,
//! [`EntryPoint`]: a mutable pass descriptor plus the shader's constant
//! block as raw bytes. The descriptor names the pass, the target image and,
//! for ray emission, the view. The launch field carries the
//! backend-specific execution resources.

use std::fmt;

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, UVec2, Vec3};
use serde::{Deserialize, Serialize};

use super::gpu::GpuContext;

/// Execution target of a shader kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Row-interleaved fan-out over a worker pool.
    Cpu,
    /// One compute dispatch on the GPU device.
    Gpu,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Cpu => "cpu",
            Self::Gpu => "gpu",
        })
    }
}

/// Which half of a frame a pass performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShadingPass {
    /// Initialize per-pixel ray state from the camera.
    RayEmit,
    /// Advance existing per-pixel ray state.
    RayMarch,
}

impl fmt::Display for ShadingPass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::RayEmit => "ray-emit",
            Self::RayMarch => "ray-march",
        })
    }
}

/// Outcome reported by a backend entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShadingStatus {
    Ok,
    Err,
}

/// View parameters of a RayEmit pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewArgs {
    /// Camera space → object space (exhibit × inverse camera).
    pub trans: Mat4,
    /// Inverse tangent of half the vertical field of view.
    pub itg_fovy: f32,
    /// Camera origin in object space.
    pub ray_o: Vec3,
}

impl ViewArgs {
    /// Object-space ray through pixel `(x, y)`.
    ///
    /// Pixel coordinates are mapped so that the image's vertical extent spans
    /// `[-1, 1]`; row 0 is the top of the image.
    #[inline]
    pub fn ray(&self, x: u32, y: u32, resolution: UVec2) -> crate::util::Ray {
        let res = resolution.as_vec2();
        let cc = res * 0.5;
        let uv = (glam::Vec2::new(x as f32, y as f32) - cc) * 2.0 / res.y;
        let p = self.trans.transform_point3(Vec3::new(uv.x, -uv.y, -self.itg_fovy));
        crate::util::Ray::new(self.ray_o, (p - self.ray_o).normalize())
    }

    /// Uniform block layout shared with the WGSL prelude.
    pub fn to_uniform(&self) -> ViewUniform {
        ViewUniform {
            trans: self.trans.to_cols_array_2d(),
            ray_o: self.ray_o.to_array(),
            itg_fovy: self.itg_fovy,
        }
    }
}

/// `ViewArgs` as laid out in the GPU uniform buffer.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct ViewUniform {
    pub trans: [[f32; 4]; 4],
    pub ray_o: [f32; 3],
    pub itg_fovy: f32,
}

/// Storage a pass writes pixel state into.
pub enum ImageData<'a> {
    /// Host memory, one `pixel_size` record per pixel, row-major.
    Host(&'a mut [u8]),
    /// Device storage buffer with the same layout.
    Device(&'a wgpu::Buffer),
}

/// Target image of a pass.
pub struct ImageDesc<'a> {
    pub resolution: UVec2,
    pub pixel_size: usize,
    pub data: ImageData<'a>,
}

impl ImageDesc<'_> {
    /// Number of pixels.
    #[inline]
    pub fn pixel_count(&self) -> usize {
        self.resolution.x as usize * self.resolution.y as usize
    }
}

/// Execution resources for the selected backend.
pub enum Launch<'a> {
    Cpu(CpuLaunch),
    Gpu(GpuLaunch<'a>),
}

/// CPU worker pool sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuLaunch {
    pub nthreads: usize,
}

/// GPU dispatch geometry.
pub struct GpuLaunch<'a> {
    pub ctx: &'a GpuContext,
    /// Number of blocks along x and y.
    pub grid: [u32; 2],
    /// Pixels per block along x and y.
    pub block: [u32; 2],
}

/// Full description of one shading pass.
pub struct PassDesc<'a> {
    pub pass: ShadingPass,
    pub image: ImageDesc<'a>,
    /// Present for [`ShadingPass::RayEmit`] only.
    pub view: Option<ViewArgs>,
    pub launch: Launch<'a>,
}

/// Canonical backend entry point.
///
/// Executes the whole pass over the image; `constants` is the shader's
/// fixed-size constant block.
pub type EntryPoint = fn(&mut PassDesc<'_>, &[u8]) -> ShadingStatus;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_center_ray_points_at_target() {
        let view = ViewArgs {
            trans: Mat4::IDENTITY,
            itg_fovy: 1.0,
            ray_o: Vec3::ZERO,
        };
        let ray = view.ray(8, 8, UVec2::new(16, 16));
        assert!((ray.d - Vec3::NEG_Z).length() < 1e-5);
    }

    #[test]
    fn test_top_row_looks_up() {
        let view = ViewArgs {
            trans: Mat4::IDENTITY,
            itg_fovy: 1.0,
            ray_o: Vec3::ZERO,
        };
        let ray = view.ray(8, 0, UVec2::new(16, 16));
        assert!(ray.d.y > 0.0);
    }

    #[test]
    fn test_backend_serde_names() {
        let b: Backend = serde_json::from_str("\"gpu\"").unwrap();
        assert_eq!(b, Backend::Gpu);
        assert_eq!(serde_json::to_string(&Backend::Cpu).unwrap(), "\"cpu\"");
    }
}
