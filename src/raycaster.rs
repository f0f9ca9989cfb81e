//! Single-pass raycast orchestration.
//!
//! The [`Raycaster`] builds a [`PassDesc`] for one pass, resolves the entry
//! point from the shader registry once per call, and runs it. Both backends
//! return only after the whole image has been processed.
//!
//! ## Example
//! ```ignore
//! let registry = Arc::new(ShaderRegistry::with_builtin()?);
//! let raycaster = Raycaster::new(registry);
//! let id = ShaderId::from(builtin::DENSITY);
//! let shader = DensityShader::new(dim);
//! let mut image = Image::<VolumePixel>::new(640, 480);
//!
//! raycaster.cast_emit(&exhibit, &camera, &mut image, &id, &shader, Backend::Cpu)?;
//! raycaster.cast_march(&mut image, &id, &shader, Backend::Cpu)?;
//! ```

use std::sync::Arc;

use bytemuck::Pod;
use glam::UVec2;

use crate::core::{Camera, Exhibit, Image};
use crate::shader::{
    Backend, CpuLaunch, GpuContext, GpuLaunch, Launch, PassDesc, ShaderId, ShaderRegistry,
    ShadingPass, ShadingStatus, ViewArgs, BLOCK_DIM,
};
use crate::util::{round_up_div, Error, Result};

/// Number of 32×32 blocks covering `resolution`.
#[inline]
pub fn launch_grid(resolution: UVec2) -> [u32; 2] {
    [
        round_up_div(resolution.x, BLOCK_DIM),
        round_up_div(resolution.y, BLOCK_DIM),
    ]
}

/// Hardware concurrency, at least 1.
pub fn hardware_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Drives shading passes through the registry.
pub struct Raycaster {
    registry: Arc<ShaderRegistry>,
    gpu: Option<Arc<GpuContext>>,
    nthreads: usize,
}

impl Raycaster {
    /// CPU-only raycaster using every hardware thread.
    pub fn new(registry: Arc<ShaderRegistry>) -> Self {
        Self {
            registry,
            gpu: None,
            nthreads: hardware_threads(),
        }
    }

    /// Enable the GPU backend on `ctx`.
    pub fn with_gpu(mut self, ctx: Arc<GpuContext>) -> Self {
        self.gpu = Some(ctx);
        self
    }

    /// Override the CPU worker count; `0` means hardware concurrency.
    pub fn with_threads(mut self, nthreads: usize) -> Self {
        self.nthreads = if nthreads == 0 { hardware_threads() } else { nthreads };
        self
    }

    pub fn registry(&self) -> &ShaderRegistry {
        &self.registry
    }

    pub fn gpu(&self) -> Option<&Arc<GpuContext>> {
        self.gpu.as_ref()
    }

    pub fn threads(&self) -> usize {
        self.nthreads
    }

    /// View arguments of a RayEmit pass.
    pub fn view_args(exhibit: &Exhibit, camera: &Camera) -> ViewArgs {
        let et = exhibit.matrix();
        ViewArgs {
            trans: et * camera.matrix().inverse(),
            itg_fovy: camera.itg_fovy(),
            ray_o: et.transform_point3(camera.position),
        }
    }

    /// Initialize every pixel's ray state from `camera`.
    ///
    /// Pixels whose ray misses the shader's box end with `nsteps == 0`.
    #[tracing::instrument(skip_all, fields(shader = %id, %backend))]
    pub fn cast_emit<C: Pod, P: Pod>(
        &self,
        exhibit: &Exhibit,
        camera: &Camera,
        image: &mut Image<P>,
        id: &ShaderId,
        constants: &C,
        backend: Backend,
    ) -> Result<()> {
        let view = Self::view_args(exhibit, camera);
        self.dispatch(ShadingPass::RayEmit, Some(view), image, id, constants, backend)
    }

    /// Advance the ray state already stored in `image`.
    #[tracing::instrument(skip_all, fields(shader = %id, %backend))]
    pub fn cast_march<C: Pod, P: Pod>(
        &self,
        image: &mut Image<P>,
        id: &ShaderId,
        constants: &C,
        backend: Backend,
    ) -> Result<()> {
        self.dispatch(ShadingPass::RayMarch, None, image, id, constants, backend)
    }

    fn launch(&self, backend: Backend, resolution: UVec2) -> Result<Launch<'_>> {
        match backend {
            Backend::Cpu => Ok(Launch::Cpu(CpuLaunch {
                nthreads: self.nthreads,
            })),
            Backend::Gpu => {
                let ctx = self.gpu.as_deref().ok_or(Error::NoDevice)?;
                Ok(Launch::Gpu(GpuLaunch {
                    ctx,
                    grid: launch_grid(resolution),
                    block: [BLOCK_DIM, BLOCK_DIM],
                }))
            }
        }
    }

    fn dispatch<C: Pod, P: Pod>(
        &self,
        pass: ShadingPass,
        view: Option<ViewArgs>,
        image: &mut Image<P>,
        id: &ShaderId,
        constants: &C,
        backend: Backend,
    ) -> Result<()> {
        let entry = self.registry.resolve(id, backend)?;
        let launch = self.launch(backend, image.resolution())?;
        let mut desc = PassDesc {
            pass,
            image: image.desc(backend)?,
            view,
            launch,
        };

        match entry(&mut desc, bytemuck::bytes_of(constants)) {
            ShadingStatus::Ok => Ok(()),
            ShadingStatus::Err => Err(Error::ShadingFailed {
                shader: id.to_string(),
                pass,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{UVec3, Vec3};

    #[test]
    fn test_launch_grid_covers_image() {
        assert_eq!(launch_grid(UVec2::new(640, 480)), [20, 15]);
        assert_eq!(launch_grid(UVec2::new(33, 1)), [2, 1]);
        assert_eq!(launch_grid(UVec2::new(0, 0)), [0, 0]);
    }

    #[test]
    fn test_view_args_origin_in_object_space() {
        let exhibit = Exhibit::for_grid(UVec3::splat(16));
        let camera = Camera::default();
        let view = Raycaster::view_args(&exhibit, &camera);
        assert!((view.ray_o - Vec3::new(8.0, 8.0, 12.0)).length() < 1e-5);
        // the camera's own origin maps to the object-space eye
        let eye = view.trans.transform_point3(Vec3::ZERO);
        assert!((eye - view.ray_o).length() < 1e-4);
    }

    #[test]
    fn test_with_threads_zero_means_hardware() {
        let r = Raycaster::new(Arc::new(ShaderRegistry::new())).with_threads(0);
        assert_eq!(r.threads(), hardware_threads());
        let r = r.with_threads(3);
        assert_eq!(r.threads(), 3);
    }
}
