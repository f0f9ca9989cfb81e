//! Volume rendering on one rank.
//!
//! [`VolumeRankRenderer`] shades a rank's box with any registered shader:
//! one RayEmit pass followed by RayMarch passes until every ray has
//! finished or the pass budget is spent. [`FrameWriter`] is the matching
//! frame sink. Backend fallback lives here, outside the [`Raycaster`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use ::image::RgbaImage;

use crate::cluster::{FrameContext, FrameSink, RankRenderer};
use crate::core::{Camera, Exhibit, Image};
use crate::raycaster::Raycaster;
use crate::shader::{Backend, GpuContext, RayPixel, Shader, ShaderId};
use crate::util::{BoundingBox, Error, Result};

/// Open a device for `requested`, falling back to CPU when no GPU exists.
///
/// Other device failures are returned unchanged.
pub fn select_backend(requested: Backend) -> Result<(Backend, Option<Arc<GpuContext>>)> {
    match requested {
        Backend::Cpu => Ok((Backend::Cpu, None)),
        Backend::Gpu => match GpuContext::new() {
            Ok(ctx) => Ok((Backend::Gpu, Some(Arc::new(ctx)))),
            Err(Error::NoDevice) => {
                tracing::warn!("no GPU device found, falling back to CPU");
                Ok((Backend::Cpu, None))
            }
            Err(e) => Err(e),
        },
    }
}

/// Frame slot: pixel state plus its 8-bit rendition.
pub struct VolumeFrame<P: RayPixel> {
    pub pixels: Image<P>,
    pub rgba: RgbaImage,
}

impl<P: RayPixel> VolumeFrame<P> {
    /// Bring pixel state to the host and convert it.
    pub fn finish(&mut self) -> Result<&RgbaImage> {
        self.pixels.fetch()?;
        self.pixels.write_rgba(&mut self.rgba);
        Ok(&self.rgba)
    }
}

/// Shades a rank's partition with shader `S`.
pub struct VolumeRankRenderer<S: Shader> {
    raycaster: Arc<Raycaster>,
    exhibit: Exhibit,
    id: ShaderId,
    shader: S,
    backend: Backend,
    width: u32,
    height: u32,
    march_passes: u32,
}

impl<S: Shader> VolumeRankRenderer<S> {
    pub fn new(
        raycaster: Arc<Raycaster>,
        exhibit: Exhibit,
        id: ShaderId,
        shader: S,
        backend: Backend,
        width: u32,
        height: u32,
    ) -> Self {
        Self {
            raycaster,
            exhibit,
            id,
            shader,
            backend,
            width,
            height,
            march_passes: 16,
        }
    }

    /// Cap on RayMarch passes per frame.
    pub fn with_march_passes(mut self, passes: u32) -> Self {
        self.march_passes = passes;
        self
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    fn new_frame(&self) -> VolumeFrame<S::Pixel> {
        let pixels = match (self.backend, self.raycaster.gpu()) {
            (Backend::Gpu, Some(ctx)) => Image::with_device(self.width, self.height, Arc::clone(ctx)),
            _ => Image::new(self.width, self.height),
        };
        VolumeFrame {
            pixels,
            rgba: RgbaImage::new(self.width, self.height),
        }
    }

    /// Shade `bbox` as seen from `camera` into `frame`.
    fn shade(&self, frame: &mut VolumeFrame<S::Pixel>, camera: &Camera, bbox: BoundingBox) -> Result<()> {
        let mut shader = self.shader;
        shader.header_mut().set_bbox(bbox.to_box3());

        let rc = &self.raycaster;
        rc.cast_emit(&self.exhibit, camera, &mut frame.pixels, &self.id, &shader, self.backend)?;

        let mut passes = 0;
        while passes < self.march_passes {
            // Device state is only inspected at fetch time
            if self.backend == Backend::Cpu && frame.pixels.host().iter().all(|p| p.nsteps() <= 0) {
                break;
            }
            rc.cast_march(&mut frame.pixels, &self.id, &shader, self.backend)?;
            passes += 1;
        }
        tracing::trace!(passes, ?bbox, "volume: frame shaded");
        Ok(())
    }

    /// Render the whole volume once, on this process alone.
    pub fn render_offline(&self, camera: &Camera, volume: BoundingBox) -> Result<RgbaImage> {
        let mut frame = self.new_frame();
        self.shade(&mut frame, camera, volume)?;
        frame.finish()?;
        Ok(frame.rgba)
    }
}

impl<S: Shader> RankRenderer for VolumeRankRenderer<S> {
    type Frame = VolumeFrame<S::Pixel>;

    fn create_frame(&self) -> Result<Self::Frame> {
        Ok(self.new_frame())
    }

    fn render_frame(&mut self, frame: &mut Self::Frame, ctx: &FrameContext) -> Result<()> {
        self.shade(frame, &ctx.camera, ctx.bbox)
    }

    fn max_distance(&self) -> Option<f32> {
        let header = self.shader.header();
        Some(header.step * header.max_steps as f32)
    }
}

/// Logs frames per second once per second of wall time.
#[derive(Debug)]
pub struct FpsCounter {
    frames: u32,
    since: Instant,
}

impl Default for FpsCounter {
    fn default() -> Self {
        Self {
            frames: 0,
            since: Instant::now(),
        }
    }
}

impl FpsCounter {
    /// Count one frame; returns the rate when a second has elapsed.
    pub fn tick(&mut self) -> Option<f64> {
        self.frames += 1;
        let elapsed = self.since.elapsed();
        if elapsed.as_secs_f64() < 1.0 {
            return None;
        }
        let fps = self.frames as f64 / elapsed.as_secs_f64();
        self.frames = 0;
        self.since = Instant::now();
        Some(fps)
    }
}

/// Frame sink: counts frames, logs FPS and optionally writes PNGs.
pub struct FrameWriter {
    rank: usize,
    out_dir: Option<PathBuf>,
    fps: FpsCounter,
    written: u64,
}

impl FrameWriter {
    pub fn new(rank: usize) -> Self {
        Self {
            rank,
            out_dir: None,
            fps: FpsCounter::default(),
            written: 0,
        }
    }

    /// Write every frame as `rank{R}_frame{NNNN}.png` under `dir`.
    pub fn with_output(mut self, dir: impl Into<PathBuf>) -> Self {
        self.out_dir = Some(dir.into());
        self
    }

    /// Frames received so far.
    pub fn frames(&self) -> u64 {
        self.written
    }
}

impl<P: RayPixel> FrameSink<VolumeFrame<P>> for FrameWriter {
    fn on_frame(&mut self, frame: &mut VolumeFrame<P>, frame_idx: u64) -> Result<()> {
        let rgba = frame.finish()?;
        if let Some(dir) = &self.out_dir {
            let path = dir.join(format!("rank{}_frame{:04}.png", self.rank, frame_idx));
            rgba.save(&path)?;
        }
        self.written += 1;
        if let Some(fps) = self.fps.tick() {
            tracing::info!(rank = self.rank, "{fps:.1} fps");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader::builtin::{self, DensityShader};
    use crate::shader::ShaderRegistry;
    use glam::UVec3;

    fn renderer(dim: UVec3) -> VolumeRankRenderer<DensityShader> {
        let registry = Arc::new(ShaderRegistry::with_builtin().unwrap());
        let raycaster = Arc::new(Raycaster::new(registry).with_threads(2));
        VolumeRankRenderer::new(
            raycaster,
            Exhibit::for_grid(dim),
            ShaderId::from(builtin::DENSITY),
            DensityShader::new(dim).with_density(0.2),
            Backend::Cpu,
            32,
            32,
        )
    }

    #[test]
    fn test_select_cpu() {
        let (backend, ctx) = select_backend(Backend::Cpu).unwrap();
        assert_eq!(backend, Backend::Cpu);
        assert!(ctx.is_none());
    }

    #[test]
    fn test_offline_render_center_is_lit() {
        let dim = UVec3::splat(16);
        let r = renderer(dim);
        let camera = Camera::new(glam::Vec3::new(0.0, 0.0, 30.0), glam::Vec3::ZERO, glam::Vec3::Y);
        let img = r.render_offline(&camera, BoundingBox::from_dim(dim)).unwrap();
        assert_eq!(img.dimensions(), (32, 32));
        let center = img.get_pixel(16, 16).0;
        let corner = img.get_pixel(0, 0).0;
        assert!(center[2] > corner[2]);
        assert_eq!(corner, [0, 0, 0, 255]);
    }

    #[test]
    fn test_frame_writer_writes_png() {
        let dim = UVec3::splat(8);
        let r = renderer(dim);
        let dir = tempfile::tempdir().unwrap();
        let mut sink = FrameWriter::new(1).with_output(dir.path());
        let mut frame = r.create_frame().unwrap();
        sink.on_frame(&mut frame, 3).unwrap();
        assert!(dir.path().join("rank1_frame0003.png").exists());
        assert_eq!(sink.frames(), 1);
    }
}
