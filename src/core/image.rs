//! Pixel-state images with an optional device mirror.

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use glam::UVec2;

use crate::shader::{Backend, GpuContext, ImageData, ImageDesc, RayPixel};
use crate::util::{Error, Result};

/// Row-major image of `P` records.
///
/// The host copy is always present. When created with a [`GpuContext`] a
/// device buffer of the same layout mirrors it. Passes write the device
/// copy; [`fetch`](Self::fetch) brings it back to the host.
pub struct Image<P: Pod> {
    width: u32,
    height: u32,
    host: Vec<P>,
    device: Option<DeviceMirror>,
}

struct DeviceMirror {
    ctx: Arc<GpuContext>,
    buffer: wgpu::Buffer,
}

impl<P: Pod> Image<P> {
    /// Host-only image, zero-initialized.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            host: vec![P::zeroed(); width as usize * height as usize],
            device: None,
        }
    }

    /// Image with a device buffer on `ctx`.
    pub fn with_device(width: u32, height: u32, ctx: Arc<GpuContext>) -> Self {
        let mut image = Self::new(width, height);
        let buffer = ctx.create_pixel_buffer(image.byte_len() as u64);
        image.device = Some(DeviceMirror { ctx, buffer });
        image
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn resolution(&self) -> UVec2 {
        UVec2::new(self.width, self.height)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.host.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.host.is_empty()
    }

    fn byte_len(&self) -> usize {
        std::mem::size_of_val(self.host.as_slice())
    }

    /// Host pixel at `(x, y)`.
    #[inline]
    pub fn at(&self, x: u32, y: u32) -> &P {
        &self.host[y as usize * self.width as usize + x as usize]
    }

    #[inline]
    pub fn at_mut(&mut self, x: u32, y: u32) -> &mut P {
        &mut self.host[y as usize * self.width as usize + x as usize]
    }

    pub fn host(&self) -> &[P] {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut [P] {
        &mut self.host
    }

    pub fn has_device(&self) -> bool {
        self.device.is_some()
    }

    /// Copy the device buffer back into the host pixels. No-op without one.
    pub fn fetch(&mut self) -> Result<()> {
        let Some(dev) = &self.device else {
            return Ok(());
        };
        let bytes = dev.ctx.read_buffer(&dev.buffer, self.byte_len() as u64)?;
        bytemuck::cast_slice_mut::<P, u8>(&mut self.host).copy_from_slice(&bytes);
        Ok(())
    }

    /// Pass target for `backend`: host bytes for CPU, device buffer for GPU.
    pub fn desc(&mut self, backend: Backend) -> Result<ImageDesc<'_>> {
        let resolution = self.resolution();
        let pixel_size = std::mem::size_of::<P>();
        let data = match backend {
            Backend::Cpu => ImageData::Host(bytemuck::cast_slice_mut(&mut self.host)),
            Backend::Gpu => match &self.device {
                Some(dev) => ImageData::Device(&dev.buffer),
                None => return Err(Error::device("image has no device buffer")),
            },
        };
        Ok(ImageDesc {
            resolution,
            pixel_size,
            data,
        })
    }
}

impl<P: RayPixel> Image<P> {
    /// Host pixels as 8-bit RGBA.
    pub fn to_rgba(&self) -> ::image::RgbaImage {
        let mut out = ::image::RgbaImage::new(self.width, self.height);
        self.write_rgba(&mut out);
        out
    }

    /// Write host pixels into `out`, which must have the same size.
    pub fn write_rgba(&self, out: &mut ::image::RgbaImage) {
        for (px, dst) in self.host.iter().zip(out.pixels_mut()) {
            px.write_rgba(&mut dst.0);
        }
    }
}
