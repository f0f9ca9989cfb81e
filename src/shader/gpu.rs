//! GPU backend: wgpu compute dispatch of the raycast kernels.
//!
//! Creates the device, keeps one compute pipeline per shader and pass, and
//! runs a pass as a single dispatch over 32×32-pixel blocks. Each dispatch
//! is waited on before returning so the CPU and GPU paths share the same
//! synchronous contract.
//!
//! ## Usage
//! ```ignore
//! let ctx = GpuContext::new()?;
//! let mut image = Image::<VolumePixel>::with_device(640, 480, Arc::new(ctx))?;
//! raycaster.cast_emit(&exhibit, &camera, &mut image, &id, &shader, Backend::Gpu)?;
//! image.fetch()?; // device → host
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use parking_lot::Mutex;
use wgpu::util::DeviceExt;

use super::{EntryPoint, GpuShader, ImageData, Launch, PassDesc, ShadingPass, ShadingStatus};
use crate::util::{Error, Result};

/// Shared raycast kernels, appended to every shader's WGSL.
const RAYCAST_WGSL: &str = include_str!("wgsl/raycast.wgsl");

/// Pixels per dispatch block along each axis (must match BLOCK_DIM in WGSL).
pub const BLOCK_DIM: u32 = 32;

/// Launch uniform matching the WGSL `LaunchArgs` struct.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct LaunchUniform {
    resolution: [u32; 2],
    pass_kind: u32,
    _pad: u32,
}

type PipelineKey = (&'static str, ShadingPass);

/// GPU device, queue and compiled raycast pipelines.
pub struct GpuContext {
    device: wgpu::Device,
    queue: wgpu::Queue,
    info: wgpu::AdapterInfo,
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    pipelines: Mutex<HashMap<PipelineKey, Arc<wgpu::ComputePipeline>>>,
}

impl GpuContext {
    /// Enumerate the default high-performance adapter and open a device.
    ///
    /// Fails with [`Error::NoDevice`] when no adapter is present.
    pub fn new() -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .map_err(|_| Error::NoDevice)?;

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("volcast device"),
            ..Default::default()
        }))
        .map_err(|e| Error::device(e.to_string()))?;

        let info = adapter.get_info();
        tracing::info!(name = %info.name, backend = ?info.backend, "gpu: device opened");

        let storage = |binding, read_only| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        let uniform = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("raycast_bind_group_layout"),
            entries: &[
                // @binding(0) view uniform
                uniform(0),
                // @binding(1) launch uniform
                uniform(1),
                // @binding(2) shader constants
                storage(2, true),
                // @binding(3) pixel state
                storage(3, false),
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("raycast_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        Ok(Self {
            device,
            queue,
            info,
            bind_group_layout,
            pipeline_layout,
            pipelines: Mutex::new(HashMap::new()),
        })
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Adapter name, for logs.
    pub fn adapter_name(&self) -> &str {
        &self.info.name
    }

    /// Allocate a zeroed pixel-state buffer of `size` bytes.
    pub fn create_pixel_buffer(&self, size: u64) -> wgpu::Buffer {
        self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("raycast_pixels"),
            size: size.max(wgpu::COPY_BUFFER_ALIGNMENT),
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    }

    /// Copy `size` bytes back from a device buffer, blocking until done.
    pub fn read_buffer(&self, buffer: &wgpu::Buffer, size: u64) -> Result<Vec<u8>> {
        if size == 0 {
            return Ok(Vec::new());
        }
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("raycast_readback"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("raycast_readback_encoder"),
        });
        encoder.copy_buffer_to_buffer(buffer, 0, &staging, 0, size);
        self.queue.submit(Some(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.wait()?;
        rx.recv()
            .map_err(|_| Error::device("readback callback dropped"))?
            .map_err(|e| Error::device(e.to_string()))?;

        let bytes = slice.get_mapped_range().to_vec();
        staging.unmap();
        Ok(bytes)
    }

    /// Block until all submitted work has completed.
    fn wait(&self) -> Result<()> {
        self.device
            .poll(wgpu::PollType::Wait {
                submission_index: None,
                timeout: None,
            })
            .map(|_| ())
            .map_err(|e| Error::device(e.to_string()))
    }

    /// Compiled pipeline for `label`/`pass`, built on first use.
    fn pipeline(
        &self,
        label: &'static str,
        snippet: &str,
        pass: ShadingPass,
    ) -> Result<Arc<wgpu::ComputePipeline>> {
        if let Some(p) = self.pipelines.lock().get(&(label, pass)) {
            return Ok(Arc::clone(p));
        }

        let source = format!("{snippet}\n{RAYCAST_WGSL}");
        let entry_point = match pass {
            ShadingPass::RayEmit => "ray_emit",
            ShadingPass::RayMarch => "ray_march",
        };

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });
        let pipeline = self.device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(label),
            layout: Some(&self.pipeline_layout),
            module: &module,
            entry_point: Some(entry_point),
            compilation_options: Default::default(),
            cache: None,
        });
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(Error::device(format!("pipeline '{label}' ({pass}): {err}")));
        }

        tracing::debug!(label, %pass, "gpu: pipeline compiled");
        let pipeline = Arc::new(pipeline);
        self.pipelines.lock().insert((label, pass), Arc::clone(&pipeline));
        Ok(pipeline)
    }

    /// Run one pass as a single dispatch and wait for it.
    fn dispatch(
        &self,
        label: &'static str,
        snippet: &str,
        desc: &PassDesc<'_>,
        constants: &[u8],
    ) -> Result<()> {
        let Launch::Gpu(launch) = &desc.launch else {
            return Err(Error::device("gpu entry point called with a cpu launch"));
        };
        let ImageData::Device(pixels) = &desc.image.data else {
            return Err(Error::device("gpu pass needs device-resident pixels"));
        };

        let pipeline = self.pipeline(label, snippet, desc.pass)?;

        let view = desc.view.map(|v| v.to_uniform()).unwrap_or_else(Zeroable::zeroed);
        let launch_args = LaunchUniform {
            resolution: desc.image.resolution.to_array(),
            pass_kind: desc.pass as u32,
            _pad: 0,
        };

        // Storage bindings must be a multiple of 16 bytes and never empty
        let mut blob = constants.to_vec();
        blob.resize(constants.len().next_multiple_of(16).max(16), 0);

        let view_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("raycast_view"),
            contents: bytemuck::bytes_of(&view),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let launch_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("raycast_launch"),
            contents: bytemuck::bytes_of(&launch_args),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let constants_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("raycast_constants"),
            contents: &blob,
            usage: wgpu::BufferUsages::STORAGE,
        });

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("raycast_bind_group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: view_buffer.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: launch_buffer.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 2, resource: constants_buffer.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 3, resource: pixels.as_entire_binding() },
            ],
        });

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("raycast_encoder"),
        });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("raycast_pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(launch.grid[0], launch.grid[1], 1);
        }
        self.queue.submit(Some(encoder.finish()));
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(Error::device(format!("dispatch '{label}': {err}")));
        }

        self.wait()
    }
}

/// GPU entry point for shader `S`.
pub fn gpu_entry<S: GpuShader>() -> EntryPoint {
    gpu_shade::<S>
}

fn gpu_shade<S: GpuShader>(desc: &mut PassDesc<'_>, constants: &[u8]) -> ShadingStatus {
    if constants.len() != std::mem::size_of::<S>()
        || desc.image.pixel_size != std::mem::size_of::<S::Pixel>()
    {
        tracing::warn!(shader = S::LABEL, "gpu: constant or pixel layout mismatch");
        return ShadingStatus::Err;
    }
    let ctx = match &desc.launch {
        Launch::Gpu(launch) => launch.ctx,
        Launch::Cpu(_) => return ShadingStatus::Err,
    };
    match ctx.dispatch(S::LABEL, S::WGSL, desc, constants) {
        Ok(()) => ShadingStatus::Ok,
        Err(e) => {
            tracing::error!(shader = S::LABEL, "gpu: {e}");
            ShadingStatus::Err
        }
    }
}
