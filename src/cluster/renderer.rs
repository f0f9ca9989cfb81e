//! Per-rank driver of the distributed frame protocol.

use std::cell::RefCell;
use std::time::Instant;

use glam::{UVec3, Vec3};

use super::{dist_point_bbox, z_order, Communicator, DoubleBuffering};
use crate::core::{Camera, Culler};
use crate::partition::DynKdTree;
use crate::util::{BoundingBox, Result};

/// Host of the frame loop: owns the stop decision and the camera.
pub trait RenderLoop {
    /// Checked on rank 0 at the top of each frame; the answer is broadcast.
    fn should_stop(&mut self) -> bool;

    /// Camera for the next frame.
    fn camera(&self) -> Camera;

    /// Called after frame `frame_idx` has been rendered and balanced.
    fn post_frame(&mut self, _frame_idx: u64) {}
}

/// Runs a fixed number of frames around an orbiting camera.
#[derive(Debug, Clone)]
pub struct FixedFrameLoop {
    frames: u64,
    next: u64,
    target: Vec3,
    up: Vec3,
    fovy: f32,
    distance: f32,
    yaw: f32,
    pitch: f32,
    degrees_per_frame: f32,
}

impl FixedFrameLoop {
    pub fn new(frames: u64, camera: &Camera) -> Self {
        let offset = camera.position - camera.target;
        let distance = offset.length();
        let (yaw, pitch) = if distance > 0.0 {
            let dir = offset / distance;
            (dir.x.atan2(dir.z).to_degrees(), dir.y.clamp(-1.0, 1.0).asin().to_degrees())
        } else {
            (0.0, 0.0)
        };
        Self {
            frames,
            next: 0,
            target: camera.target,
            up: camera.up,
            fovy: camera.fovy,
            distance,
            yaw,
            pitch,
            degrees_per_frame: 0.0,
        }
    }

    /// Rotate the camera around the target by `degrees` each frame.
    pub fn with_orbit(mut self, degrees: f32) -> Self {
        self.degrees_per_frame = degrees;
        self
    }
}

impl RenderLoop for FixedFrameLoop {
    fn should_stop(&mut self) -> bool {
        self.next >= self.frames
    }

    fn camera(&self) -> Camera {
        let yaw = self.yaw + self.degrees_per_frame * self.next as f32;
        let mut camera = Camera::orbit(self.target, yaw, self.pitch, self.distance);
        camera.up = self.up;
        camera.fovy = self.fovy;
        camera
    }

    fn post_frame(&mut self, frame_idx: u64) {
        self.next = frame_idx + 1;
    }
}

/// What one rank renders in one frame.
#[derive(Debug, Clone)]
pub struct FrameContext {
    pub frame_idx: u64,
    /// This rank's partition, narrowed by the culler to what the
    /// renderer's rays can reach.
    pub bbox: BoundingBox,
    /// Ranks sorted front to back from the camera.
    pub z_order: Vec<usize>,
    pub camera: Camera,
    /// Camera position in object space.
    pub camera_origin: Vec3,
    pub rank: usize,
    pub size: usize,
}

/// Renders one rank's share of a frame.
pub trait RankRenderer {
    type Frame: Send;

    /// Allocate a frame slot.
    fn create_frame(&self) -> Result<Self::Frame>;

    /// Render `ctx.bbox` into `frame`.
    fn render_frame(&mut self, frame: &mut Self::Frame, ctx: &FrameContext) -> Result<()>;

    /// Farthest object-space distance a ray can march from the camera.
    /// `None` renders the whole partition.
    fn max_distance(&self) -> Option<f32> {
        None
    }
}

/// Receives finished frames on the fetch thread.
pub trait FrameSink<F>: Send {
    fn on_frame(&mut self, frame: &mut F, frame_idx: u64) -> Result<()>;
}

/// Summary of a finished loop.
#[derive(Debug, Clone, Default)]
pub struct LoopStats {
    pub frames: u64,
    pub last_z_order: Vec<usize>,
    pub last_bbox: BoundingBox,
}

/// One rank's side of the distributed render loop.
pub struct DistributedRenderer<C: Communicator, K: Culler> {
    comm: C,
    tree: DynKdTree,
    culler: K,
}

impl<C: Communicator, K: Culler> DistributedRenderer<C, K> {
    /// Partition a grid of `dim` cells over the communicator's ranks.
    pub fn new(comm: C, dim: UVec3, culler: K) -> Result<Self> {
        let tree = DynKdTree::new(dim, comm.size())?;
        Ok(Self { comm, tree, culler })
    }

    pub fn comm(&self) -> &C {
        &self.comm
    }

    pub fn tree(&self) -> &DynKdTree {
        &self.tree
    }

    pub fn culler(&self) -> &K {
        &self.culler
    }

    /// Run frames until the host on rank 0 asks to stop.
    ///
    /// Every rank must call this with the same number of ranks alive; a
    /// missing rank fails the loop with a protocol error on all others.
    #[tracing::instrument(skip_all, fields(rank = self.comm.rank()))]
    pub fn run<L, R, S>(&mut self, host: &mut L, renderer: &mut R, sink: S) -> Result<LoopStats>
    where
        L: RenderLoop,
        R: RankRenderer,
        S: FrameSink<R::Frame>,
    {
        let dbuf = DoubleBuffering::from_fn(|| renderer.create_frame())?;

        let comm = &self.comm;
        let tree = &mut self.tree;
        let culler = &mut self.culler;
        let (rank, size) = (comm.rank(), comm.size());
        let host = RefCell::new(host);

        let mut dist = vec![0f32; size];
        let mut render_t = vec![0u64; size];
        let mut stats = LoopStats::default();
        let mut sink = sink;

        let frames = dbuf.run(
            || {
                let stop = rank == 0 && host.borrow_mut().should_stop();
                let mut buf = [u8::from(stop)];
                comm.broadcast_bytes(&mut buf, 0)?;
                Ok(buf[0] != 0)
            },
            |frame, frame_idx| {
                let camera = host.borrow().camera();

                let bbox = tree.search(rank);
                culler.set_bbox(bbox);
                let camera_origin = culler.camera_origin(&camera);
                dist[rank] = dist_point_bbox(camera_origin, &bbox.to_box3());
                comm.all_broadcast_f32(&mut dist)?;
                let order = z_order(&dist);

                let render_bbox = match renderer.max_distance() {
                    Some(reach) => culler.effective_bbox(&camera, reach),
                    None => culler.bbox(),
                };
                let ctx = FrameContext {
                    frame_idx,
                    bbox: render_bbox,
                    z_order: order,
                    camera,
                    camera_origin,
                    rank,
                    size,
                };
                let start = Instant::now();
                renderer.render_frame(frame, &ctx)?;
                render_t[rank] = u64::try_from(start.elapsed().as_nanos()).unwrap_or(u64::MAX);

                comm.all_broadcast_size(&mut render_t)?;
                tree.update_nanos(&render_t)?;
                tracing::debug!(frame_idx, ?bbox, render_ns = render_t[rank], "frame rendered");

                host.borrow_mut().post_frame(frame_idx);
                stats.last_z_order = ctx.z_order;
                stats.last_bbox = bbox;
                Ok(())
            },
            move |frame, frame_idx| sink.on_frame(frame, frame_idx),
        )?;

        stats.frames = frames;
        tracing::info!(frames, bbox = ?self.tree.search(rank), "render loop finished");
        Ok(stats)
    }
}
