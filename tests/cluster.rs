//! In-process cluster: collectives, double buffering and the frame loop.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::channel;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use volcast::cluster::{
    dist_point_bbox, z_order, Communicator, DistributedRenderer, DoubleBuffering, FixedFrameLoop,
    FrameContext, FrameSink, LocalCluster, LocalComm, LoopStats, RankRenderer, RenderLoop,
};
use volcast::core::{Camera, Culler, Exhibit, ExhibitCuller};
use volcast::render::{FrameWriter, VolumeRankRenderer};
use volcast::shader::builtin::{self, DensityShader};
use volcast::shader::{Backend, ShaderId, ShaderRegistry};
use volcast::util::{BoundingBox, Error, ErrorKind, IVec3, UVec3, Vec3};
use volcast::Raycaster;

const TIMEOUT: Duration = Duration::from_secs(10);

/// Run `f` on every rank in its own thread and collect the results in rank order.
fn on_ranks<T, F>(comms: Vec<LocalComm>, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(LocalComm) -> T + Sync,
{
    let f = &f;
    thread::scope(|s| {
        let handles: Vec<_> = comms.into_iter().map(|c| s.spawn(move || f(c))).collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    })
}

#[test]
fn test_all_broadcast_and_barrier() {
    let comms = LocalCluster::new(4, TIMEOUT).unwrap();
    let results = on_ranks(comms, |comm| {
        let mut seen = Vec::new();
        for round in 0..20u64 {
            let mut dist = vec![0f32; comm.size()];
            dist[comm.rank()] = comm.rank() as f32 * 1.5 + round as f32;
            comm.all_broadcast_f32(&mut dist).unwrap();

            let mut times = vec![0u64; comm.size()];
            times[comm.rank()] = 1000 * comm.rank() as u64 + round;
            comm.all_broadcast_size(&mut times).unwrap();
            seen.push((dist, times));
        }
        seen
    });

    for (round, expected) in results[0].iter().enumerate() {
        let r = round as f32;
        assert_eq!(expected.0, vec![r, 1.5 + r, 3.0 + r, 4.5 + r]);
        for other in &results[1..] {
            assert_eq!(&other[round], expected);
        }
    }
}

#[test]
fn test_departed_rank_fails_collectives() {
    let mut comms = LocalCluster::new(2, TIMEOUT).unwrap();
    drop(comms.pop());
    let err = comms[0].barrier().unwrap_err();
    assert!(matches!(err, Error::Protocol(_)));
    assert_eq!(err.kind(), ErrorKind::Protocol);
}

#[test]
fn test_timeout_poisons_every_rank() {
    let comms = LocalCluster::new(2, Duration::from_millis(50)).unwrap();
    // rank 1 never posts
    let mut v = 0f32;
    let err = comms[0].broadcast_f32(&mut v, 1).unwrap_err();
    assert!(err.to_string().contains("timed out"));
    // rank 1 sees the same failure at its next collective
    assert!(matches!(comms[1].barrier(), Err(Error::Protocol(_))));
}

#[test]
fn test_payload_size_mismatch() {
    let comms = LocalCluster::new(2, TIMEOUT).unwrap();
    let mut big = [1u8; 8];
    comms[0].broadcast_bytes(&mut big, 0).unwrap();
    let mut small = [0u8; 4];
    assert!(matches!(comms[1].broadcast_bytes(&mut small, 0), Err(Error::Protocol(_))));
}

#[test]
fn test_double_buffer_overlaps_fetch_with_render() {
    let (started_tx, started_rx) = channel::<u64>();
    let fetch_done = Arc::new(AtomicBool::new(false));
    let in_flight = AtomicUsize::new(0);
    let max_in_flight = AtomicUsize::new(0);
    let mut overlapped = false;
    let mut frames_left = 6;

    let done = Arc::clone(&fetch_done);
    let in_flight_ref = &in_flight;
    let frames = DoubleBuffering::new(0u64, 0u64)
        .run(
            || {
                frames_left -= 1;
                Ok(frames_left < 0)
            },
            |slot, idx| {
                let n = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                max_in_flight.fetch_max(n, Ordering::SeqCst);
                if idx == 1 {
                    // frame 0 is being fetched while frame 1 renders
                    let first = started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
                    assert_eq!(first, 0);
                    overlapped = !fetch_done.load(Ordering::SeqCst);
                }
                *slot = idx;
                Ok(())
            },
            move |slot, idx| {
                let _ = started_tx.send(idx);
                if idx == 0 {
                    thread::sleep(Duration::from_millis(200));
                    done.store(true, Ordering::SeqCst);
                }
                assert_eq!(*slot, idx);
                in_flight_ref.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            },
        )
        .unwrap();

    assert_eq!(frames, 6);
    assert!(overlapped, "frame 1 waited for frame 0's fetch");
    assert!(max_in_flight.load(Ordering::SeqCst) <= 2);
    assert_eq!(in_flight.load(Ordering::SeqCst), 0);
}

/// Sleeps in proportion to its box, `cost` nanoseconds per cell.
struct SleepRenderer {
    cost: u64,
}

impl RankRenderer for SleepRenderer {
    type Frame = Vec<usize>;

    fn create_frame(&self) -> volcast::Result<Self::Frame> {
        Ok(Vec::new())
    }

    fn render_frame(&mut self, frame: &mut Self::Frame, ctx: &FrameContext) -> volcast::Result<()> {
        thread::sleep(Duration::from_nanos(ctx.bbox.volume() * self.cost));
        frame.clone_from(&ctx.z_order);
        Ok(())
    }
}

/// Counts frames and checks every frame carries a full z-order.
struct CountSink {
    ranks: usize,
    frames: Arc<AtomicUsize>,
}

impl FrameSink<Vec<usize>> for CountSink {
    fn on_frame(&mut self, frame: &mut Vec<usize>, _idx: u64) -> volcast::Result<()> {
        let mut sorted = frame.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..self.ranks).collect::<Vec<_>>());
        self.frames.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn run_sleep_cluster(
    ranks: usize,
    frames_per_rank: impl Fn(usize) -> u64 + Sync,
) -> Vec<(LoopStats, Vec<f32>, usize)> {
    let dim = UVec3::splat(16);
    let comms = LocalCluster::new(ranks, TIMEOUT).unwrap();
    let camera = Camera::default();
    on_ranks(comms, |comm| {
        let rank = comm.rank();
        let culler = ExhibitCuller::new(Exhibit::for_grid(dim), BoundingBox::from_dim(dim));
        let mut node = DistributedRenderer::new(comm, dim, culler).unwrap();
        let mut host = FixedFrameLoop::new(frames_per_rank(rank), &camera).with_orbit(5.0);
        // rank 0 is three times as expensive per cell
        let mut renderer = SleepRenderer {
            cost: if rank == 0 { 6_000 } else { 2_000 },
        };
        let fetched = Arc::new(AtomicUsize::new(0));
        let sink = CountSink {
            ranks,
            frames: Arc::clone(&fetched),
        };
        let stats = node.run(&mut host, &mut renderer, sink).unwrap();
        (stats, node.tree().ratios(), fetched.load(Ordering::SeqCst))
    })
}

#[test]
fn test_slow_rank_loses_territory() {
    let results = run_sleep_cluster(4, |_| 30);

    let (stats0, ratios0, _) = &results[0];
    for (stats, ratios, fetched) in &results {
        assert_eq!(stats.frames, 30);
        assert_eq!(*fetched, 30);
        assert_eq!(ratios, ratios0, "ranks disagree on the tree");
        assert_eq!(stats.last_z_order, stats0.last_z_order);
    }

    let volumes: Vec<u64> = results.iter().map(|(s, _, _)| s.last_bbox.volume()).collect();
    assert_eq!(volumes.iter().sum::<u64>(), 16 * 16 * 16);
    // rank 0 shares the root's left branch with rank 1
    assert!(volumes[0] < volumes[1], "volumes {volumes:?}");
    assert!(volumes[0] < 1024, "volumes {volumes:?}");

    // the last frame's order sorts the ranks' boxes front to back
    let dim = UVec3::splat(16);
    let mut host = FixedFrameLoop::new(30, &Camera::default()).with_orbit(5.0);
    host.post_frame(28);
    let culler = ExhibitCuller::new(Exhibit::for_grid(dim), BoundingBox::from_dim(dim));
    let origin = culler.camera_origin(&host.camera());
    let dist: Vec<f32> = results
        .iter()
        .map(|(s, _, _)| dist_point_bbox(origin, &s.last_bbox.to_box3()))
        .collect();
    assert_eq!(stats0.last_z_order, z_order(&dist));
    for pair in stats0.last_z_order.windows(2) {
        assert!(dist[pair[0]] <= dist[pair[1]], "order {:?} dist {dist:?}", stats0.last_z_order);
    }
}

#[test]
fn test_orbit_keeps_lens_and_up() {
    let mut camera = Camera::new(Vec3::new(0.0, 0.0, 30.0), Vec3::ZERO, Vec3::X);
    camera.fovy = 0.3;
    let mut host = FixedFrameLoop::new(4, &camera).with_orbit(10.0);
    for frame in 0..3 {
        let c = host.camera();
        assert_eq!(c.fovy, 0.3);
        assert_eq!(c.up, Vec3::X);
        assert_eq!(c.itg_fovy(), camera.itg_fovy());
        host.post_frame(frame);
    }
}

/// Records the box it is asked to render and marches at most `reach`.
struct ReachRenderer {
    reach: f32,
    seen: Vec<BoundingBox>,
}

impl RankRenderer for ReachRenderer {
    type Frame = ();

    fn create_frame(&self) -> volcast::Result<()> {
        Ok(())
    }

    fn render_frame(&mut self, _frame: &mut (), ctx: &FrameContext) -> volcast::Result<()> {
        self.seen.push(ctx.bbox);
        Ok(())
    }

    fn max_distance(&self) -> Option<f32> {
        Some(self.reach)
    }
}

struct NullSink;

impl FrameSink<()> for NullSink {
    fn on_frame(&mut self, _frame: &mut (), _idx: u64) -> volcast::Result<()> {
        Ok(())
    }
}

#[test]
fn test_render_box_limited_to_reach() {
    let dim = UVec3::splat(16);
    let comm = LocalCluster::new(1, TIMEOUT).unwrap().pop().unwrap();
    let culler = ExhibitCuller::new(Exhibit::for_grid(dim), BoundingBox::from_dim(dim));
    let mut node = DistributedRenderer::new(comm, dim, culler).unwrap();
    // object-space eye at (8, 8, 12)
    let mut host = FixedFrameLoop::new(2, &Camera::default());
    let mut renderer = ReachRenderer {
        reach: 6.0,
        seen: Vec::new(),
    };
    let stats = node.run(&mut host, &mut renderer, NullSink).unwrap();

    assert_eq!(stats.frames, 2);
    assert_eq!(stats.last_bbox, BoundingBox::from_dim(dim));
    let expected = BoundingBox::new(IVec3::new(2, 2, 6), IVec3::new(14, 14, 16));
    assert_eq!(renderer.seen, vec![expected; 2]);
}

#[test]
fn test_rank_zero_decides_when_to_stop() {
    let results = run_sleep_cluster(3, |rank| if rank == 0 { 5 } else { 1000 });
    for (stats, _, fetched) in &results {
        assert_eq!(stats.frames, 5);
        assert_eq!(*fetched, 5);
    }
}

#[test]
fn test_volume_cluster_writes_frames() {
    let dim = UVec3::splat(8);
    let dir = tempfile::tempdir().unwrap();
    let registry = Arc::new(ShaderRegistry::with_builtin().unwrap());
    let raycaster = Arc::new(Raycaster::new(registry).with_threads(2));
    let comms = LocalCluster::new(2, TIMEOUT).unwrap();
    let camera = Camera::new(Vec3::new(0.0, 0.0, 20.0), Vec3::ZERO, Vec3::Y);
    let written = Mutex::new(Vec::new());

    on_ranks(comms, |comm| {
        let rank = comm.rank();
        let exhibit = Exhibit::for_grid(dim);
        let culler = ExhibitCuller::new(exhibit, BoundingBox::from_dim(dim));
        let mut node = DistributedRenderer::new(comm, dim, culler).unwrap();
        let mut host = FixedFrameLoop::new(3, &camera);
        let mut renderer = VolumeRankRenderer::new(
            Arc::clone(&raycaster),
            exhibit,
            ShaderId::from(builtin::DENSITY),
            DensityShader::new(dim),
            Backend::Cpu,
            16,
            16,
        );
        let sink = FrameWriter::new(rank).with_output(dir.path());
        let stats = node.run(&mut host, &mut renderer, sink).unwrap();
        written.lock().unwrap().push((rank, stats.frames));
    });

    let mut written = written.into_inner().unwrap();
    written.sort();
    assert_eq!(written, vec![(0, 3), (1, 3)]);
    for rank in 0..2 {
        for frame in 0..3 {
            let path = dir.path().join(format!("rank{rank}_frame{frame:04}.png"));
            assert!(path.exists(), "missing {}", path.display());
        }
    }
}
