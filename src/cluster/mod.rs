//! Distributed, double-buffered frame loop.
//!
//! This module provides:
//! - [`Communicator`] - Broadcast/barrier collectives between ranks
//! - [`LocalCluster`] / [`LocalComm`] - In-process cluster over shared memory
//! - [`DoubleBuffering`] - Two-slot render/fetch pipeline
//! - [`DistributedRenderer`] - Per-rank frame protocol driving the partition tree
//!
//! ## Frame protocol
//! ```text
//! stop? ── bcast(rank 0) ──┐
//!                          ▼
//! search(rank) → distance → bcast ×N + barrier → z-order
//!                                                   │
//!             update(tree) ← bcast ×N + barrier ← render (timed)
//!                                                   │
//!                                      fetch → sink (worker thread)
//! ```

mod comm;
mod dbuf;
mod local;
mod renderer;
mod zorder;

pub use comm::Communicator;
pub use dbuf::DoubleBuffering;
pub use local::{LocalCluster, LocalComm, DEFAULT_TIMEOUT};
pub use renderer::{
    DistributedRenderer, FixedFrameLoop, FrameContext, FrameSink, LoopStats, RankRenderer,
    RenderLoop,
};
pub use zorder::{dist_point_bbox, z_order};
