//! In-process cluster: N ranks as N threads sharing one hub.
//!
//! Collectives are matched by a per-rank sequence number, so a broadcast
//! root never blocks: it posts its payload and moves on, and each receiver
//! picks the payload up when it reaches the same collective. Barriers use a
//! generation counter.
//!
//! Any rank that times out or drops its handle poisons the hub; every rank
//! still waiting then fails with the same protocol error.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use smallvec::SmallVec;

use super::Communicator;
use crate::util::{Error, Result};

/// Default wait before a collective is declared failed.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

struct Post {
    /// Rank that posted the payload.
    root: usize,
    payload: SmallVec<[u8; 16]>,
    /// Receivers that have not copied the payload yet.
    pending: usize,
}

#[derive(Default)]
struct HubState {
    posts: HashMap<u64, Post>,
    arrived: usize,
    generation: u64,
    poisoned: Option<String>,
}

struct Hub {
    size: usize,
    timeout: Duration,
    state: Mutex<HubState>,
    cond: Condvar,
}

impl Hub {
    fn poison(&self, state: &mut HubState, reason: String) {
        if state.poisoned.is_none() {
            tracing::warn!("cluster: {reason}");
            state.poisoned = Some(reason);
        }
        self.cond.notify_all();
    }

    /// Wait for the next notification. Fails once the hub is poisoned or
    /// the deadline has passed; callers recheck their condition first.
    fn wait(&self, state: &mut MutexGuard<'_, HubState>, deadline: Instant, what: &str) -> Result<()> {
        if let Some(reason) = &state.poisoned {
            return Err(Error::protocol(reason.clone()));
        }
        if Instant::now() >= deadline {
            let reason = format!("{what} timed out after {:?}", self.timeout);
            self.poison(state, reason.clone());
            return Err(Error::protocol(reason));
        }
        self.cond.wait_until(state, deadline);
        Ok(())
    }
}

/// Factory for in-process communicators.
pub struct LocalCluster;

impl LocalCluster {
    /// Create `size` connected ranks, one handle per rank.
    pub fn new(size: usize, timeout: Duration) -> Result<Vec<LocalComm>> {
        if size == 0 {
            return Err(Error::InvalidRankCount(size));
        }
        let hub = Arc::new(Hub {
            size,
            timeout,
            state: Mutex::new(HubState::default()),
            cond: Condvar::new(),
        });
        Ok((0..size)
            .map(|rank| LocalComm {
                rank,
                hub: Arc::clone(&hub),
                seq: AtomicU64::new(0),
            })
            .collect())
    }
}

/// One rank's handle on a [`LocalCluster`].
pub struct LocalComm {
    rank: usize,
    hub: Arc<Hub>,
    seq: AtomicU64,
}

impl Communicator for LocalComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.hub.size
    }

    fn broadcast_bytes(&self, buf: &mut [u8], root: usize) -> Result<()> {
        let hub = &*self.hub;
        if root >= hub.size {
            return Err(Error::protocol(format!("broadcast root {root} out of range")));
        }
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let mut state = hub.state.lock();

        if self.rank == root {
            if let Some(reason) = &state.poisoned {
                return Err(Error::protocol(reason.clone()));
            }
            if let Some(other) = state.posts.get(&seq) {
                let reason = format!(
                    "ranks {} and {root} both broadcast as root of collective {seq}",
                    other.root
                );
                hub.poison(&mut state, reason.clone());
                return Err(Error::protocol(reason));
            }
            if hub.size > 1 {
                state.posts.insert(
                    seq,
                    Post {
                        root,
                        payload: SmallVec::from_slice(buf),
                        pending: hub.size - 1,
                    },
                );
                hub.cond.notify_all();
            }
            return Ok(());
        }

        let deadline = Instant::now() + hub.timeout;
        loop {
            if let Some(post) = state.posts.get_mut(&seq) {
                if post.root != root {
                    let reason = format!(
                        "rank {} expected collective {seq} from rank {root}, got rank {}",
                        self.rank, post.root
                    );
                    hub.poison(&mut state, reason.clone());
                    return Err(Error::protocol(reason));
                }
                if post.payload.len() == buf.len() {
                    buf.copy_from_slice(&post.payload);
                    post.pending -= 1;
                    if post.pending == 0 {
                        state.posts.remove(&seq);
                    }
                    return Ok(());
                }
                let reason = format!(
                    "rank {} expected {} bytes from rank {root}, got {}",
                    self.rank,
                    buf.len(),
                    post.payload.len()
                );
                hub.poison(&mut state, reason.clone());
                return Err(Error::protocol(reason));
            }
            hub.wait(&mut state, deadline, "broadcast")?;
        }
    }

    fn barrier(&self) -> Result<()> {
        let hub = &*self.hub;
        let mut state = hub.state.lock();
        if let Some(reason) = &state.poisoned {
            return Err(Error::protocol(reason.clone()));
        }

        let generation = state.generation;
        state.arrived += 1;
        if state.arrived == hub.size {
            state.arrived = 0;
            state.generation += 1;
            hub.cond.notify_all();
            return Ok(());
        }

        let deadline = Instant::now() + hub.timeout;
        while state.generation == generation {
            hub.wait(&mut state, deadline, "barrier")?;
        }
        Ok(())
    }
}

impl Drop for LocalComm {
    fn drop(&mut self) {
        let mut state = self.hub.state.lock();
        if state.poisoned.is_none() {
            tracing::debug!(rank = self.rank, "cluster: rank left");
            state.poisoned = Some(format!("rank {} left the cluster", self.rank));
        }
        self.hub.cond.notify_all();
    }
}
