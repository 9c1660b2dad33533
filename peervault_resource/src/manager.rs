use crate::tracker::{StreamGuard, StreamId, StreamTracker};
use dashmap::DashMap;
use peervault_core::{NodeId, PeerVaultError, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Tunables for every peer's [`StreamTracker`].
#[derive(Debug, Clone, Copy)]
pub struct ResourceLimits {
    pub max_concurrent_streams: usize,
    pub stream_timeout: Duration,
    pub rate_limit_per_sec: f64,
    pub burst_limit: u32,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_concurrent_streams: 32,
            stream_timeout: Duration::from_secs(30),
            rate_limit_per_sec: 50.0,
            burst_limit: 100,
        }
    }
}

/// Owns one [`StreamTracker`] per live peer, in a `dashmap`-backed
/// concurrent map for per-peer state that many tasks read and write
/// without a single coarse lock.
pub struct ResourceManager {
    limits: ResourceLimits,
    trackers: DashMap<NodeId, Arc<StreamTracker>>,
    shut_down: AtomicBool,
}

impl ResourceManager {
    pub fn new(limits: ResourceLimits) -> Self {
        Self {
            limits,
            trackers: DashMap::new(),
            shut_down: AtomicBool::new(false),
        }
    }

    fn tracker_for(&self, peer: NodeId) -> Arc<StreamTracker> {
        Arc::clone(&self.trackers.entry(peer).or_insert_with(|| {
            Arc::new(StreamTracker::new(
                self.limits.rate_limit_per_sec,
                self.limits.burst_limit,
                self.limits.max_concurrent_streams,
                self.limits.stream_timeout,
            ))
        }))
    }

    /// Acquires a stream slot for `peer`, checking its rate limit and
    /// concurrency cap.
    pub fn acquire(&self, peer: NodeId, stream_id: StreamId) -> Result<StreamGuard> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(PeerVaultError::CapacityExceeded { active: 0, max: 0 });
        }
        self.tracker_for(peer).acquire(stream_id)
    }

    pub fn active_streams(&self, peer: NodeId) -> usize {
        self.trackers.get(&peer).map(|t| t.active_count()).unwrap_or(0)
    }

    /// Shutdown of a peer: cancels every stream the peer had active and
    /// removes its tracker from the live set.
    pub fn shutdown_peer(&self, peer: NodeId) {
        if let Some((_, tracker)) = self.trackers.remove(&peer) {
            tracker.shutdown();
        }
    }

    /// Shutdown of the manager: cancels every stream across every peer;
    /// after this, no further `acquire` succeeds anywhere.
    pub fn shutdown(&self) {
        self.shut_down.store(true, Ordering::Release);
        for entry in self.trackers.iter() {
            entry.value().shutdown();
        }
    }
}
