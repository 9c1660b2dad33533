use crate::token_bucket::TokenBucket;
use parking_lot::Mutex;
use peervault_core::{PeerVaultError, RequestId, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Identifies one in-flight stream within a peer's tracker. Request ids
/// are already unique 32-byte identifiers generated per operation, so
/// they double as stream ids rather than inventing a second id scheme.
pub type StreamId = RequestId;

struct Slots {
    active: HashMap<StreamId, CancellationToken>,
    max_concurrent: usize,
    accepting: bool,
}

/// Per-peer stream accounting: a [`TokenBucket`] rate limiter plus a
/// concurrency cap.
pub struct StreamTracker {
    limiter: TokenBucket,
    slots: Mutex<Slots>,
    stream_timeout: Duration,
}

impl StreamTracker {
    pub fn new(rate_per_sec: f64, burst: u32, max_concurrent: usize, stream_timeout: Duration) -> Self {
        Self {
            limiter: TokenBucket::new(rate_per_sec, burst),
            slots: Mutex::new(Slots {
                active: HashMap::new(),
                max_concurrent,
                accepting: true,
            }),
            stream_timeout,
        }
    }

    pub fn active_count(&self) -> usize {
        self.slots.lock().active.len()
    }

    /// Rate-limit check, then capacity check, then a timeout-bound
    /// cancellation token is registered under `stream_id`. The returned
    /// guard releases the slot exactly once, whether that happens through
    /// [`StreamGuard::release`], a drop, or the timeout firing.
    pub fn acquire(self: &Arc<Self>, stream_id: StreamId) -> Result<StreamGuard> {
        if !self.limiter.try_acquire() {
            return Err(PeerVaultError::RateLimited);
        }

        let token = {
            let mut slots = self.slots.lock();
            if !slots.accepting {
                return Err(PeerVaultError::CapacityExceeded { active: 0, max: 0 });
            }
            if slots.active.len() >= slots.max_concurrent {
                return Err(PeerVaultError::CapacityExceeded {
                    active: slots.active.len(),
                    max: slots.max_concurrent,
                });
            }
            let token = CancellationToken::new();
            slots.active.insert(stream_id, token.clone());
            token
        };

        let timeout_task = {
            let token = token.clone();
            let deadline = self.stream_timeout;
            tokio::spawn(async move {
                tokio::time::sleep(deadline).await;
                token.cancel();
            })
        };

        Ok(StreamGuard {
            tracker: Arc::clone(self),
            stream_id,
            token,
            timeout_task: Some(timeout_task),
        })
    }

    /// Cancels and removes the entry exactly once. Idempotent: releasing
    /// an already-released id is a no-op.
    pub fn release(&self, stream_id: StreamId) {
        let token = self.slots.lock().active.remove(&stream_id);
        if let Some(token) = token {
            token.cancel();
        }
    }

    /// Shutdown of a peer: cancels every active stream and stops
    /// accepting new ones.
    pub fn shutdown(&self) {
        let mut slots = self.slots.lock();
        slots.accepting = false;
        for (_, token) in slots.active.drain() {
            token.cancel();
        }
    }
}

/// Holds one acquired stream slot. Dropping it releases the slot exactly
/// once, even on an early return or panic unwind in the caller.
pub struct StreamGuard {
    tracker: Arc<StreamTracker>,
    stream_id: StreamId,
    token: CancellationToken,
    timeout_task: Option<tokio::task::JoinHandle<()>>,
}

impl StreamGuard {
    /// The per-stream cancellation token: cancelled on explicit release,
    /// on timeout, or on tracker/manager shutdown.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.tracker.release(self.stream_id);
        if let Some(task) = self.timeout_task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_respects_concurrency_cap() {
        let tracker = Arc::new(StreamTracker::new(1_000.0, 1_000, 1, Duration::from_secs(5)));
        let first = tracker.acquire(RequestId::generate()).unwrap();
        let second = tracker.acquire(RequestId::generate());
        assert!(matches!(second, Err(PeerVaultError::CapacityExceeded { active: 1, max: 1 })));
        drop(first);
        assert!(tracker.acquire(RequestId::generate()).is_ok());
    }

    #[tokio::test]
    async fn acquire_respects_rate_limit() {
        let tracker = Arc::new(StreamTracker::new(0.0, 1, 100, Duration::from_secs(5)));
        assert!(tracker.acquire(RequestId::generate()).is_ok());
        let second = tracker.acquire(RequestId::generate());
        assert!(matches!(second, Err(PeerVaultError::RateLimited)));
    }

    #[tokio::test]
    async fn release_allows_reacquire_and_is_idempotent() {
        let tracker = Arc::new(StreamTracker::new(1_000.0, 1_000, 1, Duration::from_secs(5)));
        let id = RequestId::generate();
        let guard = tracker.acquire(id).unwrap();
        assert_eq!(tracker.active_count(), 1);
        tracker.release(guard.stream_id());
        tracker.release(guard.stream_id());
        assert_eq!(tracker.active_count(), 0);
        std::mem::forget(guard);
    }

    #[tokio::test]
    async fn shutdown_cancels_active_streams_and_blocks_new_ones() {
        let tracker = Arc::new(StreamTracker::new(1_000.0, 1_000, 10, Duration::from_secs(5)));
        let guard = tracker.acquire(RequestId::generate()).unwrap();
        let token = guard.token().clone();
        tracker.shutdown();
        assert!(token.is_cancelled());
        assert!(matches!(
            tracker.acquire(RequestId::generate()),
            Err(PeerVaultError::CapacityExceeded { .. })
        ));
        std::mem::forget(guard);
    }

    #[tokio::test]
    async fn timeout_cancels_token_without_explicit_release() {
        let tracker = Arc::new(StreamTracker::new(1_000.0, 1_000, 10, Duration::from_millis(10)));
        let guard = tracker.acquire(RequestId::generate()).unwrap();
        let token = guard.token().clone();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(token.is_cancelled());
    }
}
