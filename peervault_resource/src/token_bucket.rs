use parking_lot::Mutex;
use std::time::Instant;

/// A token bucket rate limiter, guarded by a short-held `parking_lot::Mutex`
/// around a plain refill calculation. Effectively uncontended since the
/// critical section is a handful of float ops with no syscalls or awaits.
pub struct TokenBucket {
    state: Mutex<BucketState>,
}

struct BucketState {
    tokens: f64,
    capacity: f64,
    rate_per_sec: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(rate_per_sec: f64, burst: u32) -> Self {
        Self {
            state: Mutex::new(BucketState {
                tokens: burst as f64,
                capacity: burst as f64,
                rate_per_sec,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Consumes one token if available. Returns `false` on an empty
    /// bucket, which the caller should treat as `RateLimited`.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock();
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.last_refill = now;
        state.tokens = (state.tokens + elapsed * state.rate_per_sec).min(state.capacity);

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}
