//! Per-peer stream concurrency cap, rate limiting, and timeouts for
//! PeerVault.
//!
//! [`ResourceManager`] owns one [`StreamTracker`] per peer; callers
//! `acquire` a [`StreamGuard`] before streaming to or from a peer and let
//! it drop (or call `tracker.release`) when the stream ends.

mod manager;
mod token_bucket;
mod tracker;

pub use manager::{ResourceLimits, ResourceManager};
pub use tracker::{StreamGuard, StreamId, StreamTracker};
