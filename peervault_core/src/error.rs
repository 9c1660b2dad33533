use peervault_crypto::CryptoError;

/// The error taxonomy for PeerVault. Every operation exposed by
/// `peervault-node` resolves to one of these, never to a raw I/O error or a
/// panic.
#[derive(thiserror::Error, Debug)]
pub enum PeerVaultError {
    /// Key absent locally and no peer returned bytes.
    #[error("key not found: {0}")]
    NotFound(String),

    /// Local write succeeded but no peer could be streamed to after
    /// retries, despite at least one healthy peer.
    #[error("replication failed: {attempted} peer(s) attempted, 0 completed")]
    ReplicationFailed { attempted: usize },

    /// The resource manager refused a slot due to the rate limiter.
    #[error("rate limited")]
    RateLimited,

    /// The resource manager refused a slot due to the concurrency cap.
    #[error("capacity exceeded: {active}/{max} streams active")]
    CapacityExceeded { active: usize, max: usize },

    /// A stream exceeded its deadline.
    #[error("stream timed out")]
    StreamTimeout,

    /// Magic, length, or HMAC check failed on a new connection.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// Unknown frame kind, truncated frame, or unknown envelope tag.
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// Underlying I/O failure against a peer.
    #[error("transport error with peer {peer}: {source}")]
    TransportError {
        peer: String,
        #[source]
        source: std::io::Error,
    },

    /// The stream codec failed to read an IV or produce output.
    #[error("crypto error: {0}")]
    CryptoError(#[from] CryptoError),

    /// Catch-all for local filesystem errors, which are fatal to the
    /// originating operation and surfaced to the caller rather than
    /// retried internally.
    #[error("storage error: {0}")]
    StorageError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PeerVaultError>;
