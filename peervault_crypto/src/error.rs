/// Errors produced by the stream cipher codec.
///
/// Kept narrow and local to this crate; `peervault_core::error::PeerVaultError`
/// wraps it with `#[from]` for callers that need the wider taxonomy.
#[derive(thiserror::Error, Debug)]
pub enum CryptoError {
    #[error("failed to read IV: {0}")]
    ReadIv(#[source] std::io::Error),

    #[error("truncated IV: expected {expected} bytes, got {actual}")]
    TruncatedIv { expected: usize, actual: usize },

    #[error("I/O error during stream transform: {0}")]
    Io(#[from] std::io::Error),
}
