//! Shared data model, wire envelope, and error taxonomy for PeerVault.
//!
//! Depends only on [`peervault_crypto`] for its id/hash/key types; every
//! other `peervault-*` crate depends on this one for [`Envelope`] and
//! [`PeerVaultError`].

mod envelope;
mod error;

pub use envelope::Envelope;
pub use error::{PeerVaultError, Result};

// Re-exported so downstream crates can use one `peervault_core::{...}`
// import path for the whole data model instead of also depending directly
// on `peervault_crypto`.
pub use peervault_crypto::{ContentKey, EncryptionKey, HashedKey, NodeId, RequestId};
