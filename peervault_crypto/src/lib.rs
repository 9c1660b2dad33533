//! Stream encryption, key/id generation and content hashing for PeerVault.
//!
//! This is the lowest-level crate in the workspace: it has no dependency on
//! any other `peervault-*` crate.

mod error;
mod hash;
mod ids;
mod key;
mod stream;

pub use error::CryptoError;
pub use hash::{ContentKey, HASHED_KEY_LEN, HashedKey};
pub use ids::{NodeId, RequestId};
pub use key::EncryptionKey;
pub use stream::{IV_LEN, decrypt_stream, encrypt_stream};
