use sha1::{Digest, Sha1};
use std::fmt;

/// Caller-supplied name for a blob. Deliberately a thin alias — the store
/// never indexes by this, only by [`HashedKey`].
pub type ContentKey = str;

/// SHA-1 digest length in bytes.
pub const HASHED_KEY_LEN: usize = 20;

/// `lowercase hex(SHA-1(ContentKey))`. The store indexes blobs by this,
/// never by the raw caller key, so no caller-controlled string ever
/// reaches the filesystem layer. Stored as the raw 20-byte digest; hex is
/// derived on demand (for logging and the CAS leaf filename) and is also the
/// on-wire encoding used by the envelope codec.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HashedKey([u8; HASHED_KEY_LEN]);

impl HashedKey {
    /// Computes the lowercase hex SHA-1 digest of the input.
    pub fn compute(content_key: &ContentKey) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(content_key.as_bytes());
        let digest = hasher.finalize();
        let mut bytes = [0u8; HASHED_KEY_LEN];
        bytes.copy_from_slice(&digest);
        Self(bytes)
    }

    pub const fn from_bytes(bytes: [u8; HASHED_KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; HASHED_KEY_LEN] {
        &self.0
    }

    /// The full lowercase-hex digest, also used as the CAS leaf filename.
    pub fn as_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for HashedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("HashedKey").field(&self.as_hex()).finish()
    }
}

impl fmt::Display for HashedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_known_sha1_vector() {
        // sha1("k") == aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d
        let hashed = HashedKey::compute("k");
        assert_eq!(hashed.as_hex(), "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d");
    }

    #[test]
    fn deterministic_across_calls() {
        assert_eq!(HashedKey::compute("same"), HashedKey::compute("same"));
        assert_ne!(HashedKey::compute("a"), HashedKey::compute("b"));
    }
}
