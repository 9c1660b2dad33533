use rand::RngCore;

/// The 32-byte secret used by the stream codec.
///
/// Exactly one key is active per node at any time: a `KeyManager` owns it if
/// present, otherwise a legacy field does. This type only models the secret
/// itself; ownership belongs to `peervault_node::Node::current_key()`.
#[derive(Clone)]
pub struct EncryptionKey([u8; 32]);

impl EncryptionKey {
    /// `NewEncryptionKey` (spec 4.1): 32 random bytes from a CSPRNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

// Manual Debug: never print key material.
impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EncryptionKey(..)")
    }
}
