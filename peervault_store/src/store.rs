use async_trait::async_trait;
use peervault_core::{ContentKey, EncryptionKey, HashedKey, Result};
use tokio::io::AsyncRead;

/// The local blob store contract.
///
/// Object-safe by design: every method that moves bytes takes a `dyn`
/// reference rather than a generic parameter, so a [`Store`] can be held
/// behind `Arc<dyn Store>` in `peervault-node`.
///
/// The `*_hashed` methods operate directly on a [`HashedKey`], bypassing
/// the `ContentKey` -> `HashedKey` hash step. `peervault-node`'s inbound
/// replication dispatch only ever learns a peer's `HashedKey` (the
/// `StoreFile`/`GetFile` envelope carries `HashedKey`, never the raw caller
/// key), so it needs a way to address the CAS path without possessing the
/// original `ContentKey`. The `ContentKey`-keyed methods below are the ones
/// a caller with the original key uses; they are default-implemented in
/// terms of the hashed ones.
#[async_trait]
pub trait Store: std::fmt::Debug + Send + Sync {
    /// `Has(key)`, addressed directly by `HashedKey`. Never errors: any
    /// stat failure is treated as absence.
    async fn has_hashed(&self, hashed: &HashedKey) -> bool;

    /// `Write(key, reader)`, addressed directly by `HashedKey`. Stores the
    /// reader's bytes verbatim under the path derived from `hashed`,
    /// returning the number of bytes written.
    async fn write_hashed(
        &self,
        hashed: &HashedKey,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<u64>;

    /// Writes bytes under `hashed`, transforming them in flight through a
    /// codec as they're written. The only codec this workspace implements
    /// is the streaming cipher in [`peervault_crypto`], so this takes an
    /// [`EncryptionKey`] directly rather than a codec trait object.
    async fn write_hashed_with_codec(
        &self,
        codec_key: &EncryptionKey,
        hashed: &HashedKey,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<u64>;

    /// `Read(key)`, addressed directly by `HashedKey`. Returns the stored
    /// size and a reader over its bytes.
    async fn read_hashed(&self, hashed: &HashedKey) -> Result<(u64, Box<dyn AsyncRead + Send + Unpin>)>;

    /// `Delete(key)`, addressed directly by `HashedKey`. Idempotent:
    /// deleting an absent key is not an error.
    async fn delete_hashed(&self, hashed: &HashedKey) -> Result<()>;

    /// `Clear()`. Removes every stored blob under this store's root.
    async fn clear(&self) -> Result<()>;

    /// `Has(key)` for a caller that holds the original `ContentKey`.
    async fn has(&self, key: &ContentKey) -> bool {
        self.has_hashed(&HashedKey::compute(key)).await
    }

    /// `Write(key, reader)` for a caller that holds the original
    /// `ContentKey`.
    async fn write(&self, key: &ContentKey, reader: &mut (dyn AsyncRead + Send + Unpin)) -> Result<u64> {
        self.write_hashed(&HashedKey::compute(key), reader).await
    }

    /// `WriteWithCodec(...)` for a caller that holds the original
    /// `ContentKey`.
    async fn write_with_codec(
        &self,
        codec_key: &EncryptionKey,
        key: &ContentKey,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<u64> {
        self.write_hashed_with_codec(codec_key, &HashedKey::compute(key), reader).await
    }

    /// `Read(key)` for a caller that holds the original `ContentKey`.
    async fn read(&self, key: &ContentKey) -> Result<(u64, Box<dyn AsyncRead + Send + Unpin>)> {
        self.read_hashed(&HashedKey::compute(key)).await
    }

    /// `Delete(key)` for a caller that holds the original `ContentKey`.
    async fn delete(&self, key: &ContentKey) -> Result<()> {
        self.delete_hashed(&HashedKey::compute(key)).await
    }
}

/// Writes ciphertext produced by [`peervault_crypto::encrypt_stream`] to
/// `dst`, returning the number of bytes written (ciphertext, including the
/// IV prefix). Used by [`Store::write_hashed_with_codec`] implementations
/// so the codec logic lives in one place instead of being duplicated per
/// backend.
pub(crate) async fn encrypt_into(
    key: &EncryptionKey,
    src: &mut (dyn AsyncRead + Send + Unpin),
    dst: &mut (dyn tokio::io::AsyncWrite + Send + Unpin),
) -> Result<u64> {
    Ok(peervault_crypto::encrypt_stream(key, src, dst).await?)
}
