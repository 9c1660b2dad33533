use crate::path::cas_path;
use crate::store::{Store, encrypt_into};
use async_trait::async_trait;
use peervault_core::{EncryptionKey, HashedKey, PeerVaultError, Result};
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncRead;
use tracing::{debug, instrument};

/// A [`Store`] backed by a content-addressed directory tree rooted at
/// `root`, one file per blob. Grounded on `blob_stores/local::LocalStore`:
/// same `tokio::fs` usage and the same "create parent dirs, then create the
/// file" shape, adapted from a flat config-driven layout to the hashed
/// 5-segment path from [`cas_path`].
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &std::path::Path {
        &self.root
    }
}

#[async_trait]
impl Store for LocalStore {
    #[instrument(skip(self))]
    async fn has_hashed(&self, hashed: &HashedKey) -> bool {
        let path = cas_path(&self.root, hashed);
        fs::metadata(&path).await.is_ok()
    }

    #[instrument(skip(self, reader))]
    async fn write_hashed(
        &self,
        hashed: &HashedKey,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<u64> {
        let path = cas_path(&self.root, hashed);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut file = fs::File::create(&path).await?;
        let written = tokio::io::copy(reader, &mut file).await?;
        debug!(%hashed, written, "wrote blob");
        Ok(written)
    }

    #[instrument(skip(self, reader))]
    async fn write_hashed_with_codec(
        &self,
        codec_key: &EncryptionKey,
        hashed: &HashedKey,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<u64> {
        let path = cas_path(&self.root, hashed);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut file = fs::File::create(&path).await?;
        let written = encrypt_into(codec_key, reader, &mut file).await?;
        debug!(%hashed, written, "wrote encrypted blob");
        Ok(written)
    }

    #[instrument(skip(self))]
    async fn read_hashed(&self, hashed: &HashedKey) -> Result<(u64, Box<dyn AsyncRead + Send + Unpin>)> {
        let path = cas_path(&self.root, hashed);
        let file = fs::File::open(&path)
            .await
            .map_err(|_| PeerVaultError::NotFound(hashed.as_hex()))?;
        let size = file.metadata().await?.len();
        Ok((size, Box::new(file)))
    }

    #[instrument(skip(self))]
    async fn delete_hashed(&self, hashed: &HashedKey) -> Result<()> {
        let path = cas_path(&self.root, hashed);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self))]
    async fn clear(&self) -> Result<()> {
        match fs::remove_dir_all(&self.root).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        fs::create_dir_all(&self.root).await?;
        Ok(())
    }
}
