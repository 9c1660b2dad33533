//! Resolves a node's single active [`EncryptionKey`] from config: try an
//! inline value first, then a file, accepting hex text or raw bytes.

use crate::config::EncryptionKeySource;
use peervault_core::EncryptionKey;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum KeyLoadError {
    #[error("encryption key file {path:?} could not be read: {source}")]
    ReadFile { path: std::path::PathBuf, source: std::io::Error },
    #[error("encryption key value is not 32 bytes of raw or hex data")]
    InvalidEncoding,
}

/// Loads the node's [`EncryptionKey`] from its configured source.
/// `config_dir` resolves a relative `File` path relative to the node
/// config file's directory.
pub fn load_encryption_key(
    source: &EncryptionKeySource,
    config_dir: Option<&Path>,
) -> Result<EncryptionKey, KeyLoadError> {
    match source {
        EncryptionKeySource::Inline { key_hex } => {
            parse_key_string(key_hex).ok_or(KeyLoadError::InvalidEncoding)
        }
        EncryptionKeySource::File { path } => {
            let resolved = match config_dir {
                Some(dir) => dir.join(path),
                None => std::path::PathBuf::from(path),
            };
            let bytes = std::fs::read(&resolved).map_err(|source| KeyLoadError::ReadFile {
                path: resolved.clone(),
                source,
            })?;
            if let Ok(text) = std::str::from_utf8(&bytes)
                && let Some(key) = parse_key_string(text.trim())
            {
                return Ok(key);
            }
            parse_key_bytes(&bytes).ok_or(KeyLoadError::InvalidEncoding)
        }
    }
}

fn parse_key_string(s: &str) -> Option<EncryptionKey> {
    let bytes = hex::decode(s).ok()?;
    parse_key_bytes(&bytes)
}

fn parse_key_bytes(bytes: &[u8]) -> Option<EncryptionKey> {
    let arr: [u8; 32] = bytes.try_into().ok()?;
    Some(EncryptionKey::from_bytes(arr))
}
