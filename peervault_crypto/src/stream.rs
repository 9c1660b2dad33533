use crate::error::CryptoError;
use crate::key::EncryptionKey;
use aes::Aes256;
use aes::cipher::{KeyIvInit, StreamCipher};
use ctr::Ctr128BE;
use rand::RngCore;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Length of the random prefix written ahead of every ciphertext.
pub const IV_LEN: usize = 16;

type Cipher = Ctr128BE<Aes256>;

/// Chunk size used while streaming through the cipher. Keeps memory bounded
/// regardless of payload size, without ever buffering the whole payload.
const CHUNK_LEN: usize = 64 * 1024;

/// Encrypts `src` into `dst`, writing a fresh 16-byte IV first, then the
/// AES-256-CTR keystream XOR of the input, chunk by chunk.
///
/// Returns the number of bytes written to `dst`, i.e. `plaintext len + IV_LEN`.
pub async fn encrypt_stream<R, W>(
    key: &EncryptionKey,
    mut src: R,
    mut dst: W,
) -> Result<u64, CryptoError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut iv = [0u8; IV_LEN];
    rand::rng().fill_bytes(&mut iv);
    dst.write_all(&iv).await?;

    let mut cipher = Cipher::new_from_slices(key.as_bytes(), &iv)
        .expect("key and iv are fixed-size arrays matching the cipher's requirements");
    let mut written: u64 = IV_LEN as u64;
    let mut buf = vec![0u8; CHUNK_LEN];

    loop {
        let n = src.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        let chunk = &mut buf[..n];
        cipher.apply_keystream(chunk);
        dst.write_all(chunk).await?;
        written += n as u64;
    }

    dst.flush().await?;
    Ok(written)
}

/// Reads the 16-byte IV from the front of `src`, then streams the inverse of
/// [`encrypt_stream`] into `dst`. CTR-mode decryption is identical to
/// encryption (XOR with the same keystream), so this simply re-derives the
/// keystream from the recovered IV.
///
/// Returns the number of plaintext bytes written to `dst`.
pub async fn decrypt_stream<R, W>(
    key: &EncryptionKey,
    mut src: R,
    mut dst: W,
) -> Result<u64, CryptoError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut iv = [0u8; IV_LEN];
    let mut read_so_far = 0;
    while read_so_far < IV_LEN {
        let n = src
            .read(&mut iv[read_so_far..])
            .await
            .map_err(CryptoError::ReadIv)?;
        if n == 0 {
            return Err(CryptoError::TruncatedIv {
                expected: IV_LEN,
                actual: read_so_far,
            });
        }
        read_so_far += n;
    }

    let mut cipher = Cipher::new_from_slices(key.as_bytes(), &iv)
        .expect("key and iv are fixed-size arrays matching the cipher's requirements");
    let mut written: u64 = 0;
    let mut buf = vec![0u8; CHUNK_LEN];

    loop {
        let n = src.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        let chunk = &mut buf[..n];
        cipher.apply_keystream(chunk);
        dst.write_all(chunk).await?;
        written += n as u64;
    }

    dst.flush().await?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    async fn roundtrip(plaintext: &[u8]) {
        let key = EncryptionKey::generate();

        let mut ciphertext = Vec::new();
        let n_enc = encrypt_stream(&key, Cursor::new(plaintext), &mut ciphertext)
            .await
            .unwrap();
        assert_eq!(n_enc as usize, plaintext.len() + IV_LEN);
        assert_eq!(ciphertext.len(), plaintext.len() + IV_LEN);

        let mut decrypted = Vec::new();
        let n_dec = decrypt_stream(&key, Cursor::new(ciphertext), &mut decrypted)
            .await
            .unwrap();
        assert_eq!(n_dec as usize, plaintext.len());
        assert_eq!(decrypted, plaintext);
    }

    #[tokio::test]
    async fn empty_payload_round_trips() {
        roundtrip(b"").await;
    }

    #[tokio::test]
    async fn small_payload_round_trips() {
        roundtrip(b"peervault").await;
    }

    #[tokio::test]
    async fn multi_chunk_payload_round_trips() {
        let data = vec![0xABu8; CHUNK_LEN * 3 + 17];
        roundtrip(&data).await;
    }

    #[tokio::test]
    async fn known_zero_key_vector() {
        // key = 32 zero bytes, plaintext "peervault" -> 16-byte IV + 9-byte
        // ciphertext, decrypt reproduces "peervault".
        let key = EncryptionKey::from_bytes([0u8; 32]);
        let plaintext = b"peervault";

        let mut ciphertext = Vec::new();
        let written = encrypt_stream(&key, Cursor::new(plaintext), &mut ciphertext)
            .await
            .unwrap();
        assert_eq!(written, 25);
        assert_eq!(ciphertext.len(), 25);

        let mut decrypted = Vec::new();
        decrypt_stream(&key, Cursor::new(ciphertext), &mut decrypted)
            .await
            .unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[tokio::test]
    async fn truncated_iv_is_rejected_not_panicking() {
        let key = EncryptionKey::generate();
        let mut out = Vec::new();
        let err = decrypt_stream(&key, Cursor::new(&[1, 2, 3][..]), &mut out)
            .await
            .unwrap_err();
        assert!(matches!(err, CryptoError::TruncatedIv { .. }));
    }
}
