//! A reusable conformance suite for [`Store`] implementations: one harness
//! struct wrapping a store, with one method per behavior so a new backend
//! can run the whole suite with a single `#[tokio::test]` per method.

use crate::store::Store;
use peervault_core::EncryptionKey;
use std::io::Cursor;

pub struct StoreTests<S: Store> {
    pub store: S,
}

impl<S: Store> StoreTests<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub async fn run_has_is_false_before_write(&self) {
        assert!(!self.store.has("missing-key").await);
    }

    pub async fn run_write_then_has_and_read(&self) {
        let key = "a-key";
        let payload = b"hello peervault".to_vec();
        let mut reader = Cursor::new(payload.clone());
        let written = self.store.write(key, &mut reader).await.unwrap();
        assert_eq!(written, payload.len() as u64);

        assert!(self.store.has(key).await);

        let (size, mut r) = self.store.read(key).await.unwrap();
        assert_eq!(size, payload.len() as u64);
        let mut out = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut r, &mut out).await.unwrap();
        assert_eq!(out, payload);
    }

    pub async fn run_write_with_codec_round_trips_through_decrypt(&self) {
        let key = "encrypted-key";
        let payload = b"super secret bytes".to_vec();
        let codec_key = EncryptionKey::generate();

        let mut reader = Cursor::new(payload.clone());
        self.store.write_with_codec(&codec_key, key, &mut reader).await.unwrap();

        let (_, mut ciphertext_reader) = self.store.read(key).await.unwrap();
        let mut plaintext = Vec::new();
        peervault_crypto::decrypt_stream(&codec_key, &mut ciphertext_reader, &mut plaintext)
            .await
            .unwrap();
        assert_eq!(plaintext, payload);
    }

    pub async fn run_read_missing_key_errors(&self) {
        let result = self.store.read("does-not-exist").await;
        assert!(result.is_err());
    }

    pub async fn run_delete_is_idempotent(&self) {
        let key = "deletable";
        let mut reader = Cursor::new(b"bytes".to_vec());
        self.store.write(key, &mut reader).await.unwrap();
        assert!(self.store.has(key).await);

        self.store.delete(key).await.unwrap();
        assert!(!self.store.has(key).await);

        // deleting again must not error
        self.store.delete(key).await.unwrap();
    }

    pub async fn run_clear_removes_everything(&self) {
        for key in ["k1", "k2", "k3"] {
            let mut reader = Cursor::new(b"x".to_vec());
            self.store.write(key, &mut reader).await.unwrap();
        }
        self.store.clear().await.unwrap();
        for key in ["k1", "k2", "k3"] {
            assert!(!self.store.has(key).await);
        }
    }

    pub async fn run_all(&self) {
        self.run_has_is_false_before_write().await;
        self.run_write_then_has_and_read().await;
        self.run_write_with_codec_round_trips_through_decrypt().await;
        self.run_read_missing_key_errors().await;
        self.run_delete_is_idempotent().await;
        self.run_clear_removes_everything().await;
    }
}
