//! Content-addressed local blob store for PeerVault.
//!
//! A `tokio::fs`-backed single-writer-per-path design, using the hashed
//! 5-segment path [`path::cas_path`] derives from a
//! [`peervault_core::HashedKey`].

mod local;
mod path;
mod store;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use local::LocalStore;
pub use path::{cas_path, storage_root_for_listen_addr};
pub use store::Store;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::StoreTests;
    use tempfile::tempdir;

    #[tokio::test]
    async fn local_store_passes_conformance_suite() {
        let dir = tempdir().unwrap();
        let suite = StoreTests::new(LocalStore::new(dir.path()));
        suite.run_all().await;
    }

    #[tokio::test]
    async fn local_store_lays_out_blobs_under_hashed_path() {
        let dir = tempdir().unwrap();
        let store = LocalStore::new(dir.path());
        let mut reader = std::io::Cursor::new(b"k-content".to_vec());
        store.write("k", &mut reader).await.unwrap();

        let hashed = peervault_core::HashedKey::compute("k");
        let expected = cas_path(dir.path(), &hashed);
        assert!(expected.is_file());
    }
}
