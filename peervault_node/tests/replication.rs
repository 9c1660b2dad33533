//! End-to-end replication and lookup scenarios: real loopback TCP sockets,
//! two or three in-process nodes, no mocked transport.

use peervault_node::Node;
use peervault_node::config::{EncryptionKeySource, NodeConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

/// A token that is never cancelled, for tests that don't exercise
/// cancellation themselves.
fn no_cancel() -> CancellationToken {
    CancellationToken::new()
}

fn base_config(listen_addr: &str, bootstrap: Vec<String>, key_hex: &str, secret: &str) -> NodeConfig {
    NodeConfig {
        listen_addr: listen_addr.to_string(),
        bootstrap_nodes: bootstrap,
        storage_root_prefix: None,
        encryption_key: EncryptionKeySource::Inline { key_hex: key_hex.to_string() },
        shared_secret: secret.to_string(),
        resource_limits: Default::default(),
        health: Default::default(),
    }
}

async fn start_in(dir: &std::path::Path, config: NodeConfig) -> Arc<Node> {
    let mut config = config;
    config.storage_root_prefix = Some(dir.to_string_lossy().into_owned());
    Node::start(config, None).await.expect("node starts")
}

fn shared_key_hex() -> String {
    "22".repeat(32)
}

#[tokio::test(flavor = "multi_thread")]
async fn two_node_replication_round_trips() {
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();
    let key = shared_key_hex();
    let secret = "two-node-shared-secret";

    let node_a = start_in(dir_a.path(), base_config("127.0.0.1:0", vec![], &key, secret)).await;
    let addr_a = node_a.bound_addr();

    let node_b = start_in(
        dir_b.path(),
        base_config("127.0.0.1:0", vec![addr_a.to_string()], &key, secret),
    )
    .await;

    // give the bootstrap dial's handshake a moment to register on both sides
    wait_until(|| node_a.peer_count() == 1 && node_b.peer_count() == 1).await;

    let mut payload = std::io::Cursor::new(b"hello".to_vec());
    node_b.store("k", &mut payload, &no_cancel()).await.expect("store succeeds with a healthy peer");

    wait_until_async(|| {
        let node_a = Arc::clone(&node_a);
        async move { node_a.get("k", &no_cancel()).await.is_ok() }
    })
    .await;

    let mut reader = node_a.get("k", &no_cancel()).await.expect("replica has the key");
    let mut out = Vec::new();
    reader.read_to_end(&mut out).await.unwrap();
    assert_eq!(out, b"hello");

    node_a.stop().await;
    node_b.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn store_with_zero_healthy_peers_succeeds_locally() {
    let dir = tempfile::tempdir().unwrap();
    let node = start_in(dir.path(), base_config("127.0.0.1:0", vec![], &shared_key_hex(), "solo")).await;

    let mut payload = std::io::Cursor::new(b"lonely bytes".to_vec());
    node.store("solo-key", &mut payload, &no_cancel()).await.expect("no peers means local write is enough");

    let mut reader = node.get("solo-key", &no_cancel()).await.unwrap();
    let mut out = Vec::new();
    reader.read_to_end(&mut out).await.unwrap();
    assert_eq!(out, b"lonely bytes");

    node.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn get_missing_key_with_no_peers_returns_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let node = start_in(dir.path(), base_config("127.0.0.1:0", vec![], &shared_key_hex(), "solo")).await;

    let err = node.get("never-stored", &no_cancel()).await.unwrap_err();
    assert!(matches!(err, peervault_core::PeerVaultError::NotFound(_)));

    node.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn get_missing_key_broadcasts_and_reports_not_found() {
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();
    let key = shared_key_hex();
    let secret = "missing-key-secret";

    let node_a = start_in(dir_a.path(), base_config("127.0.0.1:0", vec![], &key, secret)).await;
    let addr_a = node_a.bound_addr();
    let node_b = start_in(
        dir_b.path(),
        base_config("127.0.0.1:0", vec![addr_a.to_string()], &key, secret),
    )
    .await;

    wait_until(|| node_a.peer_count() == 1 && node_b.peer_count() == 1).await;

    let err = node_b.get("nothing-here", &no_cancel()).await.unwrap_err();
    assert!(matches!(err, peervault_core::PeerVaultError::NotFound(_)));

    node_a.stop().await;
    node_b.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn get_respects_caller_cancellation_instead_of_hanging() {
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();
    let key = shared_key_hex();
    let secret = "cancel-secret";

    let node_a = start_in(dir_a.path(), base_config("127.0.0.1:0", vec![], &key, secret)).await;
    let addr_a = node_a.bound_addr();
    let node_b = start_in(
        dir_b.path(),
        base_config("127.0.0.1:0", vec![addr_a.to_string()], &key, secret),
    )
    .await;

    wait_until(|| node_a.peer_count() == 1 && node_b.peer_count() == 1).await;

    // The broadcast goes out to a real, healthy peer, but the caller's
    // token is already cancelled: the wait for a GetFileAck must resolve
    // immediately via cancellation rather than sitting on the full
    // GET_BROADCAST_TIMEOUT.
    let cancel = CancellationToken::new();
    cancel.cancel();

    let started = tokio::time::Instant::now();
    let err = node_b.get("not-stored-anywhere", &cancel).await.unwrap_err();
    assert!(matches!(err, peervault_core::PeerVaultError::NotFound(_)));
    assert!(
        started.elapsed() < Duration::from_secs(5),
        "cancellation should short-circuit the broadcast wait, took {:?}",
        started.elapsed()
    );

    node_a.stop().await;
    node_b.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_payload_round_trips_through_store_and_get() {
    let dir = tempfile::tempdir().unwrap();
    let node = start_in(dir.path(), base_config("127.0.0.1:0", vec![], &shared_key_hex(), "empty")).await;

    let mut payload = std::io::Cursor::new(Vec::new());
    node.store("empty-key", &mut payload, &no_cancel()).await.unwrap();

    let mut reader = node.get("empty-key", &no_cancel()).await.unwrap();
    let mut out = Vec::new();
    reader.read_to_end(&mut out).await.unwrap();
    assert!(out.is_empty());

    node.stop().await;
}

async fn wait_until(mut predicate: impl FnMut() -> bool) {
    for _ in 0..100 {
        if predicate() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition never became true within the deadline");
}

async fn wait_until_async<F, Fut>(mut make_future: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if make_future().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition never became true within the deadline");
}
