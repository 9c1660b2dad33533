//! Peer heartbeat, liveness tracking, and reconnect-with-backoff for
//! PeerVault.
//!
//! A [`HealthManager`] owns no transport itself: a node [`register`]s every
//! [`Peer`](peervault_transport::Peer) it accepts or dials, and the manager
//! drives two background loops (heartbeat, health-check) that demote,
//! reconnect, and ultimately evict peers, invoking caller-supplied
//! callbacks so the node's own peer map stays in sync.

mod dialer;
mod manager;
mod status;

pub use dialer::Dialer;
pub use manager::{HealthConfig, HealthManager};
pub use status::{PeerInfo, Status};

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use peervault_core::{NodeId, PeerVaultError, Result};
    use peervault_transport::{Peer, Transport};
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn fast_config() -> HealthConfig {
        HealthConfig {
            heartbeat_interval: Duration::from_millis(20),
            health_timeout: Duration::from_millis(60),
            reconnect_interval: Duration::from_millis(20),
            max_reconnect_attempts: 2,
        }
    }

    struct AlwaysFailDialer;

    #[async_trait]
    impl Dialer for AlwaysFailDialer {
        async fn dial(&self, addr: SocketAddr) -> Result<Arc<Peer>> {
            Err(PeerVaultError::TransportError {
                peer: addr.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
            })
        }
    }

    async fn connected_pair() -> (Arc<Peer>, Arc<Peer>, NodeId, NodeId) {
        let secret = b"shared-secret-for-health-tests".to_vec();
        let server_id = NodeId::generate();
        let client_id = NodeId::generate();
        let server = Transport::new(server_id, secret.clone());
        let client = Transport::new(client_id, secret);

        let listener = server.listen("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = listener.local_addr().unwrap();

        let accept = tokio::spawn(async move { listener.accept().await.unwrap() });
        let client_peer = client.dial(addr).await.unwrap();
        let server_peer = accept.await.unwrap();

        (server_peer, client_peer, server_id, client_id)
    }

    #[tokio::test]
    async fn registered_peer_starts_healthy_and_is_in_the_snapshot() {
        let (server_peer, _client_peer, _server_id, client_id) = connected_pair().await;
        let manager = HealthManager::new(
            fast_config(),
            Arc::new(AlwaysFailDialer),
            |_| {},
            |_, _| {},
        );
        manager.register(server_peer);

        assert_eq!(manager.status(client_id), Some(Status::Healthy));
        assert_eq!(manager.healthy_peers().len(), 1);
    }

    #[tokio::test]
    async fn silent_peer_is_demoted_then_disconnected_after_max_attempts() {
        let (server_peer, client_peer, _server_id, client_id) = connected_pair().await;
        let disconnected = Arc::new(AtomicUsize::new(0));
        let disconnected_clone = Arc::clone(&disconnected);

        let manager = HealthManager::new(
            fast_config(),
            Arc::new(AlwaysFailDialer),
            move |_| {
                disconnected_clone.fetch_add(1, Ordering::SeqCst);
            },
            |_, _| {},
        );
        manager.register(server_peer);
        // Go silent on the wire so heartbeats stop landing and the peer
        // never looks alive to the health-check loop either.
        client_peer.close().await;

        manager.spawn_loops();

        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(manager.status(client_id), None, "peer should have been evicted");
        assert_eq!(disconnected.load(Ordering::SeqCst), 1);
        manager.shutdown();
    }

    #[tokio::test]
    async fn reconnect_success_restores_healthy_status() {
        let (server_peer, client_peer, _server_id, client_id) = connected_pair().await;
        let reconnected = Arc::new(Mutex::new(None));
        let reconnected_clone = Arc::clone(&reconnected);

        struct OneShotDialer {
            peer: std::sync::Mutex<Option<Arc<Peer>>>,
        }
        #[async_trait]
        impl Dialer for OneShotDialer {
            async fn dial(&self, _addr: SocketAddr) -> Result<Arc<Peer>> {
                self.peer
                    .lock()
                    .unwrap()
                    .take()
                    .ok_or_else(|| PeerVaultError::TransportError {
                        peer: "unused".to_string(),
                        source: std::io::Error::new(std::io::ErrorKind::Other, "already used"),
                    })
            }
        }

        let (replacement_server, _replacement_client, _replacement_server_id, _replacement_client_id) =
            connected_pair().await;
        let dialer = OneShotDialer { peer: std::sync::Mutex::new(Some(replacement_server)) };

        let manager = HealthManager::new(
            fast_config(),
            Arc::new(dialer),
            |_| {},
            move |id, peer| {
                *reconnected_clone.lock().unwrap() = Some((id, peer));
            },
        );
        manager.register(server_peer);
        client_peer.close().await;

        manager.spawn_loops();
        tokio::time::sleep(Duration::from_millis(300)).await;

        // The manager keys reconnects by the originally registered NodeId,
        // so a successful redial restores that same key to Healthy even
        // though the replacement connection is a fresh socket pair.
        assert_eq!(manager.status(client_id), Some(Status::Healthy));
        assert!(reconnected.lock().unwrap().is_some());
        manager.shutdown();
    }
}
