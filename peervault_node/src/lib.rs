//! The file-server core that ties the lower crates into a running PeerVault
//! node: `Store`/`Get`, resilient fan-out replication, and inbound dispatch
//! of the four-variant [`Envelope`] over every connected peer.
//!
//! A [`Node`] owns exactly one of each: [`Store`], [`Transport`],
//! [`HealthManager`], [`ResourceManager`], and a peer map. [`Node::on_peer`]
//! is the only place a peer is added to the peer map, health manager, and
//! (lazily, via the resource manager's per-peer tracker) resource
//! accounting, so those three always advance together; the health
//! manager's disconnect/reconnect callbacks are the only place a peer
//! leaves or re-enters that set. No background loop mutates the peer map
//! directly.

pub mod config;
pub mod identity;

use config::NodeConfig;
use dashmap::DashMap;
use futures::future::join_all;
use peervault_core::{ContentKey, EncryptionKey, Envelope, HashedKey, NodeId, PeerVaultError, RequestId, Result};
use peervault_health::{HealthConfig, HealthManager};
use peervault_resource::ResourceManager;
use peervault_store::{LocalStore, Store, storage_root_for_listen_addr};
use peervault_transport::{Listener, Peer, Transport};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const REPLICATION_ATTEMPTS: u32 = 3;
const REPLICATION_RETRY_DELAY: Duration = Duration::from_millis(50);
/// Upper bound on how long `get` waits for `GetFileAck`s once a `GetFile`
/// broadcast has gone out, even if every peer that accepted the request
/// frame then stalls or dies before acking. Keeps "a single bad peer never
/// fails an operation for the caller" (spec §7) true for silent peers, not
/// just ones that error outright.
const GET_BROADCAST_TIMEOUT: Duration = Duration::from_secs(30);

/// A running PeerVault node. Constructed with [`Node::start`], torn down
/// with [`Node::stop`].
pub struct Node {
    config: NodeConfig,
    local_id: NodeId,
    bound_addr: SocketAddr,
    encryption_key: EncryptionKey,
    store: Arc<dyn Store>,
    transport: Transport,
    resource: Arc<ResourceManager>,
    health: Arc<HealthManager>,
    peers: DashMap<NodeId, Arc<Peer>>,
    pending_gets: DashMap<RequestId, Arc<PendingGet>>,
    shutdown: CancellationToken,
    tasks: std::sync::Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

/// Outcome of a single in-flight `GetFile` broadcast, resolved by whichever
/// peer's [`Envelope::GetFileAck`] answers it first.
enum GetOutcome {
    Found,
    NotFound,
}

/// Tracks how many of the peers a `GetFile` was broadcast to have answered,
/// so the broadcast resolves to `NotFound` once every peer has said no or
/// errored, rather than hanging forever.
struct PendingGet {
    remaining: AtomicUsize,
    tx: std::sync::Mutex<Option<oneshot::Sender<GetOutcome>>>,
}

impl Node {
    /// Builds every owned component, binds the listener, spawns the accept
    /// loop and the health manager's two background loops, then dials each
    /// configured bootstrap address before returning. Construction errors
    /// (bad config, bind failure) are reported with `anyhow`; typed
    /// [`PeerVaultError`]s are reserved for node operations once it's
    /// running.
    ///
    /// `config_dir` resolves a relative [`config::EncryptionKeySource::File`]
    /// path the same way a CLI resolves it relative to the config file it
    /// loaded `config` from.
    pub async fn start(config: NodeConfig, config_dir: Option<&Path>) -> anyhow::Result<Arc<Node>> {
        let local_id = NodeId::generate();
        let encryption_key = identity::load_encryption_key(&config.encryption_key, config_dir)
            .map_err(|e| anyhow::anyhow!("failed to load encryption key: {e}"))?;

        let listen_addr: SocketAddr = config
            .listen_addr
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid listen_addr {:?}: {e}", config.listen_addr))?;

        let storage_root =
            storage_root_for_listen_addr(config.storage_root_prefix.as_deref(), &config.listen_addr);
        let store: Arc<dyn Store> = Arc::new(LocalStore::new(storage_root));

        let transport = Transport::new(local_id, config.shared_secret.clone().into_bytes());
        let listener = transport.listen(listen_addr).await?;
        let bound_addr = listener.local_addr()?;

        let resource = Arc::new(ResourceManager::new(config.resource_limits.into()));
        let health_config: HealthConfig = config.health.into();
        let dialer = transport.clone();

        let node = Arc::new_cyclic(|weak: &Weak<Node>| {
            let disconnect_weak = weak.clone();
            let reconnect_weak = weak.clone();
            let health = HealthManager::new(
                health_config,
                Arc::new(dialer),
                move |node_id| {
                    if let Some(node) = disconnect_weak.upgrade() {
                        node.handle_peer_disconnect(node_id);
                    }
                },
                move |node_id, peer| {
                    if let Some(node) = reconnect_weak.upgrade() {
                        node.handle_peer_reconnect(node_id, peer);
                    }
                },
            );

            Node {
                config,
                local_id,
                bound_addr,
                encryption_key,
                store,
                transport,
                resource,
                health,
                peers: DashMap::new(),
                pending_gets: DashMap::new(),
                shutdown: CancellationToken::new(),
                tasks: std::sync::Mutex::new(Vec::new()),
            }
        });

        let (heartbeat_handle, health_check_handle) = node.health.spawn_loops();
        node.tasks.lock().unwrap().extend([heartbeat_handle, health_check_handle]);

        let accept_node = Arc::clone(&node);
        let accept_handle = tokio::spawn(async move { accept_node.accept_loop(listener).await });
        node.tasks.lock().unwrap().push(accept_handle);

        for addr_str in &node.config.bootstrap_nodes {
            match addr_str.parse::<SocketAddr>() {
                Ok(addr) => match node.transport.dial(addr).await {
                    Ok(peer) => node.on_peer(peer),
                    Err(e) => warn!(addr = %addr_str, error = %e, "bootstrap dial failed"),
                },
                Err(e) => warn!(addr = %addr_str, error = %e, "invalid bootstrap address"),
            }
        }

        info!(node = %local_id, addr = %bound_addr, "node started");
        Ok(node)
    }

    /// Cancels every background loop, shuts down the health and resource
    /// managers, closes every live peer, then joins the tasks spawned by
    /// [`Node::start`].
    pub async fn stop(&self) {
        self.shutdown.cancel();
        self.health.shutdown();
        self.resource.shutdown();
        for entry in self.peers.iter() {
            entry.value().close().await;
        }
        let handles: Vec<_> = self.tasks.lock().unwrap().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
        info!(node = %self.local_id, "node stopped");
    }

    pub fn local_id(&self) -> NodeId {
        self.local_id
    }

    pub fn bound_addr(&self) -> SocketAddr {
        self.bound_addr
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Writes `reader`'s bytes under `key`, then broadcasts the store
    /// announcement and replicates to every healthy peer.
    ///
    /// Honors `cancel`: each per-peer replication attempt races `cancel`
    /// against its own resource-slot timeout, so cancelling aborts every
    /// in-flight stream rather than leaving them to run to completion.
    pub async fn store(
        self: &Arc<Self>,
        key: &ContentKey,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        cancel: &CancellationToken,
    ) -> Result<()> {
        let hashed = HashedKey::compute(key);
        let size = self
            .store
            .write_hashed_with_codec(&self.encryption_key, &hashed, reader)
            .await?;

        let healthy = self.health.healthy_peers();
        if healthy.is_empty() {
            return Ok(());
        }

        let announce = Envelope::StoreFile {
            sender_id: self.local_id,
            request_id: RequestId::generate(),
            hashed_key: hashed,
            size,
        };
        let payload = announce.encode();
        for peer in &healthy {
            if let Err(e) = peer.send_message(&payload).await {
                debug!(peer = %peer.remote_id(), error = %e, "store announcement failed");
            }
        }

        let results =
            join_all(healthy.iter().map(|peer| self.replicate_to_peer(peer, &hashed, cancel))).await;
        let completed = results.into_iter().filter(|ok| *ok).count();
        if completed >= 1 {
            Ok(())
        } else {
            Err(PeerVaultError::ReplicationFailed { attempted: healthy.len() })
        }
    }

    /// Returns `key`'s decrypted bytes, reading locally if present,
    /// otherwise racing a broadcast `GetFile` across every healthy peer.
    ///
    /// The wait for an answering `GetFileAck` is bounded two ways:
    /// `cancel` lets the caller abort early, and [`GET_BROADCAST_TIMEOUT`]
    /// caps the wait even if `cancel` never fires, so a peer that accepts
    /// the request frame and then stalls or dies before acking cannot hang
    /// this call forever.
    pub async fn get(
        self: &Arc<Self>,
        key: &ContentKey,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn AsyncRead + Send + Unpin>> {
        let hashed = HashedKey::compute(key);
        if self.store.has_hashed(&hashed).await {
            return self.open_decrypted(&hashed).await;
        }

        let healthy = self.health.healthy_peers();
        if healthy.is_empty() {
            return Err(PeerVaultError::NotFound(hashed.as_hex()));
        }

        let request_id = RequestId::generate();
        let (tx, rx) = oneshot::channel();
        let pending = Arc::new(PendingGet {
            remaining: AtomicUsize::new(healthy.len()),
            tx: std::sync::Mutex::new(Some(tx)),
        });
        self.pending_gets.insert(request_id, pending);

        let request = Envelope::GetFile { sender_id: self.local_id, request_id, hashed_key: hashed };
        let payload = request.encode();
        for peer in &healthy {
            if peer.send_message(&payload).await.is_err() {
                self.note_get_miss(request_id);
            }
        }

        let outcome = tokio::select! {
            result = rx => result.unwrap_or(GetOutcome::NotFound),
            _ = cancel.cancelled() => GetOutcome::NotFound,
            _ = self.shutdown.cancelled() => GetOutcome::NotFound,
            _ = tokio::time::sleep(GET_BROADCAST_TIMEOUT) => GetOutcome::NotFound,
        };
        self.pending_gets.remove(&request_id);
        match outcome {
            GetOutcome::Found => self.open_decrypted(&hashed).await,
            GetOutcome::NotFound => Err(PeerVaultError::NotFound(hashed.as_hex())),
        }
    }

    /// Adds a freshly handshaken peer to the peer map and the health
    /// manager, and starts its dispatch loop. The single mutation point
    /// for bringing a peer into the live set.
    fn on_peer(self: &Arc<Self>, peer: Arc<Peer>) {
        self.peers.insert(peer.remote_id(), Arc::clone(&peer));
        self.health.register(Arc::clone(&peer));
        self.spawn_dispatch_loop(peer);
    }

    fn handle_peer_disconnect(self: &Arc<Self>, node_id: NodeId) {
        self.peers.remove(&node_id);
        self.resource.shutdown_peer(node_id);
        info!(peer = %node_id, "peer left the live set");
    }

    fn handle_peer_reconnect(self: &Arc<Self>, node_id: NodeId, peer: Arc<Peer>) {
        self.peers.insert(node_id, Arc::clone(&peer));
        self.spawn_dispatch_loop(peer);
    }

    fn spawn_dispatch_loop(self: &Arc<Self>, peer: Arc<Peer>) {
        let node = Arc::clone(self);
        let handle = tokio::spawn(async move { node.dispatch_loop(peer).await });
        self.tasks.lock().unwrap().push(handle);
    }

    async fn accept_loop(self: Arc<Self>, listener: Listener) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                result = listener.accept() => {
                    match result {
                        Ok(peer) => self.on_peer(peer),
                        Err(e) => {
                            warn!(error = %e, "accept loop terminated");
                            return;
                        }
                    }
                }
            }
        }
    }

    /// One per peer. Consumes decoded message frames sequentially; a
    /// peer's heartbeat probe is an empty-payload frame and is skipped
    /// before reaching the envelope codec, matching `peervault_health`'s
    /// heartbeat sender. A decode failure on a non-empty frame is a
    /// protocol error: the peer is marked `Unhealthy` and closed.
    async fn dispatch_loop(self: Arc<Self>, peer: Arc<Peer>) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                message = peer.recv_message() => {
                    let Some(payload) = message else {
                        debug!(peer = %peer.remote_id(), "peer connection closed");
                        return;
                    };
                    if payload.is_empty() {
                        continue;
                    }
                    match Envelope::decode(payload) {
                        Ok(envelope) => self.handle_envelope(&peer, envelope).await,
                        Err(e) => {
                            warn!(peer = %peer.remote_id(), error = %e, "protocol error, closing peer");
                            self.health.mark_unhealthy(peer.remote_id());
                            peer.close().await;
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn handle_envelope(self: &Arc<Self>, peer: &Arc<Peer>, envelope: Envelope) {
        match envelope {
            Envelope::StoreFile { request_id, hashed_key, size, .. } => {
                self.handle_store_file(peer, request_id, hashed_key, size).await
            }
            Envelope::GetFile { request_id, hashed_key, .. } => {
                self.handle_get_file(peer, request_id, hashed_key).await
            }
            Envelope::StoreFileAck { success, error, .. } => self.handle_store_file_ack(peer, success, error),
            Envelope::GetFileAck { request_id, hashed_key, has_file, size } => {
                self.handle_get_file_ack(peer, request_id, hashed_key, has_file, size).await
            }
        }
    }

    /// Inbound `StoreFile`. The bytes that follow are already ciphertext —
    /// the sender produced them by reading its own encrypted CAS blob in
    /// [`Node::replicate_to_peer`] — so they are written verbatim rather
    /// than re-encrypted or decrypted. See DESIGN.md for the
    /// ciphertext-at-rest decision this embodies.
    async fn handle_store_file(
        self: &Arc<Self>,
        peer: &Arc<Peer>,
        request_id: RequestId,
        hashed_key: HashedKey,
        size: u64,
    ) {
        let body = match peer.recv_stream().await {
            Ok(body) => body,
            Err(e) => {
                warn!(peer = %peer.remote_id(), error = %e, "failed to receive store stream");
                return;
            }
        };
        let mut bounded = body.take(size);
        let result = self.store.write_hashed(&hashed_key, &mut bounded).await;
        let ack = match &result {
            Ok(_) => Envelope::StoreFileAck { request_id, hashed_key, success: true, error: None },
            Err(e) => Envelope::StoreFileAck {
                request_id,
                hashed_key,
                success: false,
                error: Some(e.to_string()),
            },
        };
        if let Err(e) = peer.send_message(&ack.encode()).await {
            debug!(peer = %peer.remote_id(), error = %e, "failed to send store ack");
        }
    }

    /// Inbound `GetFile`.
    async fn handle_get_file(self: &Arc<Self>, peer: &Arc<Peer>, request_id: RequestId, hashed_key: HashedKey) {
        if !self.store.has_hashed(&hashed_key).await {
            let ack = Envelope::GetFileAck { request_id, hashed_key, has_file: false, size: None };
            let _ = peer.send_message(&ack.encode()).await;
            return;
        }

        match self.store.read_hashed(&hashed_key).await {
            Ok((size, mut reader)) => {
                let ack = Envelope::GetFileAck { request_id, hashed_key, has_file: true, size: Some(size) };
                if peer.send_message(&ack.encode()).await.is_ok()
                    && let Err(e) = peer.send_stream(&mut reader).await
                {
                    debug!(peer = %peer.remote_id(), error = %e, "failed to stream blob to peer");
                }
            }
            Err(e) => {
                warn!(peer = %peer.remote_id(), error = %e, "local read failed for requested key");
                let ack = Envelope::GetFileAck { request_id, hashed_key, has_file: false, size: None };
                let _ = peer.send_message(&ack.encode()).await;
            }
        }
    }

    fn handle_store_file_ack(&self, peer: &Arc<Peer>, success: bool, error: Option<String>) {
        if success {
            debug!(peer = %peer.remote_id(), "peer acknowledged store");
        } else {
            warn!(peer = %peer.remote_id(), error = ?error, "peer reported store failure");
        }
    }

    /// Inbound `GetFileAck`. The stream body (when present) is always
    /// drained to keep the peer's framing in sync, but its bytes are only
    /// written to the local store if this is the peer that wins the race
    /// for `request_id` — a later or duplicate ack for an already-resolved
    /// request has its bytes read and discarded.
    async fn handle_get_file_ack(
        self: &Arc<Self>,
        peer: &Arc<Peer>,
        request_id: RequestId,
        hashed_key: HashedKey,
        has_file: bool,
        size: Option<u64>,
    ) {
        if !has_file {
            self.note_get_miss(request_id);
            return;
        }
        let Some(size) = size else {
            self.note_get_miss(request_id);
            return;
        };

        let body = match peer.recv_stream().await {
            Ok(body) => body,
            Err(e) => {
                warn!(peer = %peer.remote_id(), error = %e, "failed to receive get response stream");
                self.note_get_miss(request_id);
                return;
            }
        };
        let mut bounded = body.take(size);

        match self.try_claim_get(request_id) {
            Some(tx) => {
                let outcome = match self.store.write_hashed(&hashed_key, &mut bounded).await {
                    Ok(_) => GetOutcome::Found,
                    Err(e) => {
                        warn!(peer = %peer.remote_id(), error = %e, "failed to store fetched blob");
                        GetOutcome::NotFound
                    }
                };
                let _ = tx.send(outcome);
                self.pending_gets.remove(&request_id);
            }
            None => {
                let mut sink = tokio::io::sink();
                let _ = tokio::io::copy(&mut bounded, &mut sink).await;
            }
        }
    }

    fn try_claim_get(&self, request_id: RequestId) -> Option<oneshot::Sender<GetOutcome>> {
        self.pending_gets.get(&request_id).and_then(|p| p.tx.lock().unwrap().take())
    }

    /// Records that one of the peers a `GetFile` was broadcast to has
    /// answered (or will never answer) negatively. Resolves the broadcast
    /// to `NotFound` once every peer has been accounted for.
    fn note_get_miss(&self, request_id: RequestId) {
        let Some(pending) = self.pending_gets.get(&request_id) else { return };
        if pending.remaining.fetch_sub(1, Ordering::AcqRel) == 1
            && let Some(tx) = pending.tx.lock().unwrap().take()
        {
            let _ = tx.send(GetOutcome::NotFound);
        }
    }

    /// Streams the local CAS blob for `hashed` to `peer`, retrying up to
    /// `REPLICATION_ATTEMPTS` times with a fixed short delay between
    /// attempts. Each attempt races the stream send against both the
    /// per-attempt resource slot's cancellation token and the caller's
    /// `cancel`, so a timeout, peer shutdown, or caller-initiated
    /// cancellation aborts the attempt instead of hanging it.
    async fn replicate_to_peer(&self, peer: &Arc<Peer>, hashed_key: &HashedKey, cancel: &CancellationToken) -> bool {
        for attempt in 1..=REPLICATION_ATTEMPTS {
            if cancel.is_cancelled() {
                return false;
            }

            let stream_id = RequestId::generate();
            let guard = match self.resource.acquire(peer.remote_id(), stream_id) {
                Ok(guard) => guard,
                Err(e) => {
                    debug!(peer = %peer.remote_id(), error = %e, attempt, "replication slot unavailable");
                    tokio::time::sleep(REPLICATION_RETRY_DELAY).await;
                    continue;
                }
            };

            let mut reader = match self.store.read_hashed(hashed_key).await {
                Ok((_, reader)) => reader,
                Err(e) => {
                    warn!(peer = %peer.remote_id(), error = %e, "local blob unreadable, aborting replication");
                    return false;
                }
            };

            let sent = tokio::select! {
                _ = guard.token().cancelled() => Err(PeerVaultError::StreamTimeout),
                _ = cancel.cancelled() => Err(PeerVaultError::StreamTimeout),
                result = peer.send_stream(&mut reader) => result,
            };
            drop(guard);

            match sent {
                Ok(_) => return true,
                Err(e) => {
                    debug!(peer = %peer.remote_id(), error = %e, attempt, "replication stream attempt failed");
                    tokio::time::sleep(REPLICATION_RETRY_DELAY).await;
                }
            }
        }
        false
    }

    /// Opens a decrypting reader over the local CAS blob for `hashed`.
    /// Every blob on disk is ciphertext (IV prefix + AES-CTR output), so
    /// this is the single place plaintext is ever produced.
    async fn open_decrypted(&self, hashed: &HashedKey) -> Result<Box<dyn AsyncRead + Send + Unpin>> {
        let (_, mut ciphertext) = self.store.read_hashed(hashed).await?;
        let key = self.encryption_key.clone();
        let (reader, mut writer) = tokio::io::duplex(64 * 1024);
        tokio::spawn(async move {
            if let Err(e) = peervault_crypto::decrypt_stream(&key, &mut ciphertext, &mut writer).await {
                warn!(error = %e, "decrypt stream failed");
            }
        });
        Ok(Box::new(reader))
    }
}
