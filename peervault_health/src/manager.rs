use crate::dialer::Dialer;
use crate::status::{PeerInfo, Status};
use dashmap::DashMap;
use parking_lot::Mutex;
use peervault_core::NodeId;
use peervault_transport::Peer;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Tunables for the health manager.
#[derive(Debug, Clone, Copy)]
pub struct HealthConfig {
    pub heartbeat_interval: Duration,
    pub health_timeout: Duration,
    pub reconnect_interval: Duration,
    pub max_reconnect_attempts: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            health_timeout: Duration::from_secs(90),
            reconnect_interval: Duration::from_secs(5),
            max_reconnect_attempts: 5,
        }
    }
}

struct PeerEntry {
    info: PeerInfo,
    peer: Arc<Peer>,
}

type DisconnectCallback = dyn Fn(NodeId) + Send + Sync;
type ReconnectCallback = dyn Fn(NodeId, Arc<Peer>) + Send + Sync;

/// Tracks every peer's liveness and drives reconnect-with-backoff. Owns no
/// peers itself beyond what [`HealthManager::register`]
/// hands it; a node registers a peer on successful handshake and the
/// manager takes it from there, invoking the disconnect/reconnect
/// callbacks so the node can keep its own peer map and resource manager in
/// sync without this crate knowing about either.
pub struct HealthManager {
    config: HealthConfig,
    peers: DashMap<NodeId, Mutex<PeerEntry>>,
    dialer: Arc<dyn Dialer>,
    on_disconnect: Arc<DisconnectCallback>,
    on_reconnect: Arc<ReconnectCallback>,
    shutdown: CancellationToken,
}

impl HealthManager {
    pub fn new(
        config: HealthConfig,
        dialer: Arc<dyn Dialer>,
        on_disconnect: impl Fn(NodeId) + Send + Sync + 'static,
        on_reconnect: impl Fn(NodeId, Arc<Peer>) + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            peers: DashMap::new(),
            dialer,
            on_disconnect: Arc::new(on_disconnect),
            on_reconnect: Arc::new(on_reconnect),
            shutdown: CancellationToken::new(),
        })
    }

    /// Adds a peer on successful handshake, starting it out `Healthy`.
    pub fn register(&self, peer: Arc<Peer>) {
        let info = PeerInfo::new(peer.remote_addr(), self.config.reconnect_interval);
        self.peers.insert(peer.remote_id(), Mutex::new(PeerEntry { info, peer }));
    }

    /// Snapshot of currently-healthy peers, used by replication. A peer
    /// absent from this set must never be targeted for broadcast or
    /// replication.
    pub fn healthy_peers(&self) -> Vec<Arc<Peer>> {
        self.peers
            .iter()
            .filter_map(|entry| {
                let entry = entry.value().lock();
                (entry.info.status == Status::Healthy).then(|| Arc::clone(&entry.peer))
            })
            .collect()
    }

    pub fn status(&self, peer: NodeId) -> Option<Status> {
        self.peers.get(&peer).map(|entry| entry.lock().info.status)
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Forces a peer straight to `Unhealthy` outside the normal heartbeat
    /// path — used when a protocol error on an established peer means the
    /// connection should be closed and reported unhealthy. A no-op if the
    /// peer is already `Unhealthy` or `Disconnected`.
    pub fn mark_unhealthy(&self, node_id: NodeId) {
        self.mark_unhealthy_inner(node_id);
    }

    /// Spawns the heartbeat and health-check loops. Returns their join
    /// handles so the owner can await clean shutdown.
    pub fn spawn_loops(self: &Arc<Self>) -> (tokio::task::JoinHandle<()>, tokio::task::JoinHandle<()>) {
        let heartbeat = {
            let this = Arc::clone(self);
            tokio::spawn(async move { this.heartbeat_loop().await })
        };
        let health_check = {
            let this = Arc::clone(self);
            tokio::spawn(async move { this.health_check_loop().await })
        };
        (heartbeat, health_check)
    }

    /// Stops both loops. Any peer left registered keeps its last known
    /// status; the owner is expected to tear down peers itself.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    async fn heartbeat_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.heartbeat_interval);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = ticker.tick() => self.send_heartbeats().await,
            }
        }
    }

    /// Sends an empty-payload message frame to every `Healthy` peer as a
    /// liveness probe. It carries no envelope tag the receiver needs to
    /// act on: a zero-length frame fails envelope decoding harmlessly on
    /// the far side and is logged and dropped there, exactly like any
    /// other malformed frame — a single bad peer never fails an operation
    /// for the caller. This keeps heartbeats off the four-variant envelope
    /// tagged union entirely.
    async fn send_heartbeats(&self) {
        let targets: Vec<(NodeId, Arc<Peer>)> = self
            .peers
            .iter()
            .filter_map(|entry| {
                let entry = entry.value().lock();
                (entry.info.status == Status::Healthy)
                    .then(|| (peer_key(&entry), Arc::clone(&entry.peer)))
            })
            .collect();

        for (node_id, peer) in targets {
            match peer.send_message(&[]).await {
                Ok(()) => {
                    if let Some(entry) = self.peers.get(&node_id) {
                        let mut entry = entry.lock();
                        entry.info.last_heartbeat = Instant::now();
                        entry.info.last_seen = Instant::now();
                    }
                }
                Err(e) => {
                    debug!(peer = %node_id, error = %e, "heartbeat send failed, marking unhealthy");
                    self.mark_unhealthy_inner(node_id);
                }
            }
        }
    }

    fn mark_unhealthy_inner(&self, node_id: NodeId) {
        if let Some(entry) = self.peers.get(&node_id) {
            let mut entry = entry.lock();
            if entry.info.status == Status::Healthy {
                entry.info.status = Status::Unhealthy;
                entry.info.reconnect_backoff = self.config.reconnect_interval;
                entry.info.next_reconnect_at = Instant::now() + self.config.reconnect_interval;
            }
        }
    }

    async fn health_check_loop(self: Arc<Self>) {
        // Polling at health_timeout/2 alone is fine for noticing a dead
        // heartbeat, but it's too coarse to honor the reconnect backoff
        // cadence in between attempts: a peer whose next_reconnect_at
        // lands shortly after a tick would otherwise wait most of another
        // health_timeout/2 before being retried. Tick at whichever is
        // finer so reconnect spacing actually tracks `reconnect_interval`
        // and its ×1.5 backoff instead of the health-timeout tick.
        let tick = self.config.health_timeout.div_f64(2.0).min(self.config.reconnect_interval).max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval(tick);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = ticker.tick() => self.run_health_check().await,
            }
        }
    }

    async fn run_health_check(&self) {
        let node_ids: Vec<NodeId> = self.peers.iter().map(|e| *e.key()).collect();

        for node_id in node_ids {
            let action = self.decide_action(node_id);
            match action {
                Action::None => {}
                Action::Disconnect => self.finalize_disconnect(node_id),
                Action::Reconnect(addr) => self.attempt_reconnect(node_id, addr).await,
            }
        }
    }

    fn decide_action(&self, node_id: NodeId) -> Action {
        let Some(entry) = self.peers.get(&node_id) else {
            return Action::None;
        };
        let mut entry = entry.lock();
        match entry.info.status {
            Status::Healthy => {
                if entry.info.last_heartbeat.elapsed() > self.config.health_timeout {
                    entry.info.status = Status::Unhealthy;
                    entry.info.reconnect_backoff = self.config.reconnect_interval;
                    entry.info.next_reconnect_at = Instant::now() + self.config.reconnect_interval;
                }
                Action::None
            }
            Status::Unhealthy => {
                if entry.info.reconnect_attempts >= self.config.max_reconnect_attempts {
                    Action::Disconnect
                } else if Instant::now() >= entry.info.next_reconnect_at {
                    Action::Reconnect(entry.info.address)
                } else {
                    Action::None
                }
            }
            Status::Disconnected => Action::None,
        }
    }

    fn finalize_disconnect(&self, node_id: NodeId) {
        if self.peers.remove(&node_id).is_some() {
            warn!(peer = %node_id, "peer disconnected: exceeded max reconnect attempts");
            (self.on_disconnect)(node_id);
        }
    }

    async fn attempt_reconnect(&self, node_id: NodeId, addr: SocketAddr) {
        match self.dialer.dial(addr).await {
            Ok(new_peer) => {
                if let Some(entry) = self.peers.get(&node_id) {
                    let mut entry = entry.lock();
                    entry.peer = Arc::clone(&new_peer);
                    entry.info.status = Status::Healthy;
                    entry.info.reconnect_attempts = 0;
                    entry.info.reconnect_backoff = self.config.reconnect_interval;
                    entry.info.last_heartbeat = Instant::now();
                    entry.info.last_seen = Instant::now();
                }
                info!(peer = %node_id, "reconnected");
                (self.on_reconnect)(node_id, new_peer);
            }
            Err(e) => {
                if let Some(entry) = self.peers.get(&node_id) {
                    let mut entry = entry.lock();
                    entry.info.reconnect_attempts += 1;
                    entry.info.reconnect_backoff = entry.info.reconnect_backoff.mul_f64(1.5);
                    entry.info.next_reconnect_at = Instant::now() + entry.info.reconnect_backoff;
                }
                debug!(peer = %node_id, error = %e, "reconnect attempt failed");
            }
        }
    }
}

enum Action {
    None,
    Disconnect,
    Reconnect(SocketAddr),
}

fn peer_key(entry: &PeerEntry) -> NodeId {
    entry.peer.remote_id()
}
