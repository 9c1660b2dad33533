use crate::handshake;
use crate::peer::Peer;
use peervault_core::{NodeId, PeerVaultError, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, warn};

/// Listens for and dials framed, authenticated TCP connections. Every
/// established [`Peer`] it returns has already completed the handshake.
#[derive(Clone)]
pub struct Transport {
    local_id: NodeId,
    shared_secret: Arc<[u8]>,
    handshake_timeout: Duration,
}

impl Transport {
    pub fn new(local_id: NodeId, shared_secret: impl Into<Arc<[u8]>>) -> Self {
        Self {
            local_id,
            shared_secret: shared_secret.into(),
            handshake_timeout: handshake::DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Binds `addr` and returns a [`Listener`] that yields handshaken peers.
    pub async fn listen(&self, addr: SocketAddr) -> Result<Listener> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(PeerVaultError::StorageError)?;
        Ok(Listener {
            listener,
            transport: self.clone(),
        })
    }

    /// Connects to `addr` and runs the handshake as the dialing side.
    pub async fn dial(&self, addr: SocketAddr) -> Result<Arc<Peer>> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| PeerVaultError::TransportError {
                peer: addr.to_string(),
                source: e,
            })?;
        self.complete_handshake(addr, stream).await
    }

    async fn complete_handshake(&self, addr: SocketAddr, mut stream: TcpStream) -> Result<Arc<Peer>> {
        let remote_id = handshake::perform(
            &mut stream,
            self.local_id,
            &self.shared_secret,
            self.handshake_timeout,
        )
        .await?;
        let (read_half, write_half) = stream.into_split();
        debug!(peer = %addr, remote = %remote_id, "peer handshake complete");
        Ok(Peer::spawn(addr, remote_id, read_half, write_half))
    }
}

/// Accepts inbound connections and runs the handshake on each before
/// handing back a registered [`Peer`].
pub struct Listener {
    listener: TcpListener,
    transport: Transport,
}

impl Listener {
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts the next connection and runs the handshake as the
    /// accepting side. A peer that fails the handshake is dropped and
    /// logged rather than propagated, since one bad dial attempt must
    /// never bring down the accept loop.
    pub async fn accept(&self) -> Result<Arc<Peer>> {
        loop {
            let (stream, addr) = self
                .listener
                .accept()
                .await
                .map_err(PeerVaultError::StorageError)?;
            match self.transport.complete_handshake(addr, stream).await {
                Ok(peer) => return Ok(peer),
                Err(e) => {
                    warn!(peer = %addr, error = %e, "rejecting peer: handshake failed");
                    continue;
                }
            }
        }
    }
}
