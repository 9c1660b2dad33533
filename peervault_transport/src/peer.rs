use crate::frame::{FRAME_MESSAGE, FRAME_STREAM};
use crate::stream_body::{StreamBody, StreamHandoff};
use bytes::Bytes;
use peervault_core::{NodeId, PeerVaultError, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tracing::{debug, warn};

const INBOUND_QUEUE_DEPTH: usize = 256;
const STREAM_QUEUE_DEPTH: usize = 4;

/// A single accepted or dialed connection, already past the handshake.
/// Exactly one per remote address lives in a node's peer map; destroyed on
/// close or health-manager disconnect.
///
/// Holds the write half directly behind a send lock: writes are serialized
/// per peer because a message frame and a stream must never interleave on
/// the wire. The read half lives inside the background read-loop task and
/// is handed out to [`Peer::recv_stream`] callers only for the duration of
/// one stream frame.
pub struct Peer {
    remote_addr: SocketAddr,
    remote_id: NodeId,
    write_half: Arc<Mutex<OwnedWriteHalf>>,
    inbound_rx: Mutex<mpsc::Receiver<Bytes>>,
    stream_rx: Mutex<mpsc::Receiver<StreamHandoff>>,
    close_tx: watch::Sender<bool>,
}

impl Peer {
    pub(crate) fn spawn(
        remote_addr: SocketAddr,
        remote_id: NodeId,
        read_half: OwnedReadHalf,
        write_half: OwnedWriteHalf,
    ) -> Arc<Peer> {
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE_DEPTH);
        let (stream_tx, stream_rx) = mpsc::channel(STREAM_QUEUE_DEPTH);
        let (close_tx, close_rx) = watch::channel(false);

        let read_half = Arc::new(Mutex::new(read_half));
        tokio::spawn(read_loop(remote_addr, read_half, inbound_tx, stream_tx, close_rx));

        Arc::new(Peer {
            remote_addr,
            remote_id,
            write_half: Arc::new(Mutex::new(write_half)),
            inbound_rx: Mutex::new(inbound_rx),
            stream_rx: Mutex::new(stream_rx),
            close_tx,
        })
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn remote_id(&self) -> NodeId {
        self.remote_id
    }

    /// Writes a length-prefixed envelope frame. Holds the send lock for
    /// the whole write so it can never interleave with a concurrent
    /// [`Peer::send_stream`] call.
    pub async fn send_message(&self, payload: &[u8]) -> Result<()> {
        let mut write_half = self.write_half.lock().await;
        let len = u32::try_from(payload.len())
            .map_err(|_| PeerVaultError::ProtocolError("message too large to frame".to_string()))?;
        write_half
            .write_u8(FRAME_MESSAGE)
            .await
            .map_err(|e| self.transport_error(e))?;
        write_half
            .write_u32(len)
            .await
            .map_err(|e| self.transport_error(e))?;
        write_half
            .write_all(payload)
            .await
            .map_err(|e| self.transport_error(e))?;
        write_half.flush().await.map_err(|e| self.transport_error(e))
    }

    /// Writes a stream frame tag followed by `reader`'s bytes, holding the
    /// send lock for the whole transfer. Returns the number of bytes
    /// copied from `reader`.
    pub async fn send_stream(&self, reader: &mut (dyn AsyncRead + Send + Unpin)) -> Result<u64> {
        let mut write_half = self.write_half.lock().await;
        write_half
            .write_u8(FRAME_STREAM)
            .await
            .map_err(|e| self.transport_error(e))?;
        let written = tokio::io::copy(reader, &mut *write_half)
            .await
            .map_err(|e| self.transport_error(e))?;
        write_half.flush().await.map_err(|e| self.transport_error(e))?;
        Ok(written)
    }

    /// Receives the next decoded message payload, or `None` once the peer
    /// has closed.
    pub async fn recv_message(&self) -> Option<Bytes> {
        self.inbound_rx.lock().await.recv().await
    }

    /// Waits for the read loop to see the next `0x02` stream tag and
    /// returns a reader bounded to that frame's raw bytes. The caller is
    /// expected to already know the expected length (from a prior
    /// envelope field) and should wrap the result in
    /// `AsyncReadExt::take(len)`.
    pub async fn recv_stream(&self) -> Result<StreamBody> {
        let handoff = self
            .stream_rx
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| PeerVaultError::TransportError {
                peer: self.remote_addr.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotConnected, "peer closed"),
            })?;
        Ok(StreamBody::new(handoff))
    }

    /// Terminates the read loop and unblocks any waiter.
    pub async fn close(&self) {
        let _ = self.close_tx.send(true);
        let _ = self.write_half.lock().await.shutdown().await;
    }

    fn transport_error(&self, source: std::io::Error) -> PeerVaultError {
        PeerVaultError::TransportError {
            peer: self.remote_addr.to_string(),
            source,
        }
    }
}

async fn read_loop(
    remote_addr: SocketAddr,
    read_half: Arc<Mutex<OwnedReadHalf>>,
    inbound_tx: mpsc::Sender<Bytes>,
    stream_tx: mpsc::Sender<StreamHandoff>,
    mut close_rx: watch::Receiver<bool>,
) {
    loop {
        let mut guard = tokio::select! {
            _ = close_rx.changed() => {
                debug!(peer = %remote_addr, "read loop closing on request");
                return;
            }
            guard = read_half.clone().lock_owned() => guard,
        };

        let tag = match guard.read_u8().await {
            Ok(tag) => tag,
            Err(_) => {
                debug!(peer = %remote_addr, "read loop ending: connection closed");
                return;
            }
        };

        match tag {
            FRAME_MESSAGE => {
                let len = match guard.read_u32().await {
                    Ok(len) => len as usize,
                    Err(_) => return,
                };
                let mut payload = vec![0u8; len];
                if guard.read_exact(&mut payload).await.is_err() {
                    return;
                }
                drop(guard);
                if inbound_tx.send(Bytes::from(payload)).await.is_err() {
                    return;
                }
            }
            FRAME_STREAM => {
                let (resume_tx, resume_rx) = oneshot::channel();
                let handoff = StreamHandoff { guard, resume: resume_tx };
                if stream_tx.send(handoff).await.is_err() {
                    return;
                }
                // Block until the stream consumer has read exactly the
                // bytes it expected and dropped its StreamBody, handing
                // the read half back to us.
                match resume_rx.await {
                    Ok(_guard) => {}
                    Err(_) => return,
                }
            }
            other => {
                warn!(peer = %remote_addr, tag = other, "unknown frame kind, closing peer");
                return;
            }
        }
    }
}
