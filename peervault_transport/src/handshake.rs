//! The authenticated handshake run immediately after a TCP connection is
//! established: `MAGIC(4) || NodeID(32) || HMAC-SHA256(secret,
//! MAGIC||NodeID)(32)`, exchanged within a bounded time window. Reads a
//! fixed header synchronously with `read_exact` and rejects anything that
//! doesn't parse before trusting the connection.

use hmac::{Hmac, Mac};
use peervault_core::{NodeId, PeerVaultError, Result};
use sha2::Sha256;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

pub const MAGIC: [u8; 4] = *b"PVL1";
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

const NODE_ID_LEN: usize = 32;
const HMAC_LEN: usize = 32;
const HANDSHAKE_LEN: usize = MAGIC.len() + NODE_ID_LEN + HMAC_LEN;

type HmacSha256 = Hmac<Sha256>;

fn compute_hmac(secret: &[u8], node_id: &NodeId) -> [u8; HMAC_LEN] {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts a key of any length");
    mac.update(&MAGIC);
    mac.update(node_id.as_bytes());
    mac.finalize().into_bytes().into()
}

/// Runs both sides of the handshake over an already-connected duplex stream
/// and returns the verified remote [`NodeId`]. Each side writes its own
/// greeting before reading the peer's, so neither blocks waiting for the
/// other to go first.
pub async fn perform<S>(
    stream: &mut S,
    local_id: NodeId,
    shared_secret: &[u8],
    deadline: Duration,
) -> Result<NodeId>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    timeout(deadline, run(stream, local_id, shared_secret))
        .await
        .map_err(|_| PeerVaultError::HandshakeFailed("timed out".to_string()))?
}

async fn run<S>(stream: &mut S, local_id: NodeId, shared_secret: &[u8]) -> Result<NodeId>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut greeting = Vec::with_capacity(HANDSHAKE_LEN);
    greeting.extend_from_slice(&MAGIC);
    greeting.extend_from_slice(local_id.as_bytes());
    greeting.extend_from_slice(&compute_hmac(shared_secret, &local_id));
    stream
        .write_all(&greeting)
        .await
        .map_err(|e| PeerVaultError::HandshakeFailed(e.to_string()))?;

    let mut incoming = [0u8; HANDSHAKE_LEN];
    stream
        .read_exact(&mut incoming)
        .await
        .map_err(|e| PeerVaultError::HandshakeFailed(e.to_string()))?;

    if incoming[..MAGIC.len()] != MAGIC {
        return Err(PeerVaultError::HandshakeFailed("bad magic".to_string()));
    }

    let mut remote_id_bytes = [0u8; NODE_ID_LEN];
    remote_id_bytes.copy_from_slice(&incoming[MAGIC.len()..MAGIC.len() + NODE_ID_LEN]);
    let remote_id = NodeId::from_bytes(remote_id_bytes);

    let expected_hmac = compute_hmac(shared_secret, &remote_id);
    let received_hmac = &incoming[MAGIC.len() + NODE_ID_LEN..];
    if received_hmac != expected_hmac {
        return Err(PeerVaultError::HandshakeFailed(
            "HMAC verification failed".to_string(),
        ));
    }

    Ok(remote_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn matching_secrets_complete_the_handshake() {
        let (mut a, mut b) = duplex(4096);
        let id_a = NodeId::generate();
        let id_b = NodeId::generate();
        let secret = b"shared-secret".to_vec();

        let side_a = perform(&mut a, id_a, &secret, DEFAULT_HANDSHAKE_TIMEOUT);
        let side_b = perform(&mut b, id_b, &secret, DEFAULT_HANDSHAKE_TIMEOUT);
        let (result_a, result_b) = tokio::join!(side_a, side_b);

        assert_eq!(result_a.unwrap(), id_b);
        assert_eq!(result_b.unwrap(), id_a);
    }

    #[tokio::test]
    async fn mismatched_secrets_are_rejected() {
        let (mut a, mut b) = duplex(4096);
        let id_a = NodeId::generate();
        let id_b = NodeId::generate();

        let side_a = perform(&mut a, id_a, b"secret-one", DEFAULT_HANDSHAKE_TIMEOUT);
        let side_b = perform(&mut b, id_b, b"secret-two", DEFAULT_HANDSHAKE_TIMEOUT);
        let (result_a, result_b) = tokio::join!(side_a, side_b);

        assert!(matches!(result_a, Err(PeerVaultError::HandshakeFailed(_))));
        assert!(matches!(result_b, Err(PeerVaultError::HandshakeFailed(_))));
    }

    #[tokio::test]
    async fn garbage_prefix_is_rejected() {
        let (mut a, mut b) = duplex(4096);
        tokio::spawn(async move {
            let _ = a.write_all(&[0u8; HANDSHAKE_LEN]).await;
        });
        let err = perform(&mut b, NodeId::generate(), b"secret", DEFAULT_HANDSHAKE_TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(err, PeerVaultError::HandshakeFailed(_)));
    }
}
