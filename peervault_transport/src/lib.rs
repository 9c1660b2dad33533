//! Framed, authenticated TCP peer transport for PeerVault.
//!
//! A [`Transport`] dials or accepts connections, runs the handshake, and
//! hands back a [`Peer`]: message frames decode straight to a channel the
//! node's dispatch loop drains, while stream frames are handed off to
//! whichever caller is waiting for one (see [`stream_body::StreamBody`]).
//! There is no reflective codec or QUIC multiplexing here — frames are a
//! one-byte kind tag plus either a length-prefixed payload or raw bytes of
//! an out-of-band-known length, written and read by hand with
//! `tokio::io::{AsyncReadExt, AsyncWriteExt}`.

mod frame;
mod handshake;
mod peer;
mod stream_body;
mod transport;

pub use frame::{FRAME_MESSAGE, FRAME_STREAM};
pub use handshake::{DEFAULT_HANDSHAKE_TIMEOUT, MAGIC};
pub use peer::Peer;
pub use stream_body::StreamBody;
pub use transport::{Listener, Transport};

#[cfg(test)]
mod tests {
    use super::*;
    use peervault_core::NodeId;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn dial_and_accept_exchange_a_message() {
        let secret = b"shared-secret".to_vec();
        let server = Transport::new(NodeId::generate(), secret.clone());
        let listener = server.listen("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = Transport::new(NodeId::generate(), secret);
        let (client_peer, server_peer) = tokio::join!(client.dial(addr), async { listener.accept().await });
        let client_peer = client_peer.unwrap();
        let server_peer = server_peer.unwrap();

        client_peer.send_message(b"hello").await.unwrap();
        let received = server_peer.recv_message().await.unwrap();
        assert_eq!(&received[..], b"hello");
    }

    #[tokio::test]
    async fn mismatched_secret_is_rejected_by_the_accept_loop() {
        let server = Transport::new(NodeId::generate(), b"server-secret".to_vec());
        let listener = server.listen("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = Transport::new(NodeId::generate(), b"client-secret".to_vec());
        let dial_result = client.dial(addr).await;
        assert!(dial_result.is_err());
    }

    #[tokio::test]
    async fn stream_frame_delivers_exact_byte_count() {
        let secret = b"shared-secret".to_vec();
        let server = Transport::new(NodeId::generate(), secret.clone());
        let listener = server.listen("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = Transport::new(NodeId::generate(), secret);
        let (client_peer, server_peer) = tokio::join!(client.dial(addr), async { listener.accept().await });
        let client_peer = client_peer.unwrap();
        let server_peer = server_peer.unwrap();

        let payload = b"streamed ciphertext bytes".to_vec();
        let sender = {
            let payload = payload.clone();
            let client_peer = client_peer.clone();
            tokio::spawn(async move {
                let mut reader = std::io::Cursor::new(payload);
                client_peer.send_stream(&mut reader).await.unwrap();
            })
        };

        let body = server_peer.recv_stream().await.unwrap();
        let mut taken = body.take(payload.len() as u64);
        let mut out = Vec::new();
        taken.read_to_end(&mut out).await.unwrap();
        sender.await.unwrap();

        assert_eq!(out, payload);
    }
}
