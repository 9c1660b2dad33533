use async_trait::async_trait;
use peervault_core::Result;
use peervault_transport::Peer;
use std::net::SocketAddr;
use std::sync::Arc;

/// The health manager's dial callback, abstracted behind a trait so this
/// crate doesn't need to know how a
/// [`Transport`](peervault_transport::Transport) was constructed or what
/// shared secret it holds.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, addr: SocketAddr) -> Result<Arc<Peer>>;
}

#[async_trait]
impl Dialer for peervault_transport::Transport {
    async fn dial(&self, addr: SocketAddr) -> Result<Arc<Peer>> {
        peervault_transport::Transport::dial(self, addr).await
    }
}
