use std::net::SocketAddr;

use async_trait::async_trait;
use bytes::Bytes;
#[cfg(test)] use mockall::automock;


/// Creates the sockets peer communication runs on. Peers receive on one bound 'router' socket
///  that accepts any number of senders, and send through one connected 'dealer' socket per
///  destination.
#[async_trait]
pub trait SocketFactory: Send + Sync + 'static {
    /// binds to the given address - port 0 binds to a random free port
    async fn bind_router(&self, addr: SocketAddr) -> anyhow::Result<Box<dyn RouterSocket>>;

    async fn connect_dealer(&self, addr: SocketAddr) -> anyhow::Result<Box<dyn DealerSocket>>;
}

#[async_trait]
pub trait RouterSocket: Send {
    fn local_addr(&self) -> SocketAddr;

    /// Returns the next multipart message received from any connected dealer, or `None` if the
    ///  socket can not receive anymore.
    ///
    /// NB: This is cancel safe, i.e. it can be used in `select!` without losing messages
    async fn recv_multipart(&mut self) -> Option<Vec<Bytes>>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait DealerSocket: Send {
    async fn send_multipart(&mut self, frames: &[Bytes]) -> anyhow::Result<()>;
}
