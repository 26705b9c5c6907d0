use std::net::SocketAddr;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::net::{TcpListener, TcpStream};
use tokio::select;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, instrument, warn, Instrument, Span};

use crate::transport::frame_codec::{read_multipart, write_multipart};
use crate::transport::socket::{DealerSocket, RouterSocket, SocketFactory};


pub const DEFAULT_MAX_MESSAGE_LEN: usize = 16*1024*1024;

/// [SocketFactory] on plain TCP connections: each dealer is one outgoing connection, the router
///  accepts connections and merges everything it receives into a single queue.
pub struct TcpSocketFactory {
    max_message_len: usize,
}
impl TcpSocketFactory {
    pub fn new(max_message_len: usize) -> TcpSocketFactory {
        TcpSocketFactory { max_message_len }
    }
}
impl Default for TcpSocketFactory {
    fn default() -> Self {
        TcpSocketFactory::new(DEFAULT_MAX_MESSAGE_LEN)
    }
}

#[async_trait]
impl SocketFactory for TcpSocketFactory {
    async fn bind_router(&self, addr: SocketAddr) -> anyhow::Result<Box<dyn RouterSocket>> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!("bound router socket to {:?}", local_addr);

        let (send, receiver) = mpsc::unbounded_channel();
        let accept_loop = tokio::spawn(accept_loop(listener, send, self.max_message_len)
            .instrument(Span::current()));

        Ok(Box::new(TcpRouterSocket {
            local_addr,
            receiver,
            accept_loop,
        }))
    }

    async fn connect_dealer(&self, addr: SocketAddr) -> anyhow::Result<Box<dyn DealerSocket>> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        debug!("connected dealer socket to {:?}", addr);

        Ok(Box::new(TcpDealerSocket {
            stream,
            max_message_len: self.max_message_len,
        }))
    }
}

struct TcpRouterSocket {
    local_addr: SocketAddr,
    receiver: mpsc::UnboundedReceiver<Vec<Bytes>>,
    accept_loop: JoinHandle<()>,
}
impl Drop for TcpRouterSocket {
    fn drop(&mut self) {
        // NB: this terminates all receiving connections since they are owned by the accept loop
        self.accept_loop.abort();
    }
}

#[async_trait]
impl RouterSocket for TcpRouterSocket {
    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    async fn recv_multipart(&mut self) -> Option<Vec<Bytes>> {
        self.receiver.recv().await
    }
}

async fn accept_loop(listener: TcpListener, send: mpsc::UnboundedSender<Vec<Bytes>>, max_message_len: usize) {
    let mut connections = JoinSet::new();
    loop {
        select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, from)) => {
                        connections.spawn(receive_loop(stream, from, send.clone(), max_message_len)
                            .instrument(Span::current()));
                    }
                    Err(e) => {
                        error!("error accepting connection: {}", e);
                    }
                }
            }
            Some(_) = connections.join_next() => {}
        }
    }
}

#[instrument(name="accepted_connection", level="debug", skip_all, fields(from = ?from))]
async fn receive_loop(mut stream: TcpStream, from: SocketAddr, send: mpsc::UnboundedSender<Vec<Bytes>>, max_message_len: usize) {
    debug!("accepted connection");
    loop {
        match read_multipart(&mut stream, max_message_len).await {
            Ok(Some(frames)) => {
                if send.send(frames).is_err() {
                    debug!("router socket was closed, terminating connection");
                    return;
                }
            }
            Ok(None) => {
                debug!("connection closed by peer");
                return;
            }
            Err(e) => {
                warn!("connection broke with an error: {}", e);
                return;
            }
        }
    }
}

struct TcpDealerSocket {
    stream: TcpStream,
    max_message_len: usize,
}

#[async_trait]
impl DealerSocket for TcpDealerSocket {
    async fn send_multipart(&mut self, frames: &[Bytes]) -> anyhow::Result<()> {
        write_multipart(&mut self.stream, frames, self.max_message_len).await
    }
}
