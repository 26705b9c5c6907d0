use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, trace, Instrument, Span};

use crate::messaging::connection_info::Peer;
use crate::messaging::envelope::Envelope;
use crate::peer_communicator::sink::MessageSink;
use crate::transport::socket::{DealerSocket, SocketFactory};


/// The outgoing connection to one peer. Sending only enqueues; a writer task connects lazily
///  and reconnects after errors. Messages that can not be delivered are dropped, and the
///  protocols' retry timers take care of that.
pub struct PeerSocket {
    peer: Peer,
    outbound: mpsc::UnboundedSender<Vec<Bytes>>,
    writer: JoinHandle<()>,
}

impl PeerSocket {
    pub fn new(peer: Peer, socket_factory: Arc<dyn SocketFactory>, connect_timeout: Duration) -> PeerSocket {
        let (outbound, receiver) = mpsc::unbounded_channel();
        let writer = tokio::spawn(
            write_loop(peer.clone(), socket_factory, connect_timeout, receiver)
                .instrument(Span::current())
        );
        PeerSocket {
            peer,
            outbound,
            writer,
        }
    }

    /// Gives pending messages up to `linger` to be written before the connection is closed
    pub async fn close(self, linger: Duration) {
        let PeerSocket { peer, outbound, mut writer } = self;
        drop(outbound);

        if timeout(linger, &mut writer).await.is_err() {
            debug!("pending messages to {:?} were not written within {:?} - discarding them", peer, linger);
            writer.abort();
        }
    }
}

impl MessageSink for PeerSocket {
    fn send(&self, envelope: Envelope) {
        trace!(peer = ?self.peer, message = ?envelope.message, "sending");
        if self.outbound.send(envelope.to_multipart()).is_err() {
            debug!("writer for {:?} terminated, dropping message", self.peer);
        }
    }
}

async fn write_loop(peer: Peer, socket_factory: Arc<dyn SocketFactory>, connect_timeout: Duration, mut receiver: mpsc::UnboundedReceiver<Vec<Bytes>>) {
    let addr = peer.connection_info.socket_addr();
    let mut dealer: Option<Box<dyn DealerSocket>> = None;

    while let Some(frames) = receiver.recv().await {
        if dealer.is_none() {
            match timeout(connect_timeout, socket_factory.connect_dealer(addr)).await {
                Ok(Ok(d)) => dealer = Some(d),
                Ok(Err(e)) => {
                    debug!("could not connect to {:?}, dropping message: {}", peer, e);
                    continue;
                }
                Err(_) => {
                    debug!("connecting to {:?} timed out, dropping message", peer);
                    continue;
                }
            }
        }

        if let Some(d) = dealer.as_mut() {
            if let Err(e) = d.send_multipart(&frames).await {
                debug!("error sending to {:?}, reconnecting for the next message: {}", peer, e);
                dealer = None;
            }
        }
    }
    trace!("writer for {:?} terminated", peer);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::message::Message;
    use crate::test_util::connection_info::test_connection_info;
    use crate::transport::tcp::TcpSocketFactory;
    use crate::messaging::connection_info::Port;

    #[tokio::test]
    async fn test_send_and_close() {
        let factory: Arc<dyn SocketFactory> = Arc::new(TcpSocketFactory::default());
        let mut router = factory.bind_router("127.0.0.1:0".parse().unwrap()).await.unwrap();

        let mut info = test_connection_info(2);
        info.port = Port(router.local_addr().port());

        let socket = PeerSocket::new(Peer::new(info), factory.clone(), Duration::from_secs(1));
        let message = Message::SynchronizeConnection { source: test_connection_info(1) };
        socket.send(Envelope::with_frames(message.clone(), vec![Bytes::from_static(b"x")]));
        socket.close(Duration::from_secs(1)).await;

        let received = timeout(Duration::from_secs(5), router.recv_multipart()).await.unwrap().unwrap();
        let envelope = Envelope::try_from_multipart(received).unwrap();
        assert_eq!(envelope.message, message);
        assert_eq!(envelope.frames, vec![Bytes::from_static(b"x")]);
    }

    #[tokio::test]
    async fn test_unreachable_peer() {
        let factory: Arc<dyn SocketFactory> = Arc::new(TcpSocketFactory::default());
        let addr = {
            // bind and release to get a port nobody listens on
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap()
        };

        let mut info = test_connection_info(2);
        info.port = Port(addr.port());
        let socket = PeerSocket::new(Peer::new(info), factory, Duration::from_millis(200));

        socket.send(Envelope::new(Message::Stop));
        socket.send(Envelope::new(Message::Stop));
        socket.close(Duration::from_secs(2)).await;
    }
}
