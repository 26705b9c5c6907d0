use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::select;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

use crate::messaging::connection_info::{ConnectionInfo, IpAddress, Peer, Port};
use crate::messaging::envelope::Envelope;
use crate::messaging::message::Message;
use crate::peer_communicator::config::PeerCommunicatorConfig;
use crate::peer_communicator::peer_socket::PeerSocket;
use crate::peer_communicator::peer_state::PeerState;
use crate::peer_communicator::register_peer_connection::RegisterPeerConnection;
use crate::peer_communicator::sink::{MessageSink, Outbound};
use crate::transport::socket::{RouterSocket, SocketFactory};


/// NB: This is a macro rather than a method so that the borrow checker sees that `peers` is not
///  borrowed, and can be mutated while an `Outbound` is alive
macro_rules! outbound {
    ($self: ident) => {
        Outbound {
            my_connection_info: &$self.my_connection_info,
            peers: &$self.sockets,
            front_end: &$self.front_end,
            register_peer_connection: $self.register_peer_connection.as_ref(),
        }
    }
}

/// The event loop of a peer communicator. It exclusively owns all peer state and sockets, and
///  talks to the front end only through the control channels.
pub struct BackgroundWorker {
    my_connection_info: ConnectionInfo,
    config: PeerCommunicatorConfig,
    socket_factory: Arc<dyn SocketFactory>,
    router: Box<dyn RouterSocket>,
    is_router_closed: bool,
    control_in: UnboundedReceiver<Envelope>,
    front_end: UnboundedSender<Envelope>,
    sockets: BTreeMap<Peer, PeerSocket>,
    peers: BTreeMap<Peer, PeerState>,
    register_peer_connection: Option<RegisterPeerConnection>,
    stop_requested_at: Option<Instant>,
}

impl BackgroundWorker {
    /// Binds the listening socket to a random port and publishes the resulting connection info
    ///  to the front end
    pub async fn start(
        name: String,
        listen_ip: IpAddress,
        group_identifier: String,
        config: PeerCommunicatorConfig,
        socket_factory: Arc<dyn SocketFactory>,
        control_in: UnboundedReceiver<Envelope>,
        front_end: UnboundedSender<Envelope>,
    ) -> anyhow::Result<BackgroundWorker> {
        let router = socket_factory.bind_router(SocketAddr::new(listen_ip.ip, 0)).await?;

        let my_connection_info = ConnectionInfo {
            name,
            ipaddress: listen_ip,
            port: Port(router.local_addr().port()),
            group_identifier,
        };
        info!("listening as {:?}", Peer::new(my_connection_info.clone()));
        MessageSink::send(&front_end, Envelope::new(Message::MyConnectionInfo {
            my_connection_info: my_connection_info.clone(),
        }));

        Ok(BackgroundWorker {
            my_connection_info,
            config,
            socket_factory,
            router,
            is_router_closed: false,
            control_in,
            front_end,
            sockets: Default::default(),
            peers: Default::default(),
            register_peer_connection: None,
            stop_requested_at: None,
        })
    }

    pub async fn run(mut self) {
        let mut poll_interval = interval(self.config.poll_interval);
        poll_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            select! {
                control = self.control_in.recv(), if self.stop_requested_at.is_none() => {
                    match control {
                        Some(envelope) => self.on_control_message(envelope),
                        None => {
                            debug!("front end went away");
                            self.request_stop();
                        }
                    }
                }
                received = self.router.recv_multipart(), if !self.is_router_closed => {
                    match received {
                        Some(frames) => self.on_network_message(frames),
                        None => {
                            error!("listening socket was closed");
                            self.is_router_closed = true;
                            self.request_stop();
                        }
                    }
                }
                _ = poll_interval.tick() => {}
            }

            self.try_send();
            if self.is_done() {
                break;
            }
        }

        self.close_sockets().await;
        info!("background worker terminated");
    }

    fn on_control_message(&mut self, envelope: Envelope) {
        trace!(message = ?envelope.message, "received control message");
        match envelope.message {
            Message::RegisterPeer { peer, .. } => self.on_register_peer_from_front_end(Peer::new(peer)),
            Message::Payload { destination, .. } => self.on_send_payload(Peer::new(destination), envelope.frames),
            Message::Stop => self.request_stop(),
            other => warn!("unexpected control message {} - ignoring", other.message_type()),
        }
    }

    fn on_network_message(&mut self, frames: Vec<Bytes>) {
        let envelope = match Envelope::try_from_multipart(frames) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("received unparsable message, dropping: {}", e);
                return;
            }
        };
        trace!(message = ?envelope.message, "received message");

        let source = match envelope.message.source() {
            Some(source) => Peer::new(source.clone()),
            None => {
                warn!("received {} message on the peer socket - dropping", envelope.message.message_type());
                return;
            }
        };
        if !self.is_same_group(&source) {
            warn!("received {} message from {:?} in group {} - dropping", envelope.message.message_type(), source, source.connection_info.group_identifier);
            return;
        }
        if source.connection_info == self.my_connection_info {
            debug!("received {} message from myself - dropping", envelope.message.message_type());
            return;
        }

        match envelope.message {
            Message::RegisterPeer { peer, .. } => {
                self.on_register_peer_from_predecessor(Peer::new(peer), source);
            }
            Message::AcknowledgeRegisterPeer { peer, .. } => {
                let peer = Peer::new(peer);
                let outbound = outbound!(self);
                match self.peers.get_mut(&peer) {
                    Some(state) => state.connection_establisher.received_acknowledge_register_peer(&outbound),
                    None => warn!("received AcknowledgeRegisterPeer for unknown peer {:?} - dropping", peer),
                }
            }
            Message::RegisterPeerComplete { peer, .. } => {
                let peer = Peer::new(peer);
                match self.peers.get_mut(&peer) {
                    Some(state) => state.connection_establisher.received_register_peer_complete(),
                    None => warn!("received RegisterPeerComplete for unknown peer {:?} - dropping", peer),
                }
            }
            Message::SynchronizeConnection { .. } => {
                self.ensure_peer(&source);
                let outbound = outbound!(self);
                if let Some(state) = self.peers.get_mut(&source) {
                    state.connection_establisher.received_synchronize_connection(&outbound);
                }
            }
            Message::AcknowledgeConnection { .. } => {
                match self.peers.get_mut(&source) {
                    Some(state) => state.connection_establisher.received_acknowledge_connection(),
                    None => warn!("received AcknowledgeConnection from unknown peer {:?} - dropping", source),
                }
            }
            Message::Payload { destination, sequence_number, .. } => {
                if destination != self.my_connection_info {
                    warn!("received payload for {:?} - dropping", Peer::new(destination));
                    return;
                }
                self.ensure_peer(&source);
                let outbound = outbound!(self);
                if let Some(state) = self.peers.get_mut(&source) {
                    state.payload_receiver.received_payload(sequence_number, envelope.frames, &outbound);
                }
            }
            Message::AcknowledgePayload { sequence_number, .. } => {
                match self.peers.get_mut(&source) {
                    Some(state) => state.payload_sender.received_acknowledge_payload(sequence_number),
                    None => warn!("received AcknowledgePayload from unknown peer {:?} - dropping", source),
                }
            }
            other => {
                debug!("ignoring {} message from {:?}", other.message_type(), source);
            }
        }
    }

    fn on_register_peer_from_front_end(&mut self, peer: Peer) {
        if !self.is_same_group(&peer) {
            warn!("registered peer {:?} is in group {} - ignoring", peer, peer.connection_info.group_identifier);
            return;
        }
        if peer.connection_info == self.my_connection_info {
            debug!("ignoring registration of myself");
            return;
        }

        self.ensure_peer(&peer);

        let forward_config = self.config.forward_register_peer_config;
        if !(forward_config.is_enabled && forward_config.is_leader) {
            return;
        }

        match &self.register_peer_connection {
            None => {
                self.register_peer_connection = Some(RegisterPeerConnection::new(None, peer));
            }
            Some(chain) => {
                if chain.needs_forwarding(&peer) {
                    let outbound = outbound!(self);
                    if let Some(state) = self.peers.get_mut(&peer) {
                        state.connection_establisher.forward_to_successor(&outbound);
                    }
                }
            }
        }
    }

    fn on_register_peer_from_predecessor(&mut self, peer: Peer, source: Peer) {
        if !self.is_same_group(&peer) {
            warn!("{:?} forwarded peer {:?} from group {} - ignoring", source, peer, peer.connection_info.group_identifier);
            return;
        }
        if peer.connection_info == self.my_connection_info {
            warn!("{:?} forwarded my own registration - ignoring", source);
            return;
        }

        self.ensure_peer(&source);
        self.ensure_peer(&peer);

        if !self.config.forward_register_peer_config.is_enabled {
            debug!("register forwarding is disabled, only connecting to {:?}", peer);
            return;
        }

        match &self.register_peer_connection {
            None => {
                self.register_peer_connection = Some(RegisterPeerConnection::new(Some(source), peer.clone()));
            }
            Some(chain) => {
                if chain.predecessor() != Some(&source) {
                    warn!("received RegisterPeer from {:?} which is not my predecessor - ignoring", source);
                    return;
                }
            }
        }

        let needs_forwarding = self.register_peer_connection.as_ref()
            .is_some_and(|chain| chain.needs_forwarding(&peer));
        let outbound = outbound!(self);
        if let Some(state) = self.peers.get_mut(&peer) {
            state.connection_establisher.received_register_peer(&outbound);
            if needs_forwarding {
                state.connection_establisher.forward_to_successor(&outbound);
            }
        }
    }

    fn on_send_payload(&mut self, peer: Peer, frames: Vec<Bytes>) {
        let outbound = outbound!(self);
        match self.peers.get_mut(&peer) {
            Some(state) => {
                state.payload_sender.send(frames, &outbound);
            }
            None => warn!("front end sent a payload to unknown peer {:?} - dropping", peer),
        }
    }

    /// creates state and connection for a peer on its first mention
    fn ensure_peer(&mut self, peer: &Peer) {
        if self.peers.contains_key(peer) {
            return;
        }

        self.sockets.insert(peer.clone(), PeerSocket::new(peer.clone(), self.socket_factory.clone(), self.config.connect_timeout));
        let outbound = outbound!(self);
        let state = PeerState::new(peer.clone(), &self.config, &outbound);
        self.peers.insert(peer.clone(), state);
    }

    fn is_same_group(&self, peer: &Peer) -> bool {
        peer.connection_info.group_identifier == self.my_connection_info.group_identifier
    }

    fn try_send(&mut self) {
        let outbound = outbound!(self);
        for state in self.peers.values_mut() {
            state.try_send(&outbound);
        }
    }

    fn request_stop(&mut self) {
        if self.stop_requested_at.is_none() {
            debug!("stop requested");
            self.stop_requested_at = Some(Instant::now());
        }
    }

    /// After a stop request, pending handshakes and payloads get a chance to conclude - bounded by
    ///  the close timeout. Payloads that are still unacknowledged then are reported as aborted.
    fn is_done(&mut self) -> bool {
        let Some(stop_requested_at) = self.stop_requested_at
        else {
            return false;
        };

        if self.peers.values().all(|s| s.is_ready_to_stop()) {
            return true;
        }

        if stop_requested_at.elapsed() >= self.config.close_timeout {
            let pending = self.peers.iter()
                .filter(|(_, s)| !s.is_ready_to_stop())
                .map(|(p, _)| p)
                .collect::<Vec<_>>();
            warn!("stopping with unfinished handshakes or payloads for {:?}", pending);

            let reason = format!("communicator was closed and the payload was not acknowledged within {:?}", self.config.close_timeout);
            let outbound = outbound!(self);
            for state in self.peers.values_mut() {
                state.payload_sender.abort_all(&reason, &outbound);
            }
            return true;
        }
        false
    }

    async fn close_sockets(&mut self) {
        for (_, socket) in std::mem::take(&mut self.sockets) {
            socket.close(self.config.linger).await;
        }
    }
}
