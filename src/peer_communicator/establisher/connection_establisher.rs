use tracing::{debug, warn};

use crate::messaging::connection_info::Peer;
use crate::messaging::envelope::Envelope;
use crate::messaging::message::Message;
use crate::peer_communicator::config::PeerCommunicatorConfig;
use crate::peer_communicator::establisher::abort_timeout_sender::AbortTimeoutSender;
use crate::peer_communicator::establisher::acknowledge_register_peer_sender::AcknowledgeRegisterPeerSender;
use crate::peer_communicator::establisher::peer_is_ready_sender::PeerIsReadySender;
use crate::peer_communicator::establisher::register_peer_sender::RegisterPeerSender;
use crate::peer_communicator::establisher::synchronize_connection_sender::SynchronizeConnectionSender;
use crate::peer_communicator::sink::Outbound;


/// The handshake with one peer. All handlers are idempotent since every message may arrive any
///  number of times.
pub struct ConnectionEstablisher {
    peer: Peer,
    synchronize_connection_sender: SynchronizeConnectionSender,
    abort_timeout_sender: AbortTimeoutSender,
    peer_is_ready_sender: PeerIsReadySender,
    /// present if this participant forwards the peer's registration to its successor
    register_peer_sender: Option<RegisterPeerSender>,
    /// present if the peer's registration was forwarded to this participant by its predecessor
    acknowledge_register_peer_sender: Option<AcknowledgeRegisterPeerSender>,
    config: PeerCommunicatorConfig,
}

impl ConnectionEstablisher {
    pub fn new(peer: Peer, config: &PeerCommunicatorConfig, outbound: &Outbound) -> ConnectionEstablisher {
        debug!("establishing connection with {:?}", peer);

        let mut result = ConnectionEstablisher {
            synchronize_connection_sender: SynchronizeConnectionSender::new(peer.clone(), config.synchronize_retry_interval),
            abort_timeout_sender: AbortTimeoutSender::new(peer.clone(), config.abort_timeout),
            peer_is_ready_sender: PeerIsReadySender::new(peer.clone(), config.peer_is_ready_wait_time),
            register_peer_sender: None,
            acknowledge_register_peer_sender: None,
            config: config.clone(),
            peer,
        };
        result.synchronize_connection_sender.send_now(outbound);
        result
    }

    pub fn forward_to_successor(&mut self, outbound: &Outbound) {
        if self.register_peer_sender.is_none() {
            let mut sender = RegisterPeerSender::new(self.peer.clone(), self.config.register_peer_retry_interval);
            sender.send_now(outbound);
            self.register_peer_sender = Some(sender);
        }
    }

    pub fn received_register_peer(&mut self, outbound: &Outbound) {
        match &mut self.acknowledge_register_peer_sender {
            Some(sender) => sender.send_now(outbound),
            None => {
                let mut sender = AcknowledgeRegisterPeerSender::new(self.peer.clone(), self.config.acknowledge_register_peer_retry_interval);
                sender.send_now(outbound);
                self.acknowledge_register_peer_sender = Some(sender);
            }
        }
    }

    pub fn received_synchronize_connection(&mut self, outbound: &Outbound) {
        outbound.send_to_peer(&self.peer, Envelope::new(Message::AcknowledgeConnection {
            source: outbound.my_connection_info.clone(),
        }));
        self.peer_is_ready_sender.received_synchronize_connection();
        self.abort_timeout_sender.reset_timer();
    }

    pub fn received_acknowledge_connection(&mut self) {
        self.synchronize_connection_sender.stop();
        self.peer_is_ready_sender.received_acknowledge_connection();
    }

    pub fn received_acknowledge_register_peer(&mut self, outbound: &Outbound) {
        match &mut self.register_peer_sender {
            Some(sender) => sender.received_acknowledge_register_peer(outbound),
            None => warn!("received AcknowledgeRegisterPeer for {:?} which was not forwarded - ignoring", self.peer),
        }
    }

    pub fn received_register_peer_complete(&mut self) {
        match &mut self.acknowledge_register_peer_sender {
            Some(sender) => sender.received_register_peer_complete(),
            None => warn!("received RegisterPeerComplete for {:?} which was not registered by a predecessor - ignoring", self.peer),
        }
    }

    /// drives retries and timeouts - call this regularly
    pub fn try_send(&mut self, outbound: &Outbound) {
        self.synchronize_connection_sender.try_send(outbound);
        if let Some(sender) = &mut self.register_peer_sender {
            sender.try_send(outbound);
        }
        if let Some(sender) = &mut self.acknowledge_register_peer_sender {
            sender.try_send(outbound);
        }

        if self.abort_timeout_sender.has_timed_out() {
            return;
        }

        let registration_complete = self.is_registration_complete();
        if self.peer_is_ready_sender.try_send(outbound, registration_complete) {
            self.abort_timeout_sender.stop();
        }
        self.abort_timeout_sender.try_send(outbound);
    }

    fn is_registration_complete(&self) -> bool {
        self.register_peer_sender.as_ref().map_or(true, |s| s.is_ready_to_stop())
            && self.acknowledge_register_peer_sender.as_ref().map_or(true, |s| s.is_ready_to_stop())
    }

    pub fn is_peer_ready(&self) -> bool {
        self.peer_is_ready_sender.is_ready_to_stop()
    }

    /// A peer that timed out is given up, so there is nothing left to wait for
    pub fn is_ready_to_stop(&self) -> bool {
        self.abort_timeout_sender.has_timed_out()
            || (self.peer_is_ready_sender.is_ready_to_stop() && self.is_registration_complete())
    }
}
