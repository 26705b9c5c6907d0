use crate::messaging::connection_info::Peer;
use crate::peer_communicator::config::PeerCommunicatorConfig;
use crate::peer_communicator::establisher::connection_establisher::ConnectionEstablisher;
use crate::peer_communicator::payload::payload_receiver::PayloadReceiver;
use crate::peer_communicator::payload::payload_sender::PayloadSender;
use crate::peer_communicator::sink::Outbound;


/// Everything the background worker knows about one remote peer
pub struct PeerState {
    pub connection_establisher: ConnectionEstablisher,
    pub payload_sender: PayloadSender,
    pub payload_receiver: PayloadReceiver,
}

impl PeerState {
    pub fn new(peer: Peer, config: &PeerCommunicatorConfig, outbound: &Outbound) -> PeerState {
        PeerState {
            connection_establisher: ConnectionEstablisher::new(peer.clone(), config, outbound),
            payload_sender: PayloadSender::new(peer.clone(), config.payload_retry_interval, config.payload_abort_timeout),
            payload_receiver: PayloadReceiver::new(peer),
        }
    }

    pub fn try_send(&mut self, outbound: &Outbound) {
        self.connection_establisher.try_send(outbound);
        self.payload_sender.try_send(outbound);
    }

    pub fn is_ready_to_stop(&self) -> bool {
        self.connection_establisher.is_ready_to_stop()
            && self.payload_sender.is_ready_to_close()
            && self.payload_receiver.is_ready_to_close()
    }
}
