use std::time::Duration;

use tracing::warn;

use crate::messaging::connection_info::Peer;
use crate::peer_communicator::sink::Outbound;
use crate::util::timer::Timer;


/// Acknowledges a registration received from our predecessor in the forwarding chain, repeating
///  the acknowledgement until the predecessor confirms it with RegisterPeerComplete
pub struct AcknowledgeRegisterPeerSender {
    peer: Peer,
    timer: Timer,
    completed: bool,
}

impl AcknowledgeRegisterPeerSender {
    pub fn new(peer: Peer, retry_interval: Duration) -> AcknowledgeRegisterPeerSender {
        AcknowledgeRegisterPeerSender {
            peer,
            timer: Timer::new(retry_interval),
            completed: false,
        }
    }

    pub fn send_now(&mut self, outbound: &Outbound) {
        match outbound.register_peer_connection {
            Some(chain) => chain.ack(&self.peer, outbound),
            None => warn!("acknowledging {:?} without a register forwarding chain - ignoring", self.peer),
        }
        self.timer.reset();
    }

    pub fn try_send(&mut self, outbound: &Outbound) {
        if !self.completed && self.timer.is_expired() {
            self.send_now(outbound);
        }
    }

    pub fn received_register_peer_complete(&mut self) {
        self.completed = true;
    }

    pub fn is_ready_to_stop(&self) -> bool {
        self.completed
    }
}
