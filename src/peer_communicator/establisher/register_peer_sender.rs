use std::time::Duration;

use tracing::warn;

use crate::messaging::connection_info::Peer;
use crate::peer_communicator::sink::Outbound;
use crate::util::timer::Timer;


/// Forwards a peer's registration to our successor in the forwarding chain until the successor
///  acknowledges it, and confirms every acknowledgement with RegisterPeerComplete.
pub struct RegisterPeerSender {
    peer: Peer,
    timer: Timer,
    acknowledged: bool,
}

impl RegisterPeerSender {
    pub fn new(peer: Peer, retry_interval: Duration) -> RegisterPeerSender {
        RegisterPeerSender {
            peer,
            timer: Timer::new(retry_interval),
            acknowledged: false,
        }
    }

    pub fn send_now(&mut self, outbound: &Outbound) {
        match outbound.register_peer_connection {
            Some(chain) => chain.forward(&self.peer, outbound),
            None => warn!("forwarding {:?} without a register forwarding chain - ignoring", self.peer),
        }
        self.timer.reset();
    }

    pub fn try_send(&mut self, outbound: &Outbound) {
        if !self.acknowledged && self.timer.is_expired() {
            self.send_now(outbound);
        }
    }

    /// NB: The successor keeps acknowledging until it receives RegisterPeerComplete, so this
    ///  confirms every acknowledgement, not only the first one
    pub fn received_acknowledge_register_peer(&mut self, outbound: &Outbound) {
        self.acknowledged = true;
        if let Some(chain) = outbound.register_peer_connection {
            chain.complete(&self.peer, outbound);
        }
    }

    pub fn is_ready_to_stop(&self) -> bool {
        self.acknowledged
    }
}
