use std::time::Duration;

use tracing::info;

use crate::messaging::connection_info::Peer;
use crate::messaging::envelope::Envelope;
use crate::messaging::message::Message;
use crate::peer_communicator::sink::Outbound;
use crate::util::timer::Timer;


/// Tells the front end, exactly once, that a peer can be used for payload traffic.
///
/// That requires both directions of the synchronize handshake to be complete, and the peer must
///  have stopped sending SynchronizeConnection for a while: as long as it keeps sending, it has
///  not yet received our acknowledgement.
pub struct PeerIsReadySender {
    peer: Peer,
    wait_timer: Timer,
    synchronize_connection_received: bool,
    acknowledge_connection_received: bool,
    sent: bool,
}

impl PeerIsReadySender {
    pub fn new(peer: Peer, wait_time: Duration) -> PeerIsReadySender {
        PeerIsReadySender {
            peer,
            wait_timer: Timer::new(wait_time),
            synchronize_connection_received: false,
            acknowledge_connection_received: false,
            sent: false,
        }
    }

    pub fn received_synchronize_connection(&mut self) {
        self.synchronize_connection_received = true;
        self.wait_timer.reset();
    }

    pub fn received_acknowledge_connection(&mut self) {
        self.acknowledge_connection_received = true;
    }

    /// `registration_complete` covers the additional conditions of register forwarding, which
    ///  are tracked elsewhere. Returns `true` if the peer was reported as ready by this call.
    pub fn try_send(&mut self, outbound: &Outbound, registration_complete: bool) -> bool {
        if self.sent
            || !self.synchronize_connection_received
            || !self.acknowledge_connection_received
            || !registration_complete
            || !self.wait_timer.is_expired()
        {
            return false;
        }

        info!("peer {:?} is ready to receive", self.peer);
        outbound.send_to_front_end(Envelope::new(Message::PeerIsReadyToReceive {
            peer: self.peer.connection_info.clone(),
        }));
        self.sent = true;
        true
    }

    pub fn is_ready_to_stop(&self) -> bool {
        self.sent
    }
}
