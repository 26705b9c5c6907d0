use std::time::Duration;

use crate::messaging::connection_info::Peer;
use crate::messaging::envelope::Envelope;
use crate::messaging::message::Message;
use crate::peer_communicator::sink::Outbound;
use crate::util::timer::Timer;


/// Sends SynchronizeConnection to a peer until the peer acknowledges it
pub struct SynchronizeConnectionSender {
    peer: Peer,
    timer: Timer,
    finished: bool,
}

impl SynchronizeConnectionSender {
    pub fn new(peer: Peer, retry_interval: Duration) -> SynchronizeConnectionSender {
        SynchronizeConnectionSender {
            peer,
            timer: Timer::new(retry_interval),
            finished: false,
        }
    }

    pub fn send_now(&mut self, outbound: &Outbound) {
        outbound.send_to_peer(&self.peer, Envelope::new(Message::SynchronizeConnection {
            source: outbound.my_connection_info.clone(),
        }));
        self.timer.reset();
    }

    pub fn try_send(&mut self, outbound: &Outbound) {
        if !self.finished && self.timer.is_expired() {
            self.send_now(outbound);
        }
    }

    pub fn stop(&mut self) {
        self.finished = true;
    }
}
