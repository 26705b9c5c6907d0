use std::time::Duration;

use tracing::warn;

use crate::messaging::connection_info::Peer;
use crate::messaging::envelope::Envelope;
use crate::messaging::message::Message;
use crate::peer_communicator::sink::Outbound;
use crate::util::timer::Timer;


#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum AbortTimeoutState {
    Running,
    Stopped,
    TimedOut,
}

/// Reports a Timeout to the front end, at most once, if connection establishment with a peer
///  does not conclude in time
pub struct AbortTimeoutSender {
    peer: Peer,
    timeout: Duration,
    timer: Timer,
    state: AbortTimeoutState,
}

impl AbortTimeoutSender {
    pub fn new(peer: Peer, timeout: Duration) -> AbortTimeoutSender {
        AbortTimeoutSender {
            peer,
            timeout,
            timer: Timer::new(timeout),
            state: AbortTimeoutState::Running,
        }
    }

    /// returns `true` if the timeout was reported by this call
    pub fn try_send(&mut self, outbound: &Outbound) -> bool {
        if self.state != AbortTimeoutState::Running || !self.timer.is_expired() {
            return false;
        }

        warn!("connection establishment with {:?} did not complete within {:?}", self.peer, self.timeout);
        outbound.send_to_front_end(Envelope::new(Message::Timeout {
            peer: self.peer.connection_info.clone(),
            reason: format!("connection was not established within {:?}", self.timeout),
        }));
        self.state = AbortTimeoutState::TimedOut;
        true
    }

    pub fn reset_timer(&mut self) {
        if self.state == AbortTimeoutState::Running {
            self.timer.reset();
        }
    }

    pub fn stop(&mut self) {
        if self.state == AbortTimeoutState::Running {
            self.state = AbortTimeoutState::Stopped;
        }
    }

    pub fn has_timed_out(&self) -> bool {
        self.state == AbortTimeoutState::TimedOut
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::connection_info::{test_connection_info, test_peer};
    use crate::test_util::sink::RecordingSink;
    use std::collections::BTreeMap;
    use tokio::time;

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_sent_once() {
        let me = test_connection_info(1);
        let sinks: BTreeMap<Peer, RecordingSink> = BTreeMap::new();
        let front_end = RecordingSink::new();
        let outbound = Outbound { my_connection_info: &me, peers: &sinks, front_end: &front_end, register_peer_connection: None };

        let mut sender = AbortTimeoutSender::new(test_peer(2), Duration::from_millis(100));

        time::advance(Duration::from_millis(99)).await;
        assert!(!sender.try_send(&outbound));
        assert!(front_end.messages().is_empty());

        time::advance(Duration::from_millis(1)).await;
        assert!(sender.try_send(&outbound));
        assert!(sender.has_timed_out());
        assert_eq!(front_end.messages(), vec![Message::Timeout {
            peer: test_connection_info(2),
            reason: "connection was not established within 100ms".to_string(),
        }]);

        for _ in 0..10 {
            time::advance(Duration::from_millis(100)).await;
            assert!(!sender.try_send(&outbound));
        }
        assert!(front_end.messages().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_and_stop() {
        let me = test_connection_info(1);
        let sinks: BTreeMap<Peer, RecordingSink> = BTreeMap::new();
        let front_end = RecordingSink::new();
        let outbound = Outbound { my_connection_info: &me, peers: &sinks, front_end: &front_end, register_peer_connection: None };

        let mut sender = AbortTimeoutSender::new(test_peer(2), Duration::from_millis(100));
        time::advance(Duration::from_millis(80)).await;
        sender.reset_timer();
        time::advance(Duration::from_millis(80)).await;
        assert!(!sender.try_send(&outbound));

        sender.stop();
        time::advance(Duration::from_secs(10)).await;
        assert!(!sender.try_send(&outbound));
        assert!(!sender.has_timed_out());
        assert!(front_end.messages().is_empty());
    }
}
