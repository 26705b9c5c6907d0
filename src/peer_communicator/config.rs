use std::time::Duration;

use anyhow::bail;

use crate::transport::tcp::DEFAULT_MAX_MESSAGE_LEN;


/// Controls the forwarding of peer registrations along a chain of peers. The leader is the one
///  participant that learns about all peers (e.g. through discovery); every peer it registers is
///  passed on to its successor, and from there on along the chain, so that eventually every
///  participant knows every other participant.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub struct ForwardRegisterPeerConfig {
    pub is_leader: bool,
    pub is_enabled: bool,
}

#[derive(Debug, Clone)]
pub struct PeerCommunicatorConfig {
    pub forward_register_peer_config: ForwardRegisterPeerConfig,

    /// upper bound for the time between two checks of retry and timeout timers
    pub poll_interval: Duration,

    pub synchronize_retry_interval: Duration,
    pub register_peer_retry_interval: Duration,
    pub acknowledge_register_peer_retry_interval: Duration,
    /// A peer is reported as ready only after it has not sent us a SynchronizeConnection for this
    ///  long. Must be longer than the synchronize retry interval, otherwise a peer that has not
    ///  yet received our acknowledgement might be reported as ready.
    pub peer_is_ready_wait_time: Duration,
    /// time after which connection establishment with a peer is given up
    pub abort_timeout: Duration,

    pub payload_retry_interval: Duration,
    pub payload_abort_timeout: Duration,

    /// Upper bound for waiting for pending handshakes and payloads when the communicator is
    ///  closed
    pub close_timeout: Duration,
    /// time for flushing outgoing messages when closing a peer connection
    pub linger: Duration,
    pub connect_timeout: Duration,

    pub max_message_len: usize,
}

impl PeerCommunicatorConfig {
    pub fn new(forward_register_peer_config: ForwardRegisterPeerConfig) -> PeerCommunicatorConfig {
        PeerCommunicatorConfig {
            forward_register_peer_config,
            poll_interval: Duration::from_millis(10),
            synchronize_retry_interval: Duration::from_millis(100),
            register_peer_retry_interval: Duration::from_millis(100),
            acknowledge_register_peer_retry_interval: Duration::from_millis(100),
            peer_is_ready_wait_time: Duration::from_millis(300),
            abort_timeout: Duration::from_secs(120),
            payload_retry_interval: Duration::from_millis(100),
            payload_abort_timeout: Duration::from_secs(60),
            close_timeout: Duration::from_secs(10),
            linger: Duration::from_millis(100),
            connect_timeout: Duration::from_secs(2),
            max_message_len: DEFAULT_MAX_MESSAGE_LEN,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.poll_interval.is_zero() {
            bail!("poll interval must be positive");
        }
        if self.synchronize_retry_interval.is_zero() || self.register_peer_retry_interval.is_zero()
            || self.acknowledge_register_peer_retry_interval.is_zero() || self.payload_retry_interval.is_zero()
        {
            bail!("retry intervals must be positive");
        }
        if self.peer_is_ready_wait_time <= self.synchronize_retry_interval {
            bail!("peer is ready wait time ({:?}) must be longer than the synchronize retry interval ({:?})",
                self.peer_is_ready_wait_time, self.synchronize_retry_interval);
        }
        if self.abort_timeout <= self.peer_is_ready_wait_time {
            bail!("abort timeout ({:?}) must be longer than the peer is ready wait time ({:?})",
                self.abort_timeout, self.peer_is_ready_wait_time);
        }
        if self.max_message_len < 1024 {
            bail!("maximum message length is too small");
        }
        Ok(())
    }
}

impl Default for PeerCommunicatorConfig {
    fn default() -> Self {
        PeerCommunicatorConfig::new(ForwardRegisterPeerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_default_is_valid() {
        PeerCommunicatorConfig::default().validate().unwrap();
    }

    #[rstest]
    #[case::zero_poll_interval(|c: &mut PeerCommunicatorConfig| c.poll_interval = Duration::ZERO)]
    #[case::zero_retry(|c: &mut PeerCommunicatorConfig| c.payload_retry_interval = Duration::ZERO)]
    #[case::ready_wait_too_short(|c: &mut PeerCommunicatorConfig| c.peer_is_ready_wait_time = c.synchronize_retry_interval)]
    #[case::abort_too_short(|c: &mut PeerCommunicatorConfig| c.abort_timeout = Duration::from_millis(200))]
    #[case::tiny_messages(|c: &mut PeerCommunicatorConfig| c.max_message_len = 100)]
    fn test_validate_invalid(#[case] modify: fn(&mut PeerCommunicatorConfig)) {
        let mut config = PeerCommunicatorConfig::default();
        modify(&mut config);
        assert!(config.validate().is_err());
    }
}
