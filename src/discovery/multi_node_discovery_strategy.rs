use std::net::{IpAddr, SocketAddr};

use async_trait::async_trait;

use crate::communicator::config::CommunicatorConfig;
use crate::discovery::discovery_strategy::DiscoveryStrategy;
use crate::discovery::ping_discovery::PingDiscovery;
use crate::error::CommunicatorResult;
use crate::peer_communicator::peer_communicator::PeerCommunicator;


/// Discovery between the nodes' local leaders. The node whose address is the configured
///  discovery address listens, all others ping it.
pub struct MultiNodeDiscoveryStrategy {
    ping_discovery: PingDiscovery,
}

impl MultiNodeDiscoveryStrategy {
    pub fn new(config: &CommunicatorConfig, node_ip: IpAddr) -> MultiNodeDiscoveryStrategy {
        MultiNodeDiscoveryStrategy {
            ping_discovery: PingDiscovery {
                discovery_addr: SocketAddr::new(config.multi_node_discovery_ip, config.multi_node_discovery_port),
                is_leader: config.is_multi_node_leader(node_ip),
                is_broadcast: false,
                timeout: config.discovery_timeout,
                ping_interval: config.discovery_ping_interval,
            },
        }
    }

    pub fn is_leader(&self) -> bool {
        self.ping_discovery.is_leader
    }
}

#[async_trait]
impl DiscoveryStrategy for MultiNodeDiscoveryStrategy {
    async fn discover_peers(&self, peer_communicator: &mut PeerCommunicator) -> CommunicatorResult<()> {
        self.ping_discovery.discover_peers(peer_communicator).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::leader("10.0.0.1", true)]
    #[case::other_node("10.0.0.2", false)]
    fn test_leader_election(#[case] node_ip: &str, #[case] expected: bool) {
        let config = CommunicatorConfig::new("10.0.0.1".parse().unwrap(), 44444, 44445, 2, "suffix");
        let strategy = MultiNodeDiscoveryStrategy::new(&config, node_ip.parse().unwrap());
        assert_eq!(strategy.is_leader(), expected);
    }
}
