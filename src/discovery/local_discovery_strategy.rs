use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use async_trait::async_trait;

use crate::communicator::config::CommunicatorConfig;
use crate::discovery::discovery_strategy::DiscoveryStrategy;
use crate::discovery::ping_discovery::PingDiscovery;
use crate::error::CommunicatorResult;
use crate::peer_communicator::peer_communicator::PeerCommunicator;


/// Discovery between the instances on one node: broadcast pings on a well-known loopback port,
///  with instance 0 listening
pub struct LocalDiscoveryStrategy {
    ping_discovery: PingDiscovery,
}

impl LocalDiscoveryStrategy {
    pub fn new(config: &CommunicatorConfig, is_leader: bool) -> LocalDiscoveryStrategy {
        LocalDiscoveryStrategy {
            ping_discovery: PingDiscovery {
                discovery_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), config.local_discovery_port),
                is_leader,
                is_broadcast: true,
                timeout: config.discovery_timeout,
                ping_interval: config.discovery_ping_interval,
            },
        }
    }
}

#[async_trait]
impl DiscoveryStrategy for LocalDiscoveryStrategy {
    async fn discover_peers(&self, peer_communicator: &mut PeerCommunicator) -> CommunicatorResult<()> {
        self.ping_discovery.discover_peers(peer_communicator).await
    }
}
