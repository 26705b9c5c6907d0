use std::net::IpAddr;
use std::time::Duration;

use anyhow::bail;

use crate::messaging::connection_info::IpAddress;
use crate::peer_communicator::config::PeerCommunicatorConfig;


#[derive(Debug, Clone)]
pub struct CommunicatorConfig {
    /// the node with this address is the leader for multi-node discovery and collectives
    pub multi_node_discovery_ip: IpAddr,
    pub multi_node_discovery_port: u16,
    pub local_discovery_port: u16,
    pub number_of_instances_per_node: usize,
    pub group_identifier_suffix: String,

    pub discovery_timeout: Duration,
    pub discovery_ping_interval: Duration,
    /// upper bound for waiting on a single message during a collective operation
    pub collective_timeout: Duration,

    /// template for the local and multi-node communicators; register forwarding is configured
    ///  per communicator
    pub peer_communicator_config: PeerCommunicatorConfig,
}

impl CommunicatorConfig {
    pub fn new(
        multi_node_discovery_ip: IpAddr,
        multi_node_discovery_port: u16,
        local_discovery_port: u16,
        number_of_instances_per_node: usize,
        group_identifier_suffix: &str,
    ) -> CommunicatorConfig {
        CommunicatorConfig {
            multi_node_discovery_ip,
            multi_node_discovery_port,
            local_discovery_port,
            number_of_instances_per_node,
            group_identifier_suffix: group_identifier_suffix.to_string(),
            discovery_timeout: Duration::from_secs(60),
            discovery_ping_interval: Duration::from_millis(100),
            collective_timeout: Duration::from_secs(120),
            peer_communicator_config: Default::default(),
        }
    }

    /// scopes all communicators of one logical run
    pub fn group_identifier(&self, session_id: &str, statement_id: &str) -> String {
        format!("{}_{}_{}", session_id, statement_id, self.group_identifier_suffix)
    }

    pub fn is_multi_node_leader(&self, node_ip: IpAddr) -> bool {
        node_ip == self.multi_node_discovery_ip
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.number_of_instances_per_node == 0 {
            bail!("number of instances per node must be at least 1");
        }
        if self.discovery_ping_interval.is_zero() {
            bail!("discovery ping interval must not be zero");
        }
        if self.local_discovery_port == 0 || self.multi_node_discovery_port == 0 {
            bail!("discovery ports must be configured explicitly");
        }
        self.peer_communicator_config.validate()
    }
}

/// Who this participant is, as supplied by the hosting environment
#[derive(Debug, Clone)]
pub struct NodeIdentity {
    pub node_name: String,
    pub node_ip: IpAddress,
    /// `0..number_of_instances_per_node`; instance 0 is its node's leader
    pub instance_id: usize,
    pub number_of_nodes: usize,
}

impl NodeIdentity {
    pub fn is_local_leader(&self) -> bool {
        self.instance_id == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn config() -> CommunicatorConfig {
        CommunicatorConfig::new("10.0.0.1".parse().unwrap(), 44444, 44445, 2, "sfx")
    }

    #[test]
    fn test_group_identifier() {
        assert_eq!(config().group_identifier("123", "7"), "123_7_sfx");
    }

    #[rstest]
    #[case::default(|_: &mut CommunicatorConfig| {}, true)]
    #[case::no_instances(|c: &mut CommunicatorConfig| c.number_of_instances_per_node = 0, false)]
    #[case::zero_ping_interval(|c: &mut CommunicatorConfig| c.discovery_ping_interval = Duration::ZERO, false)]
    #[case::no_local_port(|c: &mut CommunicatorConfig| c.local_discovery_port = 0, false)]
    #[case::invalid_peer_config(|c: &mut CommunicatorConfig| c.peer_communicator_config.poll_interval = Duration::ZERO, false)]
    fn test_validate(#[case] modify: fn(&mut CommunicatorConfig), #[case] expected: bool) {
        let mut config = config();
        modify(&mut config);
        assert_eq!(config.validate().is_ok(), expected);
    }
}
