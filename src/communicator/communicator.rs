use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{anyhow, bail};
use bytes::{Buf, Bytes, BytesMut};
use tracing::{debug, info, instrument};

use crate::communicator::config::{CommunicatorConfig, NodeIdentity};
use crate::discovery::discovery_strategy::DiscoveryStrategy;
use crate::discovery::local_discovery_strategy::LocalDiscoveryStrategy;
use crate::discovery::multi_node_discovery_strategy::MultiNodeDiscoveryStrategy;
use crate::error::{CommunicatorError, CommunicatorResult};
use crate::messaging::connection_info::{ConnectionInfo, Peer};
use crate::peer_communicator::config::{ForwardRegisterPeerConfig, PeerCommunicatorConfig};
use crate::peer_communicator::peer_communicator::PeerCommunicator;
use crate::util::buf::{put_bytes_list, try_get_bytes_list};


/// The multi-node side of a node's leader
struct MultiNode {
    peer_communicator: PeerCommunicator,
    peers: Vec<Peer>,
    node_position: u64,
    /// `None` if this node is the leader
    leader: Option<Peer>,
}

/// One participant of gather / broadcast / all-gather operations. Values are opaque byte
///  strings; results are ordered by node (in peer order of the node leaders), and within each
///  node by peer order.
pub struct Communicator {
    node_identity: NodeIdentity,
    collective_timeout: Duration,
    number_of_instances_per_node: u64,
    local: PeerCommunicator,
    local_peers: Vec<Peer>,
    local_position: u64,
    /// `None` for the local leader
    local_leader: Option<Peer>,
    /// present on the local leader if there is more than one node
    multi_node: Option<MultiNode>,
}

impl Communicator {
    /// Creates and connects the communicators for this participant, running discovery for all of
    ///  them
    pub async fn new(config: CommunicatorConfig, node_identity: NodeIdentity, group_identifier: &str) -> CommunicatorResult<Communicator> {
        config.validate()?;
        if node_identity.instance_id >= config.number_of_instances_per_node {
            return Err(anyhow!("instance id {} is out of range for {} instances per node", node_identity.instance_id, config.number_of_instances_per_node).into());
        }
        if node_identity.number_of_nodes == 0 {
            return Err(anyhow!("number of nodes must be at least 1").into());
        }

        let is_local_leader = node_identity.is_local_leader();

        let mut local = PeerCommunicator::new(
            &local_name(&node_identity.node_name, node_identity.instance_id),
            config.number_of_instances_per_node,
            node_identity.node_ip,
            &format!("{}_{}_local", group_identifier, node_identity.node_name),
            forwarding_config(&config, is_local_leader),
        ).await?;
        LocalDiscoveryStrategy::new(&config, is_local_leader)
            .discover_peers(&mut local)
            .await?;

        let local_peers = connected_peers(&mut local).await?;
        let local_position = position_of(&local, &local_peers);
        let local_leader = if is_local_leader {
            None
        }
        else {
            let leader_name = local_name(&node_identity.node_name, 0);
            let leader = local_peers.iter()
                .find(|p| p.connection_info.name == leader_name)
                .cloned()
                .ok_or_else(|| anyhow!("no local leader {} among local peers {:?}", leader_name, local_peers))?;
            Some(leader)
        };

        let multi_node = if is_local_leader && node_identity.number_of_nodes > 1 {
            Some(Self::connect_multi_node(&config, &node_identity, group_identifier).await?)
        }
        else {
            None
        };

        info!("communicator for {}/{} is ready", node_identity.node_name, node_identity.instance_id);
        Ok(Communicator {
            node_identity,
            collective_timeout: config.collective_timeout,
            number_of_instances_per_node: config.number_of_instances_per_node as u64,
            local,
            local_peers,
            local_position,
            local_leader,
            multi_node,
        })
    }

    async fn connect_multi_node(config: &CommunicatorConfig, node_identity: &NodeIdentity, group_identifier: &str) -> CommunicatorResult<MultiNode> {
        let strategy = MultiNodeDiscoveryStrategy::new(config, node_identity.node_ip.ip);

        let mut peer_communicator = PeerCommunicator::new(
            &node_identity.node_name,
            node_identity.number_of_nodes,
            node_identity.node_ip,
            &format!("{}_multi_node", group_identifier),
            forwarding_config(config, strategy.is_leader()),
        ).await?;
        strategy.discover_peers(&mut peer_communicator).await?;

        let peers = connected_peers(&mut peer_communicator).await?;
        let node_position = position_of(&peer_communicator, &peers);
        let leader = if strategy.is_leader() {
            None
        }
        else {
            let leader = peers.iter()
                .find(|p| config.is_multi_node_leader(p.connection_info.ipaddress.ip))
                .cloned()
                .ok_or_else(|| anyhow!("no peer at multi-node discovery address {}", config.multi_node_discovery_ip))?;
            Some(leader)
        };

        Ok(MultiNode {
            peer_communicator,
            peers,
            node_position,
            leader,
        })
    }

    pub fn node_identity(&self) -> &NodeIdentity {
        &self.node_identity
    }

    /// this participant's address among the instances of its node
    pub fn my_connection_info(&self) -> &ConnectionInfo {
        self.local.my_connection_info()
    }

    /// The participant that ends up with the result of `gather`, and that provides the value for
    ///  `broadcast`
    pub fn is_global_leader(&self) -> bool {
        self.local_leader.is_none()
            && self.multi_node.as_ref().map_or(true, |m| m.leader.is_none())
    }

    /// The global leader returns all participants' values, everybody else returns `None`
    #[instrument(level = "debug", skip_all)]
    pub async fn gather(&mut self, value: Bytes) -> CommunicatorResult<Option<Vec<Bytes>>> {
        if let Some(local_leader) = &self.local_leader {
            debug!("sending value to local leader");
            self.local.send(local_leader, vec![position_frame(self.local_position), value])?;
            return Ok(None);
        }

        let node_position = self.multi_node.as_ref().map_or(0, |m| m.node_position);
        let number_of_instances_per_node = self.number_of_instances_per_node;
        let cluster_position = move |local_position: u64| node_position * number_of_instances_per_node + local_position;

        let mut values = BTreeMap::new();
        values.insert(cluster_position(self.local_position), value);
        for peer in &self.local_peers {
            let frames = recv_from(&mut self.local, peer, self.collective_timeout).await?;
            for (local_position, value) in parse_positioned(frames)? {
                values.insert(cluster_position(local_position), value);
            }
        }

        let Some(multi_node) = &mut self.multi_node
        else {
            return Ok(Some(values.into_values().collect()));
        };

        match &multi_node.leader {
            Some(leader) => {
                debug!("forwarding {} values to global leader", values.len());
                let frames = values.into_iter()
                    .flat_map(|(position, value)| [position_frame(position), value])
                    .collect();
                multi_node.peer_communicator.send(leader, frames)?;
                Ok(None)
            }
            None => {
                for peer in &multi_node.peers {
                    let frames = recv_from(&mut multi_node.peer_communicator, peer, self.collective_timeout).await?;
                    values.extend(parse_positioned(frames)?);
                }
                Ok(Some(values.into_values().collect()))
            }
        }
    }

    /// The global leader's value is sent to everybody. Values passed in by other participants
    ///  are ignored.
    #[instrument(level = "debug", skip_all)]
    pub async fn broadcast(&mut self, value: Option<Bytes>) -> CommunicatorResult<Bytes> {
        let value = if self.is_global_leader() {
            value.ok_or_else(|| anyhow!("the global leader must provide a value for broadcast"))?
        }
        else if let Some(local_leader) = &self.local_leader {
            let frames = recv_from(&mut self.local, local_leader, self.collective_timeout).await?;
            return Ok(single_frame(frames)?);
        }
        else {
            let Some(multi_node) = &mut self.multi_node
            else {
                return Err(anyhow!("local leader without multi-node communicator is the global leader").into());
            };
            let Some(leader) = &multi_node.leader
            else {
                return Err(anyhow!("multi-node leader should be the global leader").into());
            };
            let frames = recv_from(&mut multi_node.peer_communicator, leader, self.collective_timeout).await?;
            single_frame(frames)?
        };

        if self.is_global_leader() {
            if let Some(multi_node) = &mut self.multi_node {
                for peer in &multi_node.peers {
                    multi_node.peer_communicator.send(peer, vec![value.clone()])?;
                }
            }
        }
        for peer in &self.local_peers {
            self.local.send(peer, vec![value.clone()])?;
        }
        Ok(value)
    }

    /// `gather` followed by `broadcast` of the result: everybody gets all participants' values
    pub async fn all_gather(&mut self, value: Bytes) -> CommunicatorResult<Vec<Bytes>> {
        let gathered = self.gather(value).await?;

        let encoded = gathered.map(|values| {
            let mut buf = BytesMut::new();
            put_bytes_list(&mut buf, &values);
            buf.freeze()
        });

        let result = self.broadcast(encoded).await?;
        Ok(try_get_bytes_list(&mut result.as_ref())?)
    }

    pub async fn close(&mut self) -> CommunicatorResult<()> {
        let multi_node_result = match &mut self.multi_node {
            Some(multi_node) => multi_node.peer_communicator.close().await,
            None => Ok(()),
        };
        let local_result = self.local.close().await;
        multi_node_result.and(local_result)
    }
}

fn local_name(node_name: &str, instance_id: usize) -> String {
    format!("{}_{}", node_name, instance_id)
}

fn forwarding_config(config: &CommunicatorConfig, is_leader: bool) -> PeerCommunicatorConfig {
    let mut result = config.peer_communicator_config.clone();
    result.forward_register_peer_config = ForwardRegisterPeerConfig {
        is_leader,
        is_enabled: true,
    };
    result
}

async fn connected_peers(peer_communicator: &mut PeerCommunicator) -> CommunicatorResult<Vec<Peer>> {
    peer_communicator.peers(Duration::ZERO).await?
        .ok_or(CommunicatorError::PeersNotConnected)
}

/// position of this participant in the peer order of its group
fn position_of(peer_communicator: &PeerCommunicator, peers: &[Peer]) -> u64 {
    let me = Peer::new(peer_communicator.my_connection_info().clone());
    peers.iter()
        .filter(|p| **p < me)
        .count() as u64
}

async fn recv_from(peer_communicator: &mut PeerCommunicator, peer: &Peer, timeout: Duration) -> CommunicatorResult<Vec<Bytes>> {
    peer_communicator.recv(peer, timeout).await?
        .ok_or_else(|| CommunicatorError::ReceiveTimeout(peer.clone()))
}

fn position_frame(position: u64) -> Bytes {
    Bytes::copy_from_slice(&position.to_be_bytes())
}

/// frames are pairs of position and value
fn parse_positioned(frames: Vec<Bytes>) -> anyhow::Result<Vec<(u64, Bytes)>> {
    if frames.len() % 2 != 0 {
        bail!("expected pairs of position and value, got {} frames", frames.len());
    }

    let mut result = Vec::with_capacity(frames.len() / 2);
    let mut iter = frames.into_iter();
    while let (Some(position), Some(value)) = (iter.next(), iter.next()) {
        let mut position: &[u8] = &position;
        let position = position.try_get_u64()?;
        result.push((position, value));
    }
    Ok(result)
}

fn single_frame(frames: Vec<Bytes>) -> anyhow::Result<Bytes> {
    let [value]: [Bytes; 1] = frames.try_into()
        .map_err(|f: Vec<Bytes>| anyhow!("expected a single frame, got {}", f.len()))?;
    Ok(value)
}
