use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use rustc_hash::FxHashSet;
use tokio::net::UdpSocket;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, trace, warn};

use crate::discovery::ping_datagram::{ping_datagram, try_parse_ping_datagram};
use crate::error::{CommunicatorError, CommunicatorResult};
use crate::messaging::connection_info::ConnectionInfo;
use crate::peer_communicator::peer_communicator::PeerCommunicator;

const MAX_DATAGRAM_SIZE: usize = 64 * 1024;


/// The algorithm shared by local and multi-node discovery. Everybody pings the discovery
///  address until all peers are connected; the leader listens on that address between its own
///  pings and registers every participant it hears from.
#[derive(Debug, Clone)]
pub struct PingDiscovery {
    pub discovery_addr: SocketAddr,
    pub is_leader: bool,
    pub is_broadcast: bool,
    pub timeout: Duration,
    pub ping_interval: Duration,
}

impl PingDiscovery {
    pub async fn discover_peers(&self, peer_communicator: &mut PeerCommunicator) -> CommunicatorResult<()> {
        let deadline = Instant::now() + self.timeout;

        let socket = self.bind().await?;
        let my_connection_info = peer_communicator.my_connection_info().clone();
        let ping = ping_datagram(&my_connection_info);
        let mut discovered = FxHashSet::default();

        debug!("starting discovery on {:?}, leader: {}", self.discovery_addr, self.is_leader);

        loop {
            // NB: this fails with the handshake timeout if connecting to some peer was given up
            if peer_communicator.wait_for_peers(Duration::ZERO).await? {
                info!("discovery complete");
                return Ok(());
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(CommunicatorError::DiscoveryTimeout {
                    connected: peer_communicator.number_of_connected_peers(),
                    expected: peer_communicator.number_of_peers() - 1,
                });
            }

            let wait_time = self.ping_interval.min(remaining);
            if self.is_leader {
                self.receive_pings(&socket, wait_time, peer_communicator, &my_connection_info, &mut discovered).await?;
            }
            else {
                sleep(wait_time).await;
            }

            if let Err(e) = socket.send_to(&ping, self.discovery_addr).await {
                debug!("error sending discovery ping: {}", e);
            }
        }
    }

    async fn bind(&self) -> anyhow::Result<UdpSocket> {
        let addr = if self.is_leader {
            self.discovery_addr
        }
        else {
            let unspecified: IpAddr = match self.discovery_addr {
                SocketAddr::V4(_) => Ipv4Addr::UNSPECIFIED.into(),
                SocketAddr::V6(_) => Ipv6Addr::UNSPECIFIED.into(),
            };
            SocketAddr::new(unspecified, 0)
        };

        let socket = UdpSocket::bind(addr).await?;
        socket.set_broadcast(self.is_broadcast)?;
        Ok(socket)
    }

    async fn receive_pings(
        &self,
        socket: &UdpSocket,
        wait_time: Duration,
        peer_communicator: &mut PeerCommunicator,
        my_connection_info: &ConnectionInfo,
        discovered: &mut FxHashSet<ConnectionInfo>,
    ) -> CommunicatorResult<()> {
        let until = Instant::now() + wait_time;
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

        loop {
            let remaining = until.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(());
            }

            match timeout(remaining, socket.recv_from(&mut buf)).await {
                Err(_) => return Ok(()),
                Ok(Err(e)) => {
                    warn!("error receiving discovery datagram: {}", e);
                    return Ok(());
                }
                Ok(Ok((len, from))) => {
                    if let Some(peer) = accept_ping(my_connection_info, &buf[..len], from) {
                        if discovered.insert(peer.clone()) {
                            info!("discovered {:?}", peer);
                            peer_communicator.register_peer(peer)?;
                        }
                    }
                }
            }
        }
    }
}

/// Returns the sender of a ping if it is a participant that should be registered
fn accept_ping(my_connection_info: &ConnectionInfo, datagram: &[u8], from: SocketAddr) -> Option<ConnectionInfo> {
    let source = match try_parse_ping_datagram(datagram) {
        Ok(source) => source,
        Err(e) => {
            debug!("dropping invalid discovery datagram from {:?}: {}", from, e);
            return None;
        }
    };

    if source == *my_connection_info {
        return None;
    }
    if source.group_identifier != my_connection_info.group_identifier {
        trace!("ignoring ping from group {}", source.group_identifier);
        return None;
    }
    if !my_connection_info.ipaddress.is_in_same_network(source.ipaddress.ip) {
        debug!("ignoring ping from {:?} outside my network", source.ipaddress);
        return None;
    }
    Some(source)
}
