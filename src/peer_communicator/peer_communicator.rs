use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use bytes::Bytes;
use rustc_hash::FxHashMap;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{CommunicatorError, CommunicatorResult};
use crate::messaging::connection_info::{ConnectionInfo, IpAddress, Peer};
use crate::messaging::envelope::Envelope;
use crate::messaging::message::Message;
use crate::peer_communicator::background_thread::BackgroundThread;
use crate::peer_communicator::config::PeerCommunicatorConfig;
use crate::transport::socket::SocketFactory;
use crate::transport::tcp::TcpSocketFactory;


/// Reliable, ordered, point-to-point messaging between a fixed number of peers in the same group.
///
/// All networking happens in a background worker; the front end keeps only what the worker
///  reported: which peers are ready, payloads that were received, and failures. Payloads from a
///  given peer are delivered exactly once and in the order they were sent.
pub struct PeerCommunicator {
    number_of_peers: usize,
    my_connection_info: ConnectionInfo,
    background_thread: Option<BackgroundThread>,
    ready_peers: BTreeSet<Peer>,
    received: FxHashMap<Peer, VecDeque<Vec<Bytes>>>,
    aborted_payloads: FxHashMap<Peer, VecDeque<(u64, String)>>,
    handshake_timeout: Option<(ConnectionInfo, String)>,
}

impl PeerCommunicator {
    /// `number_of_peers` includes this participant
    pub async fn new(
        name: &str,
        number_of_peers: usize,
        listen_ip: IpAddress,
        group_identifier: &str,
        config: PeerCommunicatorConfig,
    ) -> CommunicatorResult<PeerCommunicator> {
        let socket_factory = Arc::new(TcpSocketFactory::new(config.max_message_len));
        Self::with_socket_factory(name, number_of_peers, listen_ip, group_identifier, config, socket_factory).await
    }

    pub async fn with_socket_factory(
        name: &str,
        number_of_peers: usize,
        listen_ip: IpAddress,
        group_identifier: &str,
        config: PeerCommunicatorConfig,
        socket_factory: Arc<dyn SocketFactory>,
    ) -> CommunicatorResult<PeerCommunicator> {
        config.validate()?;
        if number_of_peers == 0 {
            return Err(anyhow!("number of peers must include this participant").into());
        }

        let (background_thread, my_connection_info) = BackgroundThread::start(name, listen_ip, group_identifier, config, socket_factory).await?;
        info!("peer communicator {:?} started, expecting {} peers", Peer::new(my_connection_info.clone()), number_of_peers);

        Ok(PeerCommunicator {
            number_of_peers,
            my_connection_info,
            background_thread: Some(background_thread),
            ready_peers: Default::default(),
            received: Default::default(),
            aborted_payloads: Default::default(),
            handshake_timeout: None,
        })
    }

    pub fn my_connection_info(&self) -> &ConnectionInfo {
        &self.my_connection_info
    }

    pub fn number_of_peers(&self) -> usize {
        self.number_of_peers
    }

    pub fn number_of_connected_peers(&self) -> usize {
        self.ready_peers.len()
    }

    /// Starts connecting to a peer. Registering a peer repeatedly, or registering this
    ///  participant itself, is harmless.
    pub fn register_peer(&mut self, connection_info: ConnectionInfo) -> CommunicatorResult<()> {
        let message = Message::RegisterPeer {
            peer: connection_info,
            source: self.my_connection_info.clone(),
        };
        self.background_thread()?.send(Envelope::new(message))
    }

    /// Checks events that are already available, without waiting
    pub fn are_all_peers_connected(&mut self) -> CommunicatorResult<bool> {
        let events = self.background_thread_mut()?.try_receive_messages()?;
        for event in events {
            self.on_event(event);
        }
        Ok(self.is_complete())
    }

    /// Waits until all peers are connected. Returns `false` if that did not happen within
    ///  `timeout`, and an error if connecting to some peer was given up.
    pub async fn wait_for_peers(&mut self, timeout: Duration) -> CommunicatorResult<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.are_all_peers_connected()? {
                return Ok(true);
            }
            if let Some((peer, reason)) = &self.handshake_timeout {
                return Err(CommunicatorError::HandshakeTimeout { peer: peer.clone(), reason: reason.clone() });
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(false);
            }
            self.process_events(remaining).await?;
        }
    }

    /// The connected peers in their canonical order, not including this participant - or `None`
    ///  if not all peers connected within `timeout`
    pub async fn peers(&mut self, timeout: Duration) -> CommunicatorResult<Option<Vec<Peer>>> {
        if self.wait_for_peers(timeout).await? {
            Ok(Some(self.ready_peers.iter().cloned().collect()))
        }
        else {
            Ok(None)
        }
    }

    /// Hands a multi-frame payload to the background worker. This returns immediately; delivery
    ///  failure is reported by a later `send` or `recv` for the same peer.
    pub fn send(&mut self, peer: &Peer, frames: Vec<Bytes>) -> CommunicatorResult<()> {
        self.check_connected(peer)?;

        let message = Message::Payload {
            source: self.my_connection_info.clone(),
            destination: peer.connection_info.clone(),
            sequence_number: 0,
        };
        self.background_thread()?.send(Envelope::with_frames(message, frames))
    }

    /// Returns the next payload from `peer`, or `None` if none arrived within `timeout`
    pub async fn recv(&mut self, peer: &Peer, timeout: Duration) -> CommunicatorResult<Option<Vec<Bytes>>> {
        self.check_connected(peer)?;

        let deadline = Instant::now() + timeout;
        loop {
            if let Some(frames) = self.received.get_mut(peer).and_then(|q| q.pop_front()) {
                return Ok(Some(frames));
            }
            self.check_aborted(peer)?;

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            self.process_events(remaining).await?;
        }
    }

    /// Stops the background worker after pending handshakes and payloads are finished or the
    ///  close timeout expired. Fails with `PayloadAborted` if some payload was not acknowledged,
    ///  including aborts that were not yet reported by `send` or `recv`. Closing repeatedly is a
    ///  no-op.
    pub async fn close(&mut self) -> CommunicatorResult<()> {
        let Some(background_thread) = self.background_thread.take()
        else {
            return Ok(());
        };

        debug!("closing peer communicator");
        for event in background_thread.close().await? {
            self.on_event(event);
        }

        let aborted = self.aborted_payloads.iter_mut()
            .find_map(|(peer, q)| q.pop_front().map(|a| (peer.clone(), a)));
        match aborted {
            Some((peer, (sequence_number, reason))) => Err(CommunicatorError::PayloadAborted {
                peer,
                sequence_number,
                reason,
            }),
            None => Ok(()),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.background_thread.is_none()
    }

    fn is_complete(&self) -> bool {
        self.ready_peers.len() + 1 >= self.number_of_peers
    }

    fn check_connected(&mut self, peer: &Peer) -> CommunicatorResult<()> {
        if !self.are_all_peers_connected()? {
            return Err(CommunicatorError::PeersNotConnected);
        }
        self.check_aborted(peer)?;
        if !self.ready_peers.contains(peer) {
            return Err(CommunicatorError::UnknownPeer(peer.clone()));
        }
        Ok(())
    }

    fn check_aborted(&mut self, peer: &Peer) -> CommunicatorResult<()> {
        match self.aborted_payloads.get_mut(peer).and_then(|q| q.pop_front()) {
            Some((sequence_number, reason)) => Err(CommunicatorError::PayloadAborted {
                peer: peer.clone(),
                sequence_number,
                reason,
            }),
            None => Ok(()),
        }
    }

    async fn process_events(&mut self, timeout: Duration) -> CommunicatorResult<()> {
        let events = self.background_thread_mut()?.receive_messages(timeout).await?;
        for event in events {
            self.on_event(event);
        }
        Ok(())
    }

    fn on_event(&mut self, envelope: Envelope) {
        match envelope.message {
            Message::PeerIsReadyToReceive { peer } => {
                let peer = Peer::new(peer);
                debug!("{:?} is ready", peer);
                self.ready_peers.insert(peer);
            }
            Message::Payload { source, .. } => {
                self.received.entry(Peer::new(source))
                    .or_default()
                    .push_back(envelope.frames);
            }
            Message::AbortPayload { peer, sequence_number, reason } => {
                warn!("payload #{} to {:?} was aborted: {}", sequence_number, Peer::new(peer.clone()), reason);
                self.aborted_payloads.entry(Peer::new(peer))
                    .or_default()
                    .push_back((sequence_number, reason));
            }
            Message::Timeout { peer, reason } => {
                warn!("connecting to {:?} failed: {}", Peer::new(peer.clone()), reason);
                if self.handshake_timeout.is_none() {
                    self.handshake_timeout = Some((peer, reason));
                }
            }
            other => warn!("unexpected event {} from background worker - ignoring", other.message_type()),
        }
    }

    fn background_thread(&self) -> CommunicatorResult<&BackgroundThread> {
        self.background_thread.as_ref()
            .ok_or(CommunicatorError::Closed)
    }

    fn background_thread_mut(&mut self) -> CommunicatorResult<&mut BackgroundThread> {
        self.background_thread.as_mut()
            .ok_or(CommunicatorError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer_communicator::config::ForwardRegisterPeerConfig;
    use crate::transport::fault_injection::FaultInjectionSocketFactory;

    const TIMEOUT: Duration = Duration::from_secs(10);

    async fn start_participants(n: usize, group: &str, config_for: impl Fn(usize) -> PeerCommunicatorConfig, socket_factory: Arc<dyn SocketFactory>) -> Vec<PeerCommunicator> {
        let mut result = Vec::new();
        for i in 0..n {
            let pc = PeerCommunicator::with_socket_factory(&format!("p{}", i), n, IpAddress::localhost(), group, config_for(i), socket_factory.clone())
                .await
                .unwrap();
            result.push(pc);
        }
        result
    }

    async fn connected_participants(n: usize, socket_factory: Arc<dyn SocketFactory>) -> Vec<PeerCommunicator> {
        connected_participants_with_config(n, PeerCommunicatorConfig::default(), socket_factory).await
    }

    async fn connected_participants_with_config(n: usize, config: PeerCommunicatorConfig, socket_factory: Arc<dyn SocketFactory>) -> Vec<PeerCommunicator> {
        let mut pcs = start_participants(n, "g1", |_| config.clone(), socket_factory).await;
        let infos = pcs.iter().map(|p| p.my_connection_info().clone()).collect::<Vec<_>>();
        for pc in pcs.iter_mut() {
            for info in &infos {
                pc.register_peer(info.clone()).unwrap();
            }
        }
        for pc in pcs.iter_mut() {
            assert!(pc.wait_for_peers(TIMEOUT).await.unwrap());
        }
        pcs
    }

    async fn close_all(pcs: &mut [PeerCommunicator]) {
        for pc in pcs.iter_mut() {
            pc.close().await.unwrap();
        }
    }

    fn tcp() -> Arc<dyn SocketFactory> {
        Arc::new(TcpSocketFactory::default())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_three_participants_connect() {
        let mut pcs = connected_participants(3, tcp()).await;

        let all_peers = pcs.iter()
            .map(|p| Peer::new(p.my_connection_info().clone()))
            .collect::<BTreeSet<_>>();

        for pc in pcs.iter_mut() {
            let me = Peer::new(pc.my_connection_info().clone());
            let peers = pc.peers(TIMEOUT).await.unwrap().unwrap();

            let expected = all_peers.iter()
                .filter(|p| **p != me)
                .cloned()
                .collect::<Vec<_>>();
            assert_eq!(peers, expected);
            assert!(pc.are_all_peers_connected().unwrap());
        }

        close_all(&mut pcs).await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_single_participant_is_connected() {
        let mut pc = PeerCommunicator::new("alone", 1, IpAddress::localhost(), "g1", PeerCommunicatorConfig::default()).await.unwrap();
        assert!(pc.are_all_peers_connected().unwrap());
        assert_eq!(pc.peers(Duration::ZERO).await.unwrap(), Some(vec![]));
        pc.close().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_payloads_in_order() {
        let mut pcs = connected_participants(2, tcp()).await;
        let p0 = Peer::new(pcs[0].my_connection_info().clone());
        let p1 = Peer::new(pcs[1].my_connection_info().clone());

        for i in 0..20u8 {
            pcs[0].send(&p1, vec![Bytes::from(vec![i]), Bytes::from_static(b"tail")]).unwrap();
        }
        pcs[1].send(&p0, vec![Bytes::from_static(b"back")]).unwrap();

        for i in 0..20u8 {
            let frames = pcs[1].recv(&p0, TIMEOUT).await.unwrap().unwrap();
            assert_eq!(frames, vec![Bytes::from(vec![i]), Bytes::from_static(b"tail")]);
        }
        assert_eq!(pcs[0].recv(&p1, TIMEOUT).await.unwrap(), Some(vec![Bytes::from_static(b"back")]));
        assert_eq!(pcs[0].recv(&p1, Duration::from_millis(100)).await.unwrap(), None);

        close_all(&mut pcs).await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_payloads_with_message_loss() {
        let factory: Arc<dyn SocketFactory> = Arc::new(FaultInjectionSocketFactory::new(tcp(), 0.3).unwrap());
        let mut pcs = connected_participants(3, factory).await;

        let peers = pcs.iter()
            .map(|p| Peer::new(p.my_connection_info().clone()))
            .collect::<Vec<_>>();

        for (i, pc) in pcs.iter_mut().enumerate() {
            for (j, peer) in peers.iter().enumerate() {
                if i != j {
                    for n in 0..5u8 {
                        pc.send(peer, vec![Bytes::from(vec![i as u8, n])]).unwrap();
                    }
                }
            }
        }

        for (i, pc) in pcs.iter_mut().enumerate() {
            for (j, peer) in peers.iter().enumerate() {
                if i != j {
                    for n in 0..5u8 {
                        let frames = pc.recv(peer, TIMEOUT).await.unwrap().unwrap();
                        assert_eq!(frames, vec![Bytes::from(vec![j as u8, n])]);
                    }
                }
            }
        }

        close_all(&mut pcs).await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_send_before_connected() {
        let mut pcs = start_participants(2, "g1", |_| PeerCommunicatorConfig::default(), tcp()).await;
        let p1 = Peer::new(pcs[1].my_connection_info().clone());

        assert!(!pcs[0].are_all_peers_connected().unwrap());
        assert!(matches!(pcs[0].send(&p1, vec![]), Err(CommunicatorError::PeersNotConnected)));
        assert!(matches!(pcs[0].recv(&p1, Duration::ZERO).await, Err(CommunicatorError::PeersNotConnected)));
        assert!(!pcs[0].wait_for_peers(Duration::from_millis(200)).await.unwrap());
        assert_eq!(pcs[0].peers(Duration::ZERO).await.unwrap(), None);

        close_all(&mut pcs).await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unknown_peer() {
        let mut pcs = connected_participants(2, tcp()).await;

        let stranger = Peer::new(crate::test_util::connection_info::test_connection_info(1));
        assert!(matches!(pcs[0].send(&stranger, vec![]), Err(CommunicatorError::UnknownPeer(_))));

        close_all(&mut pcs).await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_use_after_close() {
        let mut pcs = connected_participants(2, tcp()).await;
        let p1 = Peer::new(pcs[1].my_connection_info().clone());

        close_all(&mut pcs).await;
        assert!(pcs[0].is_closed());
        assert!(matches!(pcs[0].send(&p1, vec![]), Err(CommunicatorError::Closed)));
        assert!(matches!(pcs[0].are_all_peers_connected(), Err(CommunicatorError::Closed)));
        assert!(matches!(pcs[0].register_peer(p1.connection_info.clone()), Err(CommunicatorError::Closed)));

        // closing again is fine
        pcs[0].close().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_other_group_is_ignored() {
        let mut pc = PeerCommunicator::new("a", 2, IpAddress::localhost(), "g1", PeerCommunicatorConfig::default()).await.unwrap();
        let mut other = PeerCommunicator::new("b", 2, IpAddress::localhost(), "g2", PeerCommunicatorConfig::default()).await.unwrap();

        pc.register_peer(other.my_connection_info().clone()).unwrap();
        other.register_peer(pc.my_connection_info().clone()).unwrap();

        assert!(!pc.wait_for_peers(Duration::from_millis(500)).await.unwrap());
        assert!(!other.wait_for_peers(Duration::ZERO).await.unwrap());

        pc.close().await.unwrap();
        other.close().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_handshake_timeout() {
        let config = PeerCommunicatorConfig {
            peer_is_ready_wait_time: Duration::from_millis(150),
            abort_timeout: Duration::from_millis(300),
            close_timeout: Duration::from_millis(200),
            ..PeerCommunicatorConfig::default()
        };
        let mut pc = PeerCommunicator::new("a", 2, IpAddress::localhost(), "g1", config).await.unwrap();

        let unreachable = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            let mut info = pc.my_connection_info().clone();
            info.name = "nobody".to_string();
            info.port = crate::messaging::connection_info::Port(l.local_addr().unwrap().port());
            info
        };
        pc.register_peer(unreachable.clone()).unwrap();

        match pc.wait_for_peers(TIMEOUT).await {
            Err(CommunicatorError::HandshakeTimeout { peer, .. }) => assert_eq!(peer, unreachable),
            other => panic!("unexpected result {:?}", other.map(|_| ())),
        }
        pc.close().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_close_reports_payload_aborted_while_running() {
        check_close_reports_unacknowledged_payload(Duration::from_millis(200)).await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_close_reports_payload_aborted_by_close_timeout() {
        check_close_reports_unacknowledged_payload(Duration::from_secs(60)).await;
    }

    async fn check_close_reports_unacknowledged_payload(payload_abort_timeout: Duration) {
        let config = PeerCommunicatorConfig {
            payload_abort_timeout,
            close_timeout: Duration::from_millis(300),
            ..PeerCommunicatorConfig::default()
        };
        let mut pcs = connected_participants_with_config(2, config, tcp()).await;
        let p1 = Peer::new(pcs[1].my_connection_info().clone());

        pcs[1].close().await.unwrap();
        pcs[0].send(&p1, vec![Bytes::from_static(b"lost")]).unwrap();

        match pcs[0].close().await {
            Err(CommunicatorError::PayloadAborted { peer, sequence_number, .. }) => {
                assert_eq!(peer, p1);
                assert_eq!(sequence_number, 0);
            }
            other => panic!("unexpected result {:?}", other),
        }
        assert!(pcs[0].is_closed());
        pcs[0].close().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_forward_register_peer() {
        let n = 4;
        let mut pcs = start_participants(n, "g1", |i| PeerCommunicatorConfig::new(ForwardRegisterPeerConfig {
            is_leader: i == 0,
            is_enabled: true,
        }), tcp()).await;

        // only the leader learns about everybody, the others only learn about the leader
        let infos = pcs.iter().map(|p| p.my_connection_info().clone()).collect::<Vec<_>>();
        for info in &infos[1..] {
            pcs[0].register_peer(info.clone()).unwrap();
        }
        for pc in pcs[1..].iter_mut() {
            pc.register_peer(infos[0].clone()).unwrap();
        }

        for pc in pcs.iter_mut() {
            assert!(pc.wait_for_peers(TIMEOUT).await.unwrap());
            assert_eq!(pc.number_of_connected_peers(), n - 1);
        }

        close_all(&mut pcs).await;
    }
}
