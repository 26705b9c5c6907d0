use tracing::{debug, warn};

use crate::messaging::connection_info::Peer;
use crate::messaging::envelope::Envelope;
use crate::messaging::message::Message;
use crate::peer_communicator::sink::Outbound;


/// This participant's position in the register forwarding chain: the predecessor it receives
///  registrations from (none for the leader), and the successor it forwards them to.
///
/// The successor is the first peer registered with this participant. It learns about every
///  subsequently registered peer from us.
#[derive(Debug)]
pub struct RegisterPeerConnection {
    predecessor: Option<Peer>,
    successor: Peer,
}

impl RegisterPeerConnection {
    pub fn new(predecessor: Option<Peer>, successor: Peer) -> RegisterPeerConnection {
        debug!(?predecessor, ?successor, "joining register forwarding chain");
        RegisterPeerConnection {
            predecessor,
            successor,
        }
    }

    pub fn predecessor(&self) -> Option<&Peer> {
        self.predecessor.as_ref()
    }

    pub fn successor(&self) -> &Peer {
        &self.successor
    }

    /// a peer needs to be forwarded unless it is the successor itself
    pub fn needs_forwarding(&self, peer: &Peer) -> bool {
        peer != &self.successor
    }

    pub fn forward(&self, peer: &Peer, outbound: &Outbound) {
        outbound.send_to_peer(&self.successor, Envelope::new(Message::RegisterPeer {
            peer: peer.connection_info.clone(),
            source: outbound.my_connection_info.clone(),
        }));
    }

    pub fn ack(&self, peer: &Peer, outbound: &Outbound) {
        match &self.predecessor {
            Some(predecessor) => {
                outbound.send_to_peer(predecessor, Envelope::new(Message::AcknowledgeRegisterPeer {
                    peer: peer.connection_info.clone(),
                    source: outbound.my_connection_info.clone(),
                }));
            }
            None => warn!("acknowledging registration of {:?} without a predecessor - ignoring", peer),
        }
    }

    pub fn complete(&self, peer: &Peer, outbound: &Outbound) {
        outbound.send_to_peer(&self.successor, Envelope::new(Message::RegisterPeerComplete {
            peer: peer.connection_info.clone(),
            source: outbound.my_connection_info.clone(),
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::connection_info::{test_connection_info, test_peer};
    use crate::test_util::sink::RecordingSink;
    use std::collections::BTreeMap;

    #[test]
    fn test_forward_ack_complete() {
        let me = test_connection_info(1);
        let predecessor = test_peer(2);
        let successor = test_peer(3);
        let forwarded = test_peer(4);

        let sinks = BTreeMap::from([
            (predecessor.clone(), RecordingSink::new()),
            (successor.clone(), RecordingSink::new()),
        ]);
        let front_end = RecordingSink::new();
        let outbound = Outbound {
            my_connection_info: &me,
            peers: &sinks,
            front_end: &front_end,
            register_peer_connection: None,
        };

        let chain = RegisterPeerConnection::new(Some(predecessor.clone()), successor.clone());
        assert!(chain.needs_forwarding(&forwarded));
        assert!(!chain.needs_forwarding(&successor));

        chain.forward(&forwarded, &outbound);
        chain.ack(&forwarded, &outbound);
        chain.complete(&forwarded, &outbound);

        assert_eq!(sinks[&successor].messages(), vec![
            Message::RegisterPeer { peer: forwarded.connection_info.clone(), source: me.clone() },
            Message::RegisterPeerComplete { peer: forwarded.connection_info.clone(), source: me.clone() },
        ]);
        assert_eq!(sinks[&predecessor].messages(), vec![
            Message::AcknowledgeRegisterPeer { peer: forwarded.connection_info.clone(), source: me.clone() },
        ]);
        assert!(front_end.messages().is_empty());
    }

    #[test]
    fn test_ack_without_predecessor() {
        let me = test_connection_info(1);
        let successor = test_peer(3);
        let sinks = BTreeMap::from([(successor.clone(), RecordingSink::new())]);
        let front_end = RecordingSink::new();
        let outbound = Outbound {
            my_connection_info: &me,
            peers: &sinks,
            front_end: &front_end,
            register_peer_connection: None,
        };

        let chain = RegisterPeerConnection::new(None, successor.clone());
        chain.ack(&test_peer(4), &outbound);
        assert!(sinks[&successor].messages().is_empty());
    }
}
