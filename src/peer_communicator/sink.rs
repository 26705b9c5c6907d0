use std::collections::BTreeMap;

use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

use crate::messaging::connection_info::{ConnectionInfo, Peer};
use crate::messaging::envelope::Envelope;
use crate::peer_communicator::register_peer_connection::RegisterPeerConnection;


/// Fire-and-forget destination for outgoing messages. Delivery is not guaranteed - reliability
///  is the business of the retry timers in the protocol state machines.
pub trait MessageSink {
    fn send(&self, envelope: Envelope);
}

/// The background worker's event channel to the front end
impl MessageSink for UnboundedSender<Envelope> {
    fn send(&self, envelope: Envelope) {
        if UnboundedSender::send(self, envelope).is_err() {
            debug!("front end is gone, discarding event");
        }
    }
}

pub trait PeerSinks {
    fn sink_for(&self, peer: &Peer) -> Option<&dyn MessageSink>;
}
impl <S: MessageSink> PeerSinks for BTreeMap<Peer, S> {
    fn sink_for(&self, peer: &Peer) -> Option<&dyn MessageSink> {
        self.get(peer)
            .map(|s| s as &dyn MessageSink)
    }
}


/// Everything the per-peer state machines need for sending: connections to peers, the event
///  channel to the front end, and the register forwarding chain if there is one
pub struct Outbound<'a> {
    pub my_connection_info: &'a ConnectionInfo,
    pub peers: &'a dyn PeerSinks,
    pub front_end: &'a dyn MessageSink,
    pub register_peer_connection: Option<&'a RegisterPeerConnection>,
}
impl Outbound<'_> {
    pub fn send_to_peer(&self, peer: &Peer, envelope: Envelope) {
        match self.peers.sink_for(peer) {
            Some(sink) => sink.send(envelope),
            None => warn!("no connection to {:?}, dropping {} message", peer, envelope.message.message_type()),
        }
    }

    pub fn send_to_front_end(&self, envelope: Envelope) {
        self.front_end.send(envelope);
    }
}
