use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use bytes::Bytes;
use tracing::{debug, trace};

use crate::messaging::connection_info::Peer;
use crate::messaging::envelope::Envelope;
use crate::messaging::message::Message;
use crate::peer_communicator::sink::Outbound;


/// The receiving half of the reliable channel from one peer. Every received payload is
///  acknowledged (again, for duplicates), and payloads are passed to the front end strictly in
///  sequence number order, each exactly once.
pub struct PayloadReceiver {
    peer: Peer,
    next_expected: u64,
    buffer: BTreeMap<u64, Vec<Bytes>>,
}

impl PayloadReceiver {
    pub fn new(peer: Peer) -> PayloadReceiver {
        PayloadReceiver {
            peer,
            next_expected: 0,
            buffer: Default::default(),
        }
    }

    pub fn received_payload(&mut self, sequence_number: u64, frames: Vec<Bytes>, outbound: &Outbound) {
        outbound.send_to_peer(&self.peer, Envelope::new(Message::AcknowledgePayload {
            source: outbound.my_connection_info.clone(),
            sequence_number,
        }));

        if sequence_number < self.next_expected {
            debug!(peer = ?self.peer, sequence_number, "received duplicate of a delivered payload");
            return;
        }
        match self.buffer.entry(sequence_number) {
            Entry::Occupied(_) => {
                debug!(peer = ?self.peer, sequence_number, "received duplicate of a buffered payload");
                return;
            }
            Entry::Vacant(e) => {
                e.insert(frames);
            }
        }

        while let Some(frames) = self.buffer.remove(&self.next_expected) {
            trace!(peer = ?self.peer, sequence_number = self.next_expected, "delivering payload");
            outbound.send_to_front_end(Envelope::with_frames(
                Message::Payload {
                    source: self.peer.connection_info.clone(),
                    destination: outbound.my_connection_info.clone(),
                    sequence_number: self.next_expected,
                },
                frames,
            ));
            self.next_expected += 1;
        }
    }

    /// `false` while payloads are buffered waiting for an earlier one
    pub fn is_ready_to_close(&self) -> bool {
        self.buffer.is_empty()
    }
}
