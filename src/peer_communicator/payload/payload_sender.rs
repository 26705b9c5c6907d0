use std::collections::BTreeMap;
use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::messaging::connection_info::Peer;
use crate::messaging::envelope::Envelope;
use crate::messaging::message::Message;
use crate::peer_communicator::sink::Outbound;
use crate::util::timer::Timer;


struct OutstandingPayload {
    frames: Vec<Bytes>,
    retry_timer: Timer,
    abort_deadline: Instant,
}

/// The sending half of the reliable channel to one peer: numbers payloads, and retransmits each
///  of them until it is acknowledged or its abort timeout expires
pub struct PayloadSender {
    peer: Peer,
    retry_interval: Duration,
    abort_timeout: Duration,
    next_sequence_number: u64,
    outstanding: BTreeMap<u64, OutstandingPayload>,
}

impl PayloadSender {
    pub fn new(peer: Peer, retry_interval: Duration, abort_timeout: Duration) -> PayloadSender {
        PayloadSender {
            peer,
            retry_interval,
            abort_timeout,
            next_sequence_number: 0,
            outstanding: Default::default(),
        }
    }

    /// returns the sequence number assigned to the payload
    pub fn send(&mut self, frames: Vec<Bytes>, outbound: &Outbound) -> u64 {
        let sequence_number = self.next_sequence_number;
        self.next_sequence_number += 1;

        let payload = OutstandingPayload {
            frames,
            retry_timer: Timer::new(self.retry_interval),
            abort_deadline: Instant::now() + self.abort_timeout,
        };
        send_payload(&self.peer, sequence_number, &payload.frames, outbound);
        self.outstanding.insert(sequence_number, payload);
        sequence_number
    }

    pub fn received_acknowledge_payload(&mut self, sequence_number: u64) {
        if self.outstanding.remove(&sequence_number).is_none() {
            debug!(peer = ?self.peer, sequence_number, "received acknowledgement for a payload that is not outstanding - ignoring");
        }
    }

    /// drives retransmission and abort - call this regularly
    pub fn try_send(&mut self, outbound: &Outbound) {
        let now = Instant::now();

        let aborted = self.outstanding.iter()
            .filter(|(_, p)| p.abort_deadline <= now)
            .map(|(n, _)| *n)
            .collect::<Vec<_>>();
        for sequence_number in aborted {
            self.outstanding.remove(&sequence_number);
            self.abort(sequence_number, format!("not acknowledged within {:?}", self.abort_timeout), outbound);
        }

        for (sequence_number, payload) in self.outstanding.iter_mut() {
            if payload.retry_timer.is_expired() {
                send_payload(&self.peer, *sequence_number, &payload.frames, outbound);
                payload.retry_timer.reset();
            }
        }
    }

    /// gives up on all outstanding payloads, reporting each of them to the front end
    pub fn abort_all(&mut self, reason: &str, outbound: &Outbound) {
        for sequence_number in std::mem::take(&mut self.outstanding).into_keys() {
            self.abort(sequence_number, reason.to_string(), outbound);
        }
    }

    fn abort(&self, sequence_number: u64, reason: String, outbound: &Outbound) {
        warn!(peer = ?self.peer, sequence_number, "aborting payload: {}", reason);
        outbound.send_to_front_end(Envelope::new(Message::AbortPayload {
            peer: self.peer.connection_info.clone(),
            sequence_number,
            reason,
        }));
    }

    pub fn is_ready_to_close(&self) -> bool {
        self.outstanding.is_empty()
    }
}

fn send_payload(peer: &Peer, sequence_number: u64, frames: &[Bytes], outbound: &Outbound) {
    trace!(?peer, sequence_number, "sending payload");
    outbound.send_to_peer(peer, Envelope::with_frames(
        Message::Payload {
            source: outbound.my_connection_info.clone(),
            destination: peer.connection_info.clone(),
            sequence_number,
        },
        frames.to_vec(),
    ));
}
