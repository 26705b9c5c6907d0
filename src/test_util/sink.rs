use std::sync::{Arc, Mutex, PoisonError};

use crate::messaging::envelope::Envelope;
use crate::messaging::message::Message;
use crate::peer_communicator::sink::MessageSink;


/// A [MessageSink] that records everything sent to it. Clones share the recorded messages.
#[derive(Clone, Debug, Default)]
pub struct RecordingSink {
    sent: Arc<Mutex<Vec<Envelope>>>,
}
impl RecordingSink {
    pub fn new() -> RecordingSink {
        Default::default()
    }

    /// returns sent envelopes, clearing the internal buffer
    pub fn envelopes(&self) -> Vec<Envelope> {
        let mut lock = self.sent.lock()
            .unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *lock)
    }

    /// returns sent messages without their frames, clearing the internal buffer
    pub fn messages(&self) -> Vec<Message> {
        self.envelopes()
            .into_iter()
            .map(|e| e.message)
            .collect()
    }
}

impl MessageSink for RecordingSink {
    fn send(&self, envelope: Envelope) {
        self.sent.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(envelope);
    }
}
