use anyhow::anyhow;
use bytes::Bytes;

use crate::messaging::message::Message;


/// One multipart transport message: the serialized [Message] in the first frame, followed by
///  opaque payload frames (only present for `Payload` messages)
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Envelope {
    pub message: Message,
    pub frames: Vec<Bytes>,
}

impl Envelope {
    pub fn new(message: Message) -> Envelope {
        Envelope {
            message,
            frames: Vec::new(),
        }
    }

    pub fn with_frames(message: Message, frames: Vec<Bytes>) -> Envelope {
        Envelope {
            message,
            frames,
        }
    }

    pub fn to_multipart(&self) -> Vec<Bytes> {
        let mut result = Vec::with_capacity(self.frames.len() + 1);
        result.push(self.message.to_bytes());
        result.extend(self.frames.iter().cloned());
        result
    }

    pub fn try_from_multipart(mut parts: Vec<Bytes>) -> anyhow::Result<Envelope> {
        if parts.is_empty() {
            return Err(anyhow!("empty multipart message"));
        }
        let frames = parts.split_off(1);
        let message = Message::from_bytes(&parts[0])?;
        Ok(Envelope {
            message,
            frames,
        })
    }
}
