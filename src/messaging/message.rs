use anyhow::{anyhow, bail};
use bytes::{Buf, Bytes, BytesMut};
use bytes_varint::{VarIntSupport, VarIntSupportMut};

use crate::messaging::connection_info::ConnectionInfo;
use crate::util::buf::{put_string, try_get_string};


/// Everything that travels between communicators, or between a communicator's front end and its
///  background worker.
///
/// The last group of variants only ever crosses the control channel:
///  * `AbortPayload`, `Timeout`, `PeerIsReadyToReceive` and `MyConnectionInfo` are events for the
///    front end
///  * `Stop` is a request to the background worker
///  * `Payload` and `RegisterPeer` go both ways. When the front end sends a `Payload`, the worker
///    assigns the sequence number and ignores the one in the request.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Message {
    Ping { source: ConnectionInfo },
    RegisterPeer { peer: ConnectionInfo, source: ConnectionInfo },
    AcknowledgeRegisterPeer { peer: ConnectionInfo, source: ConnectionInfo },
    RegisterPeerComplete { peer: ConnectionInfo, source: ConnectionInfo },
    SynchronizeConnection { source: ConnectionInfo },
    AcknowledgeConnection { source: ConnectionInfo },
    Payload { source: ConnectionInfo, destination: ConnectionInfo, sequence_number: u64 },
    AcknowledgePayload { source: ConnectionInfo, sequence_number: u64 },

    AbortPayload { peer: ConnectionInfo, sequence_number: u64, reason: String },
    Timeout { peer: ConnectionInfo, reason: String },
    PeerIsReadyToReceive { peer: ConnectionInfo },
    MyConnectionInfo { my_connection_info: ConnectionInfo },
    Stop,
}

impl Message {
    pub fn message_type(&self) -> &'static str {
        match self {
            Message::Ping { .. } => "Ping",
            Message::RegisterPeer { .. } => "RegisterPeer",
            Message::AcknowledgeRegisterPeer { .. } => "AcknowledgeRegisterPeer",
            Message::RegisterPeerComplete { .. } => "RegisterPeerComplete",
            Message::SynchronizeConnection { .. } => "SynchronizeConnection",
            Message::AcknowledgeConnection { .. } => "AcknowledgeConnection",
            Message::Payload { .. } => "Payload",
            Message::AcknowledgePayload { .. } => "AcknowledgePayload",
            Message::AbortPayload { .. } => "AbortPayload",
            Message::Timeout { .. } => "Timeout",
            Message::PeerIsReadyToReceive { .. } => "PeerIsReadyToReceive",
            Message::MyConnectionInfo { .. } => "MyConnectionInfo",
            Message::Stop => "Stop",
        }
    }

    /// the sender of a message that travels between communicators
    pub fn source(&self) -> Option<&ConnectionInfo> {
        match self {
            Message::Ping { source } |
            Message::RegisterPeer { source, .. } |
            Message::AcknowledgeRegisterPeer { source, .. } |
            Message::RegisterPeerComplete { source, .. } |
            Message::SynchronizeConnection { source } |
            Message::AcknowledgeConnection { source } |
            Message::Payload { source, .. } |
            Message::AcknowledgePayload { source, .. } => Some(source),
            _ => None,
        }
    }

    pub fn ser(&self, buf: &mut BytesMut) {
        put_string(buf, self.message_type());
        match self {
            Message::Ping { source } |
            Message::SynchronizeConnection { source } |
            Message::AcknowledgeConnection { source } => {
                source.ser(buf);
            }
            Message::RegisterPeer { peer, source } |
            Message::AcknowledgeRegisterPeer { peer, source } |
            Message::RegisterPeerComplete { peer, source } => {
                peer.ser(buf);
                source.ser(buf);
            }
            Message::Payload { source, destination, sequence_number } => {
                source.ser(buf);
                destination.ser(buf);
                buf.put_u64_varint(*sequence_number);
            }
            Message::AcknowledgePayload { source, sequence_number } => {
                source.ser(buf);
                buf.put_u64_varint(*sequence_number);
            }
            Message::AbortPayload { peer, sequence_number, reason } => {
                peer.ser(buf);
                buf.put_u64_varint(*sequence_number);
                put_string(buf, reason);
            }
            Message::Timeout { peer, reason } => {
                peer.ser(buf);
                put_string(buf, reason);
            }
            Message::PeerIsReadyToReceive { peer } => {
                peer.ser(buf);
            }
            Message::MyConnectionInfo { my_connection_info } => {
                my_connection_info.ser(buf);
            }
            Message::Stop => {}
        }
    }

    pub fn try_deser(buf: &mut impl Buf) -> anyhow::Result<Message> {
        let message_type = try_get_string(buf)?;

        let result = match message_type.as_str() {
            "Ping" => Message::Ping {
                source: ConnectionInfo::try_deser(buf)?,
            },
            "RegisterPeer" => Message::RegisterPeer {
                peer: ConnectionInfo::try_deser(buf)?,
                source: ConnectionInfo::try_deser(buf)?,
            },
            "AcknowledgeRegisterPeer" => Message::AcknowledgeRegisterPeer {
                peer: ConnectionInfo::try_deser(buf)?,
                source: ConnectionInfo::try_deser(buf)?,
            },
            "RegisterPeerComplete" => Message::RegisterPeerComplete {
                peer: ConnectionInfo::try_deser(buf)?,
                source: ConnectionInfo::try_deser(buf)?,
            },
            "SynchronizeConnection" => Message::SynchronizeConnection {
                source: ConnectionInfo::try_deser(buf)?,
            },
            "AcknowledgeConnection" => Message::AcknowledgeConnection {
                source: ConnectionInfo::try_deser(buf)?,
            },
            "Payload" => Message::Payload {
                source: ConnectionInfo::try_deser(buf)?,
                destination: ConnectionInfo::try_deser(buf)?,
                sequence_number: buf.try_get_u64_varint()?,
            },
            "AcknowledgePayload" => Message::AcknowledgePayload {
                source: ConnectionInfo::try_deser(buf)?,
                sequence_number: buf.try_get_u64_varint()?,
            },
            "AbortPayload" => Message::AbortPayload {
                peer: ConnectionInfo::try_deser(buf)?,
                sequence_number: buf.try_get_u64_varint()?,
                reason: try_get_string(buf)?,
            },
            "Timeout" => Message::Timeout {
                peer: ConnectionInfo::try_deser(buf)?,
                reason: try_get_string(buf)?,
            },
            "PeerIsReadyToReceive" => Message::PeerIsReadyToReceive {
                peer: ConnectionInfo::try_deser(buf)?,
            },
            "MyConnectionInfo" => Message::MyConnectionInfo {
                my_connection_info: ConnectionInfo::try_deser(buf)?,
            },
            "Stop" => Message::Stop,
            other => return Err(anyhow!("unknown message type {:?}", other)),
        };
        Ok(result)
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.ser(&mut buf);
        buf.freeze()
    }

    /// parses a buffer that must contain exactly one message
    pub fn from_bytes(mut buf: &[u8]) -> anyhow::Result<Message> {
        let message = Message::try_deser(&mut buf)?;
        if !buf.is_empty() {
            bail!("{} trailing bytes after {} message", buf.len(), message.message_type());
        }
        Ok(message)
    }
}
