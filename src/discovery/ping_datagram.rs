use std::fmt::{Debug, Formatter};

use anyhow::bail;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use crc::Crc;

use crate::messaging::connection_info::ConnectionInfo;
use crate::messaging::message::Message;


/// Discovery datagrams are not protected by a transport checksum beyond UDP's optional one, so
///  they carry their own
#[derive(Clone, Copy, Eq, PartialEq)]
pub struct Checksum(pub u64);
impl Debug for Checksum {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x?}", self.0)
    }
}
impl Checksum {
    pub fn new(msg: &[u8]) -> Checksum {
        let hasher = Crc::<u64>::new(&crc::CRC_64_REDIS);
        let mut digest = hasher.digest();
        digest.update(msg);

        Checksum(
            digest.finalize()
        )
    }
}

/// checksum (u64 BE) followed by a serialized `Ping` message
pub fn ping_datagram(source: &ConnectionInfo) -> Bytes {
    let message = Message::Ping { source: source.clone() }.to_bytes();

    let mut buf = BytesMut::with_capacity(message.len() + size_of::<u64>());
    buf.put_u64(Checksum::new(&message).0);
    buf.put_slice(&message);
    buf.freeze()
}

pub fn try_parse_ping_datagram(mut buf: &[u8]) -> anyhow::Result<ConnectionInfo> {
    let checksum = Checksum(buf.try_get_u64()?);
    let actual = Checksum::new(buf);
    if checksum != actual {
        bail!("checksum mismatch: expected {:?}, was {:?}", checksum, actual);
    }

    match Message::from_bytes(buf)? {
        Message::Ping { source } => Ok(source),
        other => bail!("expected a Ping message, got {}", other.message_type()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::connection_info::test_connection_info;
    use rstest::rstest;

    #[test]
    fn test_roundtrip() {
        let datagram = ping_datagram(&test_connection_info(5));
        assert_eq!(try_parse_ping_datagram(&datagram).unwrap(), test_connection_info(5));
    }

    #[rstest]
    #[case::checksum(0)]
    #[case::first_message_byte(8)]
    #[case::last_byte(usize::MAX)]
    fn test_corrupted(#[case] index: usize) {
        let mut datagram = ping_datagram(&test_connection_info(5)).to_vec();
        let index = index.min(datagram.len() - 1);
        datagram[index] ^= 0x40;

        assert!(try_parse_ping_datagram(&datagram).is_err());
    }

    #[rstest]
    #[case::empty(vec![])]
    #[case::checksum_only(vec![0; 8])]
    #[case::truncated(ping_datagram(&test_connection_info(5))[..12].to_vec())]
    fn test_malformed(#[case] datagram: Vec<u8>) {
        assert!(try_parse_ping_datagram(&datagram).is_err());
    }

    #[test]
    fn test_other_message_type() {
        let message = Message::SynchronizeConnection { source: test_connection_info(1) }.to_bytes();
        let mut buf = BytesMut::new();
        buf.put_u64(Checksum::new(&message).0);
        buf.put_slice(&message);

        assert!(try_parse_ping_datagram(&buf).is_err());
    }
}
