use anyhow::anyhow;
use std::cmp::Ordering;
use std::fmt::{Debug, Display, Formatter};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use bytes::{Buf, BufMut, BytesMut};

use crate::util::buf::{put_string, try_get_string};


/// An IP address, optionally with the length of its network prefix. The prefix is used during
///  discovery to ignore pings from outside our own subnet.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct IpAddress {
    pub ip: IpAddr,
    pub network_prefix: Option<u8>,
}
impl Debug for IpAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.network_prefix {
            Some(prefix) => write!(f, "{}/{}", self.ip, prefix),
            None => write!(f, "{}", self.ip),
        }
    }
}
impl From<IpAddr> for IpAddress {
    fn from(ip: IpAddr) -> Self {
        IpAddress::new(ip)
    }
}

impl IpAddress {
    pub fn new(ip: IpAddr) -> IpAddress {
        IpAddress {
            ip,
            network_prefix: None,
        }
    }

    pub fn with_network_prefix(ip: IpAddr, network_prefix: u8) -> IpAddress {
        IpAddress {
            ip,
            network_prefix: Some(network_prefix),
        }
    }

    pub fn localhost() -> IpAddress {
        IpAddress::new(IpAddr::V4(Ipv4Addr::LOCALHOST))
    }

    /// Without a network prefix, every address counts as 'same network'. Addresses of different
    ///  IP versions are never in the same network.
    pub fn is_in_same_network(&self, other: IpAddr) -> bool {
        let Some(prefix) = self.network_prefix
        else {
            return true;
        };

        match (self.ip, other) {
            (IpAddr::V4(mine), IpAddr::V4(other)) => {
                let mask = match prefix.min(32) {
                    0 => 0,
                    p => u32::MAX << (32 - p),
                };
                mine.to_bits() & mask == other.to_bits() & mask
            }
            (IpAddr::V6(mine), IpAddr::V6(other)) => {
                let mask = match prefix.min(128) {
                    0 => 0,
                    p => u128::MAX << (128 - p),
                };
                mine.to_bits() & mask == other.to_bits() & mask
            }
            _ => false,
        }
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        match self.ip {
            IpAddr::V4(ip) => {
                buf.put_u8(4);
                buf.put_u32(ip.to_bits());
            }
            IpAddr::V6(ip) => {
                buf.put_u8(6);
                buf.put_u128(ip.to_bits());
            }
        }
        match self.network_prefix {
            None => buf.put_u8(0),
            Some(prefix) => {
                buf.put_u8(1);
                buf.put_u8(prefix);
            }
        }
    }

    pub fn try_deser(buf: &mut impl Buf) -> anyhow::Result<IpAddress> {
        let ip = match buf.try_get_u8()? {
            4 => IpAddr::V4(Ipv4Addr::from_bits(buf.try_get_u32()?)),
            6 => IpAddr::V6(Ipv6Addr::from_bits(buf.try_get_u128()?)),
            n => return Err(anyhow!("invalid ip address discriminator: {}", n)),
        };
        let network_prefix = match buf.try_get_u8()? {
            0 => None,
            1 => Some(buf.try_get_u8()?),
            n => return Err(anyhow!("invalid network prefix discriminator: {}", n)),
        };
        Ok(IpAddress {
            ip,
            network_prefix,
        })
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Port(pub u16);


/// Identifies one communicator endpoint within one session
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct ConnectionInfo {
    pub name: String,
    pub ipaddress: IpAddress,
    pub port: Port,
    pub group_identifier: String,
}

impl ConnectionInfo {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ipaddress.ip, self.port.0)
    }

    pub fn ser(&self, buf: &mut BytesMut) {
        put_string(buf, &self.name);
        self.ipaddress.ser(buf);
        buf.put_u16(self.port.0);
        put_string(buf, &self.group_identifier);
    }

    pub fn try_deser(buf: &mut impl Buf) -> anyhow::Result<ConnectionInfo> {
        let name = try_get_string(buf)?;
        let ipaddress = IpAddress::try_deser(buf)?;
        let port = Port(buf.try_get_u16()?);
        let group_identifier = try_get_string(buf)?;
        Ok(ConnectionInfo {
            name,
            ipaddress,
            port,
            group_identifier,
        })
    }
}


/// The addressable unit for sending and receiving. Peers are ordered by ip and port so that all
///  participants of a group arrive at the same order without coordination.
#[derive(Clone, Eq, PartialEq, Hash)]
pub struct Peer {
    pub connection_info: ConnectionInfo,
}
impl Peer {
    pub fn new(connection_info: ConnectionInfo) -> Peer {
        Peer { connection_info }
    }
}
impl From<ConnectionInfo> for Peer {
    fn from(connection_info: ConnectionInfo) -> Self {
        Peer::new(connection_info)
    }
}

impl Ord for Peer {
    fn cmp(&self, other: &Self) -> Ordering {
        let a = &self.connection_info;
        let b = &other.connection_info;
        // NB: ip and port are the sort key, the rest only makes the order consistent with Eq
        a.ipaddress.ip.cmp(&b.ipaddress.ip)
            .then(a.port.cmp(&b.port))
            .then_with(|| a.ipaddress.network_prefix.cmp(&b.ipaddress.network_prefix))
            .then_with(|| a.name.cmp(&b.name))
            .then_with(|| a.group_identifier.cmp(&b.group_identifier))
    }
}
impl PartialOrd for Peer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Debug for Peer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}@{:?}:{}]", self.connection_info.name, self.connection_info.ipaddress, self.connection_info.port.0)
    }
}
impl Display for Peer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use rstest::rstest;
    use std::str::FromStr;

    fn ip(s: &str) -> IpAddr {
        IpAddr::from_str(s).unwrap()
    }

    fn connection_info(name: &str, ip_str: &str, port: u16) -> ConnectionInfo {
        ConnectionInfo {
            name: name.to_string(),
            ipaddress: IpAddress::new(ip(ip_str)),
            port: Port(port),
            group_identifier: "g1".to_string(),
        }
    }

    #[rstest]
    #[case::no_prefix(IpAddress::new(ip("10.0.0.1")), "192.168.1.1", true)]
    #[case::same_24(IpAddress::with_network_prefix(ip("10.0.0.1"), 24), "10.0.0.200", true)]
    #[case::other_24(IpAddress::with_network_prefix(ip("10.0.0.1"), 24), "10.0.1.1", false)]
    #[case::same_16(IpAddress::with_network_prefix(ip("10.0.0.1"), 16), "10.0.1.1", true)]
    #[case::zero_prefix(IpAddress::with_network_prefix(ip("10.0.0.1"), 0), "8.8.8.8", true)]
    #[case::full_prefix(IpAddress::with_network_prefix(ip("10.0.0.1"), 32), "10.0.0.2", false)]
    #[case::oversized_prefix(IpAddress::with_network_prefix(ip("10.0.0.1"), 40), "10.0.0.1", true)]
    #[case::v6_same(IpAddress::with_network_prefix(ip("2001:db8::1"), 64), "2001:db8::ffff", true)]
    #[case::v6_other(IpAddress::with_network_prefix(ip("2001:db8::1"), 64), "2001:db9::1", false)]
    #[case::mixed_versions(IpAddress::with_network_prefix(ip("10.0.0.1"), 8), "::1", false)]
    fn test_is_in_same_network(#[case] mine: IpAddress, #[case] other: &str, #[case] expected: bool) {
        assert_eq!(mine.is_in_same_network(ip(other)), expected);
    }

    #[rstest]
    #[case::v4(IpAddress::new(ip("1.2.3.4")), b"\x04\x01\x02\x03\x04\x00".as_slice())]
    #[case::v4_prefix(IpAddress::with_network_prefix(ip("1.2.3.4"), 24), b"\x04\x01\x02\x03\x04\x01\x18".as_slice())]
    fn test_ip_address_ser(#[case] address: IpAddress, #[case] expected: &[u8]) {
        let mut buf = BytesMut::new();
        address.ser(&mut buf);
        assert_eq!(buf.as_ref(), expected);
    }

    #[rstest]
    #[case::bad_discriminator(b"\x05\x01\x02\x03\x04\x00".as_slice())]
    #[case::bad_prefix_discriminator(b"\x04\x01\x02\x03\x04\x02".as_slice())]
    #[case::truncated(b"\x06\x01\x02".as_slice())]
    #[case::empty(b"".as_slice())]
    #[case::missing_prefix(b"\x04\x01\x02\x03\x04".as_slice())]
    #[case::missing_prefix_length(b"\x04\x01\x02\x03\x04\x01".as_slice())]
    fn test_ip_address_deser_invalid(#[case] mut buf: &[u8]) {
        assert!(IpAddress::try_deser(&mut buf).is_err());
    }

    #[test]
    fn test_connection_info_ser_deser() {
        let mut info = connection_info("a", "2001:db8::1", 4711);
        info.ipaddress.network_prefix = Some(48);

        let mut buf = BytesMut::new();
        info.ser(&mut buf);
        let mut deser_buf: &[u8] = &buf;
        assert_eq!(ConnectionInfo::try_deser(&mut deser_buf).unwrap(), info);
        assert!(deser_buf.is_empty());
    }

    #[test]
    fn test_connection_info_deser_truncated_port() {
        let mut buf = BytesMut::new();
        put_string(&mut buf, "a");
        IpAddress::new(ip("1.2.3.4")).ser(&mut buf);
        buf.put_u8(0x12);

        let mut deser_buf: &[u8] = &buf;
        assert!(ConnectionInfo::try_deser(&mut deser_buf).is_err());
    }

    #[test]
    fn test_peer_order() {
        let mut peers = vec![
            Peer::new(connection_info("x", "127.0.0.2", 1000)),
            Peer::new(connection_info("y", "127.0.0.1", 2000)),
            Peer::new(connection_info("z", "127.0.0.1", 1000)),
        ];
        peers.sort();

        let names = peers.iter()
            .map(|p| p.connection_info.name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["z", "y", "x"]);
    }

    #[test]
    fn test_peer_order_consistent_with_eq() {
        let a = Peer::new(connection_info("a", "127.0.0.1", 1000));
        let b = Peer::new(connection_info("b", "127.0.0.1", 1000));
        assert_ne!(a, b);
        assert_ne!(a.cmp(&b), Ordering::Equal);
        assert_eq!(a.cmp(&a.clone()), Ordering::Equal);
    }
}
