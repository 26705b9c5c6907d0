use std::net::{IpAddr, Ipv4Addr};

use crate::messaging::connection_info::{ConnectionInfo, IpAddress, Peer, Port};


pub const TEST_GROUP: &str = "g1";

/// convenience for unit tests: the same number always gives the same [ConnectionInfo], different
///  numbers give different ones, and the order of the numbers is the order of the resulting peers
pub fn test_connection_info(number: u16) -> ConnectionInfo {
    ConnectionInfo {
        name: format!("p{}", number),
        ipaddress: IpAddress::new(IpAddr::V4(Ipv4Addr::LOCALHOST)),
        port: Port(number),
        group_identifier: TEST_GROUP.to_string(),
    }
}

pub fn test_peer(number: u16) -> Peer {
    Peer::new(test_connection_info(number))
}
