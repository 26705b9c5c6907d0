//! Utilities for testing code that is based on peer communication. They are used for testing this
//!  crate itself, and they are exported for application testing.

pub mod connection_info;
pub mod sink;

use std::net::UdpSocket;


/// Asks the OS for a currently unused UDP port on localhost. There is an inherent race until the
///  port is bound again, which is acceptable for tests.
pub fn free_udp_port() -> u16 {
    UdpSocket::bind("127.0.0.1:0")
        .and_then(|s| s.local_addr())
        .map(|a| a.port())
        .unwrap_or(0)
}
