//! Finding the peers of a group before connecting to them. Participants ping a well-known UDP
//!  address; the one participant listening there (the leader) registers every participant it
//!  hears from, and the register forwarding chain of the peer communicators passes that knowledge
//!  on to everybody else.

pub mod discovery_strategy;
pub mod local_discovery_strategy;
pub mod multi_node_discovery_strategy;
pub mod ping_datagram;
pub mod ping_discovery;
