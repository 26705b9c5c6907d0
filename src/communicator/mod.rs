//! Collective operations across all instances on all nodes, built from two peer communicators:
//!  one between the instances on a node, and one between the nodes' leaders (instance 0).

pub mod communicator;
pub mod config;
