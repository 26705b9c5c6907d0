use thiserror::Error;

use crate::messaging::connection_info::{ConnectionInfo, Peer};


#[derive(Debug, Error)]
pub enum CommunicatorError {
    #[error("connection establishment with {peer:?} timed out: {reason}")]
    HandshakeTimeout { peer: ConnectionInfo, reason: String },

    #[error("payload #{sequence_number} to {peer:?} was aborted: {reason}")]
    PayloadAborted { peer: Peer, sequence_number: u64, reason: String },

    #[error("not all peers are connected yet")]
    PeersNotConnected,

    #[error("{0:?} is not a connected peer")]
    UnknownPeer(Peer),

    #[error("communicator is closed")]
    Closed,

    #[error("discovery timed out with {connected} of {expected} peers connected")]
    DiscoveryTimeout { connected: usize, expected: usize },

    #[error("timed out waiting for a message from {0:?}")]
    ReceiveTimeout(Peer),

    #[error("background worker failed to start: {0}")]
    WorkerStartup(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type CommunicatorResult<T> = Result<T, CommunicatorError>;
