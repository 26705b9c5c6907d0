use async_trait::async_trait;

use crate::error::CommunicatorResult;
use crate::peer_communicator::peer_communicator::PeerCommunicator;


#[async_trait]
pub trait DiscoveryStrategy: Send + Sync {
    /// Returns when all of the communicator's peers are connected, or with
    ///  `CommunicatorError::DiscoveryTimeout`
    async fn discover_peers(&self, peer_communicator: &mut PeerCommunicator) -> CommunicatorResult<()>;
}
