pub mod communicator;
pub mod discovery;
pub mod error;
pub mod messaging;
pub mod peer_communicator;
pub mod transport;
pub mod util;
pub mod test_util;
