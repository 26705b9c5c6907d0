pub mod background_thread;
pub mod background_worker;
pub mod config;
pub mod establisher;
pub mod payload;
pub mod peer_communicator;
pub mod peer_socket;
pub mod peer_state;
pub mod register_peer_connection;
pub mod sink;
