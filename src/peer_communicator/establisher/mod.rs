pub mod abort_timeout_sender;
pub mod acknowledge_register_peer_sender;
pub mod connection_establisher;
pub mod peer_is_ready_sender;
pub mod register_peer_sender;
pub mod synchronize_connection_sender;
