pub mod payload_receiver;
pub mod payload_sender;
