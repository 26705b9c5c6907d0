pub mod connection_info;
pub mod envelope;
pub mod message;
