pub mod fault_injection;
pub mod frame_codec;
pub mod socket;
pub mod tcp;
