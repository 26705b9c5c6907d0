pub mod buf;
pub mod random;
pub mod safe_converter;
pub mod timer;
