//! SenseLink wire protocol - GATT identifiers, samples and line decoding

pub mod ble;
pub mod line;
mod sample;

pub use ble::Command;
pub use line::{DecodeError, Decoded, decode, decode_at};
pub use sample::{FieldValue, Sample};
