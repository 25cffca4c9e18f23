//! PCM codec
//!
//! Converts between the internal `f32` sample representation and the
//! little-endian integer/float encodings carried in VBAN payloads.

pub mod decoder;
pub mod encoder;

pub use decoder::{decode_into, PcmDecoder};
pub use encoder::PcmEncoder;
