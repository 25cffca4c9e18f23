//! VBAN wire protocol
//!
//! Only the audio sub-protocol with the PCM codec is understood; every other
//! datagram is rejected with a [`PacketError`](crate::error::PacketError).

pub mod format;
pub mod header;

pub use format::{sample_rate, sample_rate_index, BitResolution, SAMPLE_RATES};
pub use header::{Packet, StreamName, VbanHeader, MAGIC};
