//! PCM decoder
//!
//! Turns a validated VBAN payload back into interleaved `f32` samples.

use crate::error::CodecError;
use crate::protocol::{BitResolution, Packet};

/// Decode `payload` of the given resolution, appending to `out`
pub fn decode_into(
    resolution: BitResolution,
    payload: &[u8],
    out: &mut Vec<f32>,
) -> Result<(), CodecError> {
    let size = resolution
        .bytes_per_sample()
        .ok_or_else(|| CodecError::UnsupportedFormat(format!("cannot decode {}", resolution)))?;
    if payload.len() % size != 0 {
        return Err(CodecError::PayloadLength {
            expected: payload.len() - payload.len() % size,
            actual: payload.len(),
        });
    }

    out.reserve(payload.len() / size);
    let chunks = payload.chunks_exact(size);

    match resolution {
        BitResolution::Int8 => {
            out.extend(chunks.map(|c| (c[0] as f32 - 128.0) / 128.0));
        }
        BitResolution::Int16 => {
            out.extend(chunks.map(|c| i16::from_le_bytes([c[0], c[1]]) as f32 / 32768.0));
        }
        BitResolution::Int24 => {
            out.extend(chunks.map(|c| {
                // Sign-extend through the top byte
                let v = i32::from_le_bytes([0, c[0], c[1], c[2]]) >> 8;
                v as f32 * (1.0 / 8388608.0)
            }));
        }
        BitResolution::Int32 => {
            out.extend(chunks.map(|c| {
                (i32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f64 / 2147483648.0) as f32
            }));
        }
        BitResolution::Float32 => {
            out.extend(chunks.map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]])));
        }
        BitResolution::Float64 => {
            out.extend(chunks.map(|c| {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(c);
                f64::from_le_bytes(raw) as f32
            }));
        }
        BitResolution::Bits12 | BitResolution::Bits10 => unreachable!("no byte size"),
    }

    Ok(())
}

/// PCM decoder with statistics
#[derive(Debug, Default)]
pub struct PcmDecoder {
    /// Packets decoded
    packets_decoded: u64,
    /// Sample frames produced
    frames_produced: u64,
}

impl PcmDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a packet to interleaved samples
    pub fn decode(&mut self, packet: &Packet<'_>) -> Result<Vec<f32>, CodecError> {
        let mut samples = Vec::new();
        decode_into(packet.header.resolution, packet.payload, &mut samples)?;

        self.packets_decoded += 1;
        self.frames_produced += packet.header.samples as u64;
        Ok(samples)
    }

    /// Get statistics
    pub fn stats(&self) -> DecoderStats {
        DecoderStats {
            packets_decoded: self.packets_decoded,
            frames_produced: self.frames_produced,
        }
    }
}

/// Decoder statistics
#[derive(Debug, Clone)]
pub struct DecoderStats {
    pub packets_decoded: u64,
    pub frames_produced: u64,
}
