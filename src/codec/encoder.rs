//! PCM encoder
//!
//! Converts interleaved `f32` samples into VBAN payload bytes. Integer
//! formats use linear scaling by the full-scale value of the target width.

use bytes::{BufMut, Bytes, BytesMut};

use crate::constants::MAX_CHANNELS;
use crate::error::CodecError;
use crate::protocol::BitResolution;

const INT16_SCALE: f32 = 32768.0;
const INT24_SCALE: f32 = 8388608.0;

/// PCM encoder for one stream configuration
pub struct PcmEncoder {
    resolution: BitResolution,
    channels: u16,
    /// Sample frames encoded, all channels counted once
    frames_encoded: u64,
    /// Total bytes produced
    bytes_produced: u64,
}

impl PcmEncoder {
    /// Create an encoder for one of the supported target encodings:
    /// 16-bit integer, 24-bit integer or 32-bit float, with 1 to 256
    /// channels.
    pub fn new(resolution: BitResolution, channels: u16) -> Result<Self, CodecError> {
        if channels == 0 || channels > MAX_CHANNELS {
            return Err(CodecError::UnsupportedChannels(channels));
        }
        match resolution {
            BitResolution::Int16 | BitResolution::Int24 | BitResolution::Float32 => {}
            other => {
                return Err(CodecError::UnsupportedFormat(format!(
                    "cannot encode {}",
                    other
                )))
            }
        }

        Ok(Self {
            resolution,
            channels,
            frames_encoded: 0,
            bytes_produced: 0,
        })
    }

    /// Encode interleaved samples, appending to `out`.
    ///
    /// Returns the number of sample frames written.
    pub fn encode_into(&mut self, samples: &[f32], out: &mut BytesMut) -> Result<usize, CodecError> {
        let channels = self.channels as usize;
        if samples.len() % channels != 0 {
            return Err(CodecError::ChannelMismatch {
                len: samples.len(),
                channels,
            });
        }

        let start = out.len();
        out.reserve(samples.len() * self.bytes_per_sample());

        match self.resolution {
            BitResolution::Int16 => {
                for &s in samples {
                    out.put_i16_le((s * INT16_SCALE).clamp(-32768.0, 32767.0) as i16);
                }
            }
            BitResolution::Int24 => {
                for &s in samples {
                    let v = (s * INT24_SCALE).clamp(-8388608.0, 8388607.0) as i32;
                    out.put_slice(&v.to_le_bytes()[..3]);
                }
            }
            BitResolution::Float32 => {
                for &s in samples {
                    out.put_f32_le(s);
                }
            }
            _ => unreachable!("rejected in PcmEncoder::new"),
        }

        let frames = samples.len() / channels;
        self.frames_encoded += frames as u64;
        self.bytes_produced += (out.len() - start) as u64;
        Ok(frames)
    }

    /// Encode into a fresh buffer
    pub fn encode(&mut self, samples: &[f32]) -> Result<Bytes, CodecError> {
        let mut out = BytesMut::with_capacity(samples.len() * self.bytes_per_sample());
        self.encode_into(samples, &mut out)?;
        Ok(out.freeze())
    }

    pub fn resolution(&self) -> BitResolution {
        self.resolution
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Bytes per single-channel sample
    pub fn bytes_per_sample(&self) -> usize {
        match self.resolution {
            BitResolution::Int16 => 2,
            BitResolution::Int24 => 3,
            _ => 4,
        }
    }

    /// Bytes per sample frame (one sample on every channel)
    pub fn bytes_per_frame(&self) -> usize {
        self.bytes_per_sample() * self.channels as usize
    }

    /// Get statistics
    pub fn stats(&self) -> EncoderStats {
        EncoderStats {
            frames_encoded: self.frames_encoded,
            bytes_produced: self.bytes_produced,
        }
    }
}

/// Encoder statistics
#[derive(Debug, Clone, Default)]
pub struct EncoderStats {
    pub frames_encoded: u64,
    pub bytes_produced: u64,
}
