//! VBAN format tables: sample rates and bit resolutions

use serde::{Deserialize, Serialize};
use std::fmt;

/// Sample rates addressable by the 5-bit rate index, in index order
pub const SAMPLE_RATES: [u32; 21] = [
    6000, 12000, 24000, 48000, 96000, 192000, 384000, 8000, 16000, 32000, 64000, 128000,
    256000, 512000, 11025, 22050, 44100, 88200, 176400, 352800, 705600,
];

/// Mask of the sample rate index inside the rate byte
pub const SAMPLE_RATE_MASK: u8 = 0x1F;

/// Mask of the sub-protocol inside the rate byte
pub const PROTOCOL_MASK: u8 = 0xE0;

/// Sub-protocol tag for audio streams
pub const PROTOCOL_AUDIO: u8 = 0x00;

/// Mask of the bit resolution inside the format byte
pub const RESOLUTION_MASK: u8 = 0x07;

/// Mask of the codec inside the format byte
pub const CODEC_MASK: u8 = 0xE0;

/// Codec tag for linear PCM
pub const CODEC_PCM: u8 = 0x00;

/// Sample rate for a rate index
pub fn sample_rate(index: u8) -> Option<u32> {
    SAMPLE_RATES.get(index as usize).copied()
}

/// Rate index for a sample rate in Hz
pub fn sample_rate_index(rate: u32) -> Option<u8> {
    SAMPLE_RATES
        .iter()
        .position(|&r| r == rate)
        .map(|i| i as u8)
}

/// Whether `rate` can be carried by VBAN
pub fn is_supported_rate(rate: u32) -> bool {
    sample_rate_index(rate).is_some()
}

/// Sample encoding carried in the low bits of the format byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BitResolution {
    /// Unsigned 8-bit, offset by 128
    Int8,
    Int16,
    Int24,
    Int32,
    Float32,
    Float64,
    Bits12,
    Bits10,
}

impl BitResolution {
    pub fn from_bits(bits: u8) -> Self {
        match bits & RESOLUTION_MASK {
            0 => Self::Int8,
            1 => Self::Int16,
            2 => Self::Int24,
            3 => Self::Int32,
            4 => Self::Float32,
            5 => Self::Float64,
            6 => Self::Bits12,
            _ => Self::Bits10,
        }
    }

    pub fn bits(self) -> u8 {
        match self {
            Self::Int8 => 0,
            Self::Int16 => 1,
            Self::Int24 => 2,
            Self::Int32 => 3,
            Self::Float32 => 4,
            Self::Float64 => 5,
            Self::Bits12 => 6,
            Self::Bits10 => 7,
        }
    }

    /// Bytes per sample on the wire, `None` for the packed 10/12-bit formats
    pub fn bytes_per_sample(self) -> Option<usize> {
        match self {
            Self::Int8 => Some(1),
            Self::Int16 => Some(2),
            Self::Int24 => Some(3),
            Self::Int32 | Self::Float32 => Some(4),
            Self::Float64 => Some(8),
            Self::Bits12 | Self::Bits10 => None,
        }
    }
}

impl Default for BitResolution {
    fn default() -> Self {
        Self::Int24
    }
}

impl fmt::Display for BitResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Int8 => "int8",
            Self::Int16 => "int16",
            Self::Int24 => "int24",
            Self::Int32 => "int32",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
            Self::Bits12 => "12-bit",
            Self::Bits10 => "10-bit",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_table_lookup() {
        assert_eq!(sample_rate_index(48000), Some(3));
        assert_eq!(sample_rate_index(44100), Some(16));
        assert_eq!(sample_rate(3), Some(48000));
        assert_eq!(sample_rate(21), None);
        assert!(!is_supported_rate(47999));
    }

    #[test]
    fn test_resolution_bits() {
        for bits in 0..8u8 {
            assert_eq!(BitResolution::from_bits(bits).bits(), bits);
        }
        assert_eq!(BitResolution::from_bits(0x09), BitResolution::Int16);
        assert_eq!(BitResolution::Int24.bytes_per_sample(), Some(3));
        assert_eq!(BitResolution::Bits12.bytes_per_sample(), None);
    }
}
