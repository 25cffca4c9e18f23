//! VBAN packet header and packet validation
//!
//! Layout (28 bytes, followed by the payload):
//!
//! ```text
//! 0..4    "VBAN"
//! 4       sample rate index (5 bits) | sub-protocol (3 bits)
//! 5       samples per channel - 1
//! 6       channels - 1
//! 7       bit resolution (3 bits) | reserved | codec (3 bits)
//! 8..24   stream name, null padded
//! 24..28  frame counter, little endian
//! ```

use bytes::{BufMut, BytesMut};
use std::fmt;

use crate::constants::{HEADER_SIZE, MAX_SAMPLES_PER_PACKET, STREAM_NAME_SIZE};
use crate::error::PacketError;
use crate::protocol::format::{
    BitResolution, CODEC_MASK, CODEC_PCM, PROTOCOL_AUDIO, PROTOCOL_MASK,
    SAMPLE_RATES, SAMPLE_RATE_MASK,
};

/// Packet magic
pub const MAGIC: &[u8; 4] = b"VBAN";

/// Fixed-width stream name.
///
/// Bytes after the first NUL are ignored, so two names compare equal under
/// `strncmp(a, b, 16)` semantics.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct StreamName([u8; STREAM_NAME_SIZE]);

impl StreamName {
    /// Build from a string, truncated to 16 bytes
    pub fn new(name: &str) -> Self {
        Self::from_bytes(name.as_bytes())
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut raw = [0u8; STREAM_NAME_SIZE];
        for (dst, &src) in raw.iter_mut().zip(bytes.iter()) {
            if src == 0 {
                break;
            }
            *dst = src;
        }
        Self(raw)
    }

    /// Empty names act as "any stream" filters
    pub fn is_empty(&self) -> bool {
        self.0[0] == 0
    }

    pub fn as_bytes(&self) -> &[u8; STREAM_NAME_SIZE] {
        &self.0
    }

    fn len(&self) -> usize {
        self.0.iter().position(|&b| b == 0).unwrap_or(STREAM_NAME_SIZE)
    }
}

impl fmt::Display for StreamName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0[..self.len()]))
    }
}

impl fmt::Debug for StreamName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StreamName({:?})", self.to_string())
    }
}

impl From<&str> for StreamName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Decoded VBAN audio header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VbanHeader {
    /// Index into [`SAMPLE_RATES`]
    pub sample_rate_index: u8,
    /// Samples per channel, 1..=256
    pub samples: u16,
    /// Channel count, 1..=256
    pub channels: u16,
    pub resolution: BitResolution,
    pub stream_name: StreamName,
    pub frame_counter: u32,
}

impl VbanHeader {
    /// Header for an audio stream; `samples` is filled in per packet
    pub fn audio(
        sample_rate_index: u8,
        resolution: BitResolution,
        channels: u16,
        stream_name: StreamName,
    ) -> Self {
        Self {
            sample_rate_index,
            samples: 1,
            channels,
            resolution,
            stream_name,
            frame_counter: 0,
        }
    }

    /// Decode and validate the header of a datagram.
    ///
    /// Checks magic, sample rate index, sub-protocol and codec. The payload
    /// size is checked by [`Packet::parse`].
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        if buf.len() < HEADER_SIZE {
            return Err(PacketError::TooShort(buf.len()));
        }
        if &buf[0..4] != MAGIC {
            return Err(PacketError::BadMagic);
        }

        let sr = buf[4];
        let sample_rate_index = sr & SAMPLE_RATE_MASK;
        if sample_rate_index as usize >= SAMPLE_RATES.len() {
            return Err(PacketError::SampleRateIndex(sample_rate_index));
        }
        if sr & PROTOCOL_MASK != PROTOCOL_AUDIO {
            return Err(PacketError::UnsupportedProtocol(sr & PROTOCOL_MASK));
        }

        let format_bit = buf[7];
        if format_bit & CODEC_MASK != CODEC_PCM {
            return Err(PacketError::UnsupportedCodec(format_bit));
        }

        let mut counter = [0u8; 4];
        counter.copy_from_slice(&buf[24..28]);

        Ok(Self {
            sample_rate_index,
            samples: buf[5] as u16 + 1,
            channels: buf[6] as u16 + 1,
            resolution: BitResolution::from_bits(format_bit),
            stream_name: StreamName::from_bytes(&buf[8..8 + STREAM_NAME_SIZE]),
            frame_counter: u32::from_le_bytes(counter),
        })
    }

    /// Append the 28 header bytes to `buf`
    pub fn encode(&self, buf: &mut BytesMut) {
        debug_assert!((1..=MAX_SAMPLES_PER_PACKET as u16).contains(&self.samples));
        debug_assert!((1..=256).contains(&self.channels));

        buf.reserve(HEADER_SIZE);
        buf.put_slice(MAGIC);
        buf.put_u8((self.sample_rate_index & SAMPLE_RATE_MASK) | PROTOCOL_AUDIO);
        buf.put_u8((self.samples - 1) as u8);
        buf.put_u8((self.channels - 1) as u8);
        buf.put_u8(self.resolution.bits() | CODEC_PCM);
        buf.put_slice(self.stream_name.as_bytes());
        buf.put_u32_le(self.frame_counter);
    }

    /// Sample rate in Hz
    pub fn sample_rate(&self) -> u32 {
        SAMPLE_RATES[self.sample_rate_index as usize]
    }

    /// Payload size implied by the header, `None` for packed resolutions
    pub fn payload_len(&self) -> Option<usize> {
        self.resolution
            .bytes_per_sample()
            .map(|size| size * self.samples as usize * self.channels as usize)
    }

    /// Duration of the packet's audio in nanoseconds
    pub fn duration_ns(&self) -> u64 {
        self.samples as u64 * 1_000_000_000 / self.sample_rate() as u64
    }
}

/// A validated VBAN audio packet borrowing its payload from the datagram
#[derive(Debug, Clone, Copy)]
pub struct Packet<'a> {
    pub header: VbanHeader,
    /// Exactly `header.payload_len()` bytes
    pub payload: &'a [u8],
}

impl<'a> Packet<'a> {
    pub fn parse(datagram: &'a [u8]) -> Result<Self, PacketError> {
        let header = VbanHeader::decode(datagram)?;
        let expected = header
            .payload_len()
            .ok_or(PacketError::UnsupportedResolution(header.resolution.bits()))?;

        let payload = &datagram[HEADER_SIZE..];
        if payload.len() < expected {
            return Err(PacketError::PayloadTooSmall {
                expected,
                actual: payload.len(),
            });
        }

        Ok(Self {
            header,
            payload: &payload[..expected],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> VbanHeader {
        VbanHeader {
            sample_rate_index: 3,
            samples: 256,
            channels: 2,
            resolution: BitResolution::Int16,
            stream_name: StreamName::new("studio"),
            frame_counter: 0x0102_0304,
        }
    }

    #[test]
    fn test_header_layout() {
        let mut buf = BytesMut::new();
        header().encode(&mut buf);

        assert_eq!(buf.len(), HEADER_SIZE);
        assert_eq!(&buf[0..4], b"VBAN");
        assert_eq!(buf[4], 3);
        assert_eq!(buf[5], 255);
        assert_eq!(buf[6], 1);
        assert_eq!(buf[7], 1);
        assert_eq!(&buf[8..14], b"studio");
        assert!(buf[14..24].iter().all(|&b| b == 0));
        assert_eq!(&buf[24..28], &[0x04, 0x03, 0x02, 0x01]);

        assert_eq!(VbanHeader::decode(&buf).unwrap(), header());
    }

    #[test]
    fn test_rejects_bad_magic() {
        let mut buf = BytesMut::new();
        header().encode(&mut buf);
        buf[0] = b'X';
        assert_eq!(VbanHeader::decode(&buf), Err(PacketError::BadMagic));
    }

    #[test]
    fn test_rejects_rate_index_out_of_range() {
        let mut buf = BytesMut::new();
        header().encode(&mut buf);
        buf[4] = 21;
        assert_eq!(VbanHeader::decode(&buf), Err(PacketError::SampleRateIndex(21)));
    }

    #[test]
    fn test_rejects_non_audio_and_non_pcm() {
        let mut buf = BytesMut::new();
        header().encode(&mut buf);

        let mut serial = buf.clone();
        serial[4] |= 0x20;
        assert_eq!(
            VbanHeader::decode(&serial),
            Err(PacketError::UnsupportedProtocol(0x20))
        );

        buf[7] |= 0x20;
        assert_eq!(VbanHeader::decode(&buf), Err(PacketError::UnsupportedCodec(0x21)));
    }

    #[test]
    fn test_rejects_short_datagram() {
        assert_eq!(VbanHeader::decode(b"VBAN"), Err(PacketError::TooShort(4)));
    }

    #[test]
    fn test_packet_payload_size() {
        let mut buf = BytesMut::new();
        header().encode(&mut buf);
        buf.extend_from_slice(&vec![0u8; 256 * 2 * 2 - 1]);

        assert_eq!(
            Packet::parse(&buf).unwrap_err(),
            PacketError::PayloadTooSmall {
                expected: 1024,
                actual: 1023
            }
        );

        buf.extend_from_slice(&[0u8; 9]);
        let packet = Packet::parse(&buf).unwrap();
        assert_eq!(packet.payload.len(), 1024);
        assert_eq!(packet.header.sample_rate(), 48000);
    }

    #[test]
    fn test_packed_resolution_rejected() {
        let mut h = header();
        h.resolution = BitResolution::Bits12;
        let mut buf = BytesMut::new();
        h.encode(&mut buf);
        buf.extend_from_slice(&[0u8; 2048]);
        assert_eq!(
            Packet::parse(&buf).unwrap_err(),
            PacketError::UnsupportedResolution(6)
        );
    }

    #[test]
    fn test_stream_name_semantics() {
        let long = StreamName::new("a-very-long-stream-name");
        assert_eq!(long.to_string(), "a-very-long-stre");

        let padded = StreamName::from_bytes(b"mic\0garbage");
        assert_eq!(padded, StreamName::new("mic"));
        assert!(StreamName::new("").is_empty());
        assert!(!padded.is_empty());
    }
}
