//! # VBAN Transport
//!
//! Multichannel PCM audio over UDP using the VBAN wire protocol.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                               SENDER                                       │
//! │  ┌─────────────┐     ┌──────────────────────────────────────────────┐     │
//! │  │   Capture   │────▶│        VbanSender (network::sender)           │     │
//! │  │ (cpal/tone) │     │  queue ─▶ resample ─▶ PCM encode ─▶ packetize │     │
//! │  └─────────────┘     │                 "vban-out" thread             │     │
//! │                      └───────────────────────┬──────────────────────┘     │
//! └──────────────────────────────────────────────┼────────────────────────────┘
//!                                                │ UDP, 28-byte VBAN header
//!                                                ▼
//! ┌──────────────────────────────────────────────┼────────────────────────────┐
//! │                              RECEIVER                                      │
//! │  ┌────────────────────────────────────────────────────────────────────┐   │
//! │  │  Transport: DeviceRegistry (one ReceiverDevice per UDP port)        │   │
//! │  │  ┌──────────────────────────────────────────────────────────────┐  │   │
//! │  │  │ ReceiverDevice "vban-r-<port>": validate ─▶ SubscriberList   │  │   │
//! │  │  │   filter: (src & mask) == (addr & mask) && stream name       │  │   │
//! │  │  └──────┬─────────────────────┬─────────────────────┬───────────┘  │   │
//! │  └─────────┼─────────────────────┼─────────────────────┼──────────────┘   │
//! │            ▼                     ▼                     ▼                  │
//! │     ┌─────────────┐       ┌─────────────┐       ┌─────────────┐           │
//! │     │VbanReceiver │       │VbanReceiver │       │  any        │           │
//! │     │ decode, gap │       │ decode, gap │       │PacketHandler│           │
//! │     │  padding    │       │  padding    │       │             │           │
//! │     └─────────────┘       └─────────────┘       └─────────────┘           │
//! │                                                                            │
//! │  Resolver: host names in subscriber filters and sender destinations are   │
//! │  looked up on "vban-resolve" workers; Transport::shutdown waits for them. │
//! └────────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod codec;
pub mod config;
pub mod error;
pub mod network;
pub mod protocol;
pub mod refcount;
pub mod transport;

pub use error::{Error, Result};
pub use transport::Transport;

/// Application-wide constants
pub mod constants {
    /// Default UDP port for VBAN streams
    pub const DEFAULT_PORT: u16 = 6980;

    /// Default source sample rate for generated/captured audio
    pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

    /// Default channel count (stereo)
    pub const DEFAULT_CHANNELS: u16 = 2;

    /// VBAN header size in bytes
    pub const HEADER_SIZE: usize = 28;

    /// Largest VBAN datagram
    pub const MAX_PACKET_SIZE: usize = 1464;

    /// Largest VBAN payload
    pub const MAX_PAYLOAD_SIZE: usize = MAX_PACKET_SIZE - HEADER_SIZE;

    /// Protocol limit of samples per channel in one packet
    pub const MAX_SAMPLES_PER_PACKET: usize = 256;

    /// Channel count range a header can describe is 1 to this
    pub const MAX_CHANNELS: u16 = 256;

    /// Stream name width in bytes
    pub const STREAM_NAME_SIZE: usize = 16;

    /// Receive socket poll timeout in milliseconds
    pub const RECEIVE_POLL_MS: u64 = 100;

    /// Gaps shorter than this are filled with padding frames
    pub const MAX_PADDING_GAP_MS: u64 = 70;

    /// Captured frames held by a sender before the oldest is dropped
    pub const SENDER_QUEUE_CAPACITY: usize = 64;

    /// Decoded frames buffered between a receiver and its consumer
    pub const RECEIVER_CHANNEL_CAPACITY: usize = 256;
}
