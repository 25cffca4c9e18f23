//! Error types for the VBAN transport

use thiserror::Error;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Packet error: {0}")]
    Packet(#[from] PacketError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Resolve error: {0}")]
    Resolve(#[from] ResolveError),

    #[error("VBAN cannot handle sampling frequency {0} Hz")]
    UnsupportedSampleRate(u32),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Local audio device errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Unsupported channel count: {0}")]
    UnsupportedChannels(u16),
}

/// Reasons a datagram is rejected as a VBAN audio packet
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PacketError {
    #[error("Datagram too short: {0} bytes")]
    TooShort(usize),

    #[error("Bad magic")]
    BadMagic,

    #[error("Sample rate index out of range: {0}")]
    SampleRateIndex(u8),

    #[error("Unsupported sub-protocol: 0x{0:02x}")]
    UnsupportedProtocol(u8),

    #[error("Unsupported VBAN codec: 0x{0:02x}")]
    UnsupportedCodec(u8),

    #[error("Unsupported bit resolution: {0}")]
    UnsupportedResolution(u8),

    #[error("Too small payload size {actual}, expected {expected}")]
    PayloadTooSmall { expected: usize, actual: usize },
}

/// PCM conversion errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Unsupported channel count: {0}")]
    UnsupportedChannels(u16),

    #[error("Sample count {len} is not a multiple of {channels} channels")]
    ChannelMismatch { len: usize, channels: usize },

    #[error("Payload holds {actual} bytes, expected {expected}")]
    PayloadLength { expected: usize, actual: usize },
}

/// Socket errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Failed to create socket: {0}")]
    SocketCreate(String),

    #[error("Failed to bind port {port}: {reason}")]
    BindFailed { port: u16, reason: String },

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Packet too large: {0} bytes")]
    PacketTooLarge(usize),

    #[error("Failed to start thread: {0}")]
    ThreadSpawn(String),
}

/// Host name resolution errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("Invalid host name '{0}'")]
    InvalidHostname(String),

    #[error("Failed to create resolving thread for '{0}'")]
    SpawnFailed(String),

    #[error("No IPv4 address for '{0}'")]
    NotFound(String),

    #[error("Resolution of '{0}' was cancelled")]
    Cancelled(String),
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;
