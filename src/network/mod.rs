//! Network subsystem for VBAN over UDP

pub mod device;
pub mod registry;
pub mod resolver;
pub mod subscriber;
pub mod udp;

#[cfg(feature = "receiver")]
pub mod receiver;
#[cfg(feature = "sender")]
pub mod sender;

pub use device::{DeviceRef, DeviceStats, ReceiverDevice};
pub use registry::DeviceRegistry;
pub use resolver::{is_valid_hostname, ResolveHandle, ResolveOutcome, Resolver};
pub use subscriber::{
    AddressFilter, ChannelForwarder, PacketHandler, ReceivedPacket, SubscriberId,
};

#[cfg(feature = "receiver")]
pub use receiver::{ReceiverStats, VbanReceiver};
#[cfg(feature = "sender")]
pub use sender::{SenderInput, SenderStats, SourceFormat, VbanSender};
