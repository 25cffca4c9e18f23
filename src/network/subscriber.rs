//! Packet subscribers and their filters

use bytes::Bytes;
use crossbeam_channel::{Sender, TrySendError};
use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::network::resolver::ResolveHandle;
use crate::protocol::{StreamName, VbanHeader};

/// Receives datagrams that passed a subscriber's filters.
///
/// Called on the device's receive thread while the subscriber list is
/// locked: implementations must return quickly and must not add, remove or
/// reconfigure subscribers of the same device.
pub trait PacketHandler: Send + Sync {
    fn on_packet(&self, datagram: &[u8], source: SocketAddrV4);
}

impl<F> PacketHandler for F
where
    F: Fn(&[u8], SocketAddrV4) + Send + Sync,
{
    fn on_packet(&self, datagram: &[u8], source: SocketAddrV4) {
        self(datagram, source)
    }
}

/// Datagram copied out of the receive thread
#[derive(Debug, Clone)]
pub struct ReceivedPacket {
    pub data: Bytes,
    pub source: SocketAddrV4,
}

/// Forwards datagrams into a bounded channel, dropping them when it is full
pub struct ChannelForwarder {
    tx: Sender<ReceivedPacket>,
    dropped: AtomicU64,
}

impl ChannelForwarder {
    pub fn new(tx: Sender<ReceivedPacket>) -> Self {
        Self {
            tx,
            dropped: AtomicU64::new(0),
        }
    }

    /// Datagrams lost to a full or closed channel
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl PacketHandler for ChannelForwarder {
    fn on_packet(&self, datagram: &[u8], source: SocketAddrV4) {
        let packet = ReceivedPacket {
            data: Bytes::copy_from_slice(datagram),
            source,
        };
        match self.tx.try_send(packet) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Opaque token naming one subscription on one device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

/// Source address filter, matched as `(src & mask) == (addr & mask)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressFilter {
    pub addr: Ipv4Addr,
    pub mask: Ipv4Addr,
}

impl AddressFilter {
    /// Accept every source
    pub const ANY: AddressFilter = AddressFilter {
        addr: Ipv4Addr::UNSPECIFIED,
        mask: Ipv4Addr::UNSPECIFIED,
    };

    /// Accept exactly one source address
    pub fn exact(addr: Ipv4Addr) -> Self {
        Self {
            addr,
            mask: Ipv4Addr::BROADCAST,
        }
    }

    pub fn matches(&self, source: Ipv4Addr) -> bool {
        let mask = u32::from(self.mask);
        u32::from(source) & mask == u32::from(self.addr) & mask
    }
}

/// Marks a subscriber whose host filter is still being resolved
pub(crate) struct PendingResolve {
    pub context: u64,
    pub handle: Option<ResolveHandle>,
}

pub(crate) struct Subscriber {
    pub id: SubscriberId,
    pub handler: Arc<dyn PacketHandler>,
    /// `None` matches nothing: the host is resolving or failed to resolve
    pub filter: Option<AddressFilter>,
    pub name: StreamName,
    pub pending: Option<PendingResolve>,
}

impl Subscriber {
    pub fn accepts(&self, header: &VbanHeader, source: Ipv4Addr) -> bool {
        let Some(filter) = self.filter else {
            return false;
        };
        filter.matches(source) && (self.name.is_empty() || self.name == header.stream_name)
    }
}

/// Subscribers of one receiver device
#[derive(Default)]
pub(crate) struct SubscriberList {
    entries: Vec<Subscriber>,
    next_id: u64,
}

impl SubscriberList {
    /// Add a subscriber accepting every source and stream name
    pub fn add(&mut self, handler: Arc<dyn PacketHandler>) -> SubscriberId {
        self.add_with(handler, StreamName::default(), Some(AddressFilter::ANY))
    }

    pub fn add_with(
        &mut self,
        handler: Arc<dyn PacketHandler>,
        name: StreamName,
        filter: Option<AddressFilter>,
    ) -> SubscriberId {
        let id = SubscriberId(self.next_id);
        self.next_id += 1;
        self.entries.push(Subscriber {
            id,
            handler,
            filter,
            name,
            pending: None,
        });
        id
    }

    pub fn remove(&mut self, id: SubscriberId) -> Option<Subscriber> {
        let index = self.entries.iter().position(|s| s.id == id)?;
        Some(self.entries.remove(index))
    }

    pub fn get_mut(&mut self, id: SubscriberId) -> Option<&mut Subscriber> {
        self.entries.iter_mut().find(|s| s.id == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Hand a datagram to every matching subscriber, returning how many
    /// received it
    pub fn dispatch(&self, header: &VbanHeader, datagram: &[u8], source: SocketAddrV4) -> usize {
        let mut delivered = 0;
        for subscriber in &self.entries {
            if subscriber.accepts(header, *source.ip()) {
                subscriber.handler.on_packet(datagram, source);
                delivered += 1;
            }
        }
        delivered
    }
}

impl fmt::Debug for SubscriberList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberList")
            .field("len", &self.entries.len())
            .finish()
    }
}
