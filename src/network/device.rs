//! Shared receiver device
//!
//! One [`ReceiverDevice`] owns the socket bound to a UDP port and a
//! `vban-r-<port>` thread that validates every datagram and hands it to the
//! matching subscribers. Devices are shared through counted [`DeviceRef`]s;
//! the last one dropped unlinks the device from its registry and joins the
//! thread.

use parking_lot::Mutex;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::constants::{MAX_PACKET_SIZE, RECEIVE_POLL_MS};
use crate::error::{NetworkError, PacketError};
use crate::network::registry::RegistryInner;
use crate::network::resolver::{ResolveOutcome, Resolver};
use crate::network::subscriber::{
    AddressFilter, PacketHandler, PendingResolve, SubscriberId, SubscriberList,
};
use crate::network::udp::bind_receive_socket;
use crate::protocol::{StreamName, VbanHeader};
use crate::refcount::RefCounted;

/// Receive counters of a device
#[derive(Debug, Clone, Default)]
pub struct DeviceStats {
    pub datagrams_received: u64,
    pub datagrams_rejected: u64,
    pub deliveries: u64,
}

#[derive(Default)]
struct DeviceCounters {
    received: AtomicU64,
    rejected: AtomicU64,
    delivered: AtomicU64,
}

/// Socket and subscribers for one UDP port
pub struct ReceiverDevice {
    port: u16,
    socket: UdpSocket,
    local_addr: SocketAddr,
    subscribers: Mutex<SubscriberList>,
    thread: Mutex<Option<JoinHandle<()>>>,
    counters: DeviceCounters,
    registry: Weak<RegistryInner>,
    resolver: Resolver,
    next_context: AtomicU64,
}

pub(crate) type SharedDevice = Arc<RefCounted<ReceiverDevice>>;

impl ReceiverDevice {
    /// Bind the port and start the receive thread.
    ///
    /// The returned device is owned once, by the caller.
    pub(crate) fn spawn(
        port: u16,
        registry: Weak<RegistryInner>,
        resolver: Resolver,
    ) -> Result<SharedDevice, NetworkError> {
        let socket = bind_receive_socket(port)?;
        let local_addr = socket
            .local_addr()
            .map_err(|e| NetworkError::SocketCreate(e.to_string()))?;

        let device = Arc::new(RefCounted::new(ReceiverDevice {
            port,
            socket,
            local_addr,
            subscribers: Mutex::new(SubscriberList::default()),
            thread: Mutex::new(None),
            counters: DeviceCounters::default(),
            registry,
            resolver,
            next_context: AtomicU64::new(0),
        }));

        let worker = device.clone();
        let handle = thread::Builder::new()
            .name(format!("vban-r-{}", port))
            .spawn(move || receive_loop(worker))
            .map_err(|e| NetworkError::ThreadSpawn(e.to_string()))?;
        *device.thread.lock() = Some(handle);

        tracing::info!("Listening for VBAN on {}", local_addr);
        Ok(device)
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Address the socket is actually bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    pub fn stats(&self) -> DeviceStats {
        DeviceStats {
            datagrams_received: self.counters.received.load(Ordering::Relaxed),
            datagrams_rejected: self.counters.rejected.load(Ordering::Relaxed),
            deliveries: self.counters.delivered.load(Ordering::Relaxed),
        }
    }

    /// Add a subscriber that accepts every source and stream name
    pub fn add_subscriber(&self, handler: Arc<dyn PacketHandler>) -> SubscriberId {
        self.subscribers.lock().add(handler)
    }

    /// Returns `false` if `id` is not subscribed here
    pub fn remove_subscriber(&self, id: SubscriberId) -> bool {
        let Some(subscriber) = self.subscribers.lock().remove(id) else {
            return false;
        };
        if let Some(handle) = subscriber.pending.and_then(|p| p.handle) {
            handle.cancel();
        }
        true
    }

    /// Only deliver packets whose stream name equals `name`; empty accepts all
    pub fn set_name(&self, id: SubscriberId, name: &str) -> bool {
        match self.subscribers.lock().get_mut(id) {
            Some(subscriber) => {
                subscriber.name = StreamName::new(name);
                true
            }
            None => false,
        }
    }

    fn set_filter(&self, id: SubscriberId, filter: AddressFilter) -> bool {
        match self.subscribers.lock().get_mut(id) {
            Some(subscriber) => {
                subscriber.filter = Some(filter);
                subscriber.pending = None;
                true
            }
            None => false,
        }
    }

    fn complete_resolution(&self, id: SubscriberId, context: u64, outcome: ResolveOutcome) {
        let mut subscribers = self.subscribers.lock();
        let Some(subscriber) = subscribers.get_mut(id) else {
            return;
        };
        if !matches!(&subscriber.pending, Some(p) if p.context == context) {
            return;
        }

        match outcome {
            ResolveOutcome::Resolved(addr) => {
                tracing::debug!("Port {}: accepting packets from {}", self.port, addr);
                subscriber.filter = Some(AddressFilter::exact(addr));
            }
            ResolveOutcome::Failed(e) => {
                tracing::warn!("Port {}: {}", self.port, e);
                subscriber.filter = None;
            }
        }
        subscriber.pending = None;
    }

    fn dispatch(&self, datagram: &[u8], source: SocketAddrV4) {
        self.counters.received.fetch_add(1, Ordering::Relaxed);

        let header = match VbanHeader::decode(datagram) {
            Ok(header) => header,
            Err(e) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                match e {
                    PacketError::UnsupportedCodec(_) => {
                        tracing::warn!("Port {}: {} from {}", self.port, e, source)
                    }
                    _ => tracing::trace!("Port {}: dropped datagram from {}: {}", self.port, source, e),
                }
                return;
            }
        };

        let delivered = self.subscribers.lock().dispatch(&header, datagram, source);
        self.counters
            .delivered
            .fetch_add(delivered as u64, Ordering::Relaxed);
    }
}

fn receive_loop(device: SharedDevice) {
    let mut buf = [0u8; MAX_PACKET_SIZE];

    while device.is_alive() {
        match device.socket.recv_from(&mut buf) {
            Ok((len, SocketAddr::V4(source))) => device.dispatch(&buf[..len], source),
            Ok((_, SocketAddr::V6(_))) => {}
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {}
            Err(e) => {
                tracing::debug!("Port {}: receive failed: {}", device.port, e);
                thread::sleep(Duration::from_millis(RECEIVE_POLL_MS));
            }
        }
    }

    tracing::debug!("Receive thread for port {} exiting", device.port);
}

fn teardown(device: &SharedDevice) {
    if let Some(registry) = device.registry.upgrade() {
        registry.unlink(device);
    }

    let remaining = device.subscriber_count();
    if remaining > 0 {
        tracing::error!(
            "Port {} closed with {} subscriber(s) still attached",
            device.port,
            remaining
        );
    }

    if let Some(handle) = device.thread.lock().take() {
        if handle.thread().id() != thread::current().id() {
            let _ = handle.join();
        }
    }

    tracing::info!("Closed VBAN receiver on port {}", device.port);
}

/// Counted reference to a receiver device
pub struct DeviceRef {
    device: SharedDevice,
}

impl DeviceRef {
    /// Wrap a share the caller has already acquired
    pub(crate) fn from_acquired(device: SharedDevice) -> Self {
        Self { device }
    }

    /// Take another reference, `None` once the device is being torn down
    pub fn get_ref(&self) -> Option<DeviceRef> {
        if self.device.try_acquire() {
            Some(DeviceRef::from_acquired(self.device.clone()))
        } else {
            None
        }
    }

    pub fn ptr_eq(&self, other: &DeviceRef) -> bool {
        Arc::ptr_eq(&self.device, &other.device)
    }

    /// Add a subscriber with its stream name and host filter in place.
    ///
    /// The subscriber receives nothing until the host filter is set, see
    /// [`DeviceRef::set_host`].
    pub fn add_filtered_subscriber(
        &self,
        handler: Arc<dyn PacketHandler>,
        name: &str,
        host: &str,
    ) -> SubscriberId {
        let id = self
            .subscribers
            .lock()
            .add_with(handler, StreamName::new(name), None);
        self.set_host(id, host);
        id
    }

    /// Filter a subscriber by source host.
    ///
    /// An empty host accepts every source and a literal IPv4 address applies
    /// at once. Any other name is resolved in the background; until the
    /// lookup succeeds the subscriber receives nothing. A later call
    /// supersedes a lookup still in flight.
    pub fn set_host(&self, id: SubscriberId, host: &str) -> bool {
        let host = host.trim();
        if host.is_empty() {
            return self.set_filter(id, AddressFilter::ANY);
        }
        if let Ok(addr) = host.parse::<Ipv4Addr>() {
            return self.set_filter(id, AddressFilter::exact(addr));
        }

        let context = self.next_context.fetch_add(1, Ordering::Relaxed);
        match self.subscribers.lock().get_mut(id) {
            Some(subscriber) => {
                subscriber.filter = None;
                subscriber.pending = Some(PendingResolve {
                    context,
                    handle: None,
                });
            }
            None => return false,
        }

        let Some(held) = self.get_ref() else {
            return false;
        };
        let handle = self.resolver.start(host, move |outcome| {
            held.complete_resolution(id, context, outcome);
        });

        if let Some(handle) = handle {
            if let Some(subscriber) = self.subscribers.lock().get_mut(id) {
                if let Some(pending) = subscriber.pending.as_mut() {
                    if pending.context == context {
                        pending.handle = Some(handle);
                    }
                }
            }
        }
        true
    }
}

impl Deref for DeviceRef {
    type Target = ReceiverDevice;

    fn deref(&self) -> &ReceiverDevice {
        self.device.get()
    }
}

impl Drop for DeviceRef {
    fn drop(&mut self) {
        if self.device.release() {
            teardown(&self.device);
        }
    }
}

impl std::fmt::Debug for DeviceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceRef")
            .field("port", &self.device.port)
            .field("owners", &self.device.owners())
            .finish()
    }
}
