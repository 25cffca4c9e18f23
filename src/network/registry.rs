//! Registry of receiver devices, one per UDP port

use parking_lot::Mutex;
use std::sync::Arc;

use crate::error::NetworkError;
use crate::network::device::{DeviceRef, ReceiverDevice, SharedDevice};
use crate::network::resolver::Resolver;

pub(crate) struct RegistryInner {
    devices: Mutex<Vec<SharedDevice>>,
    resolver: Resolver,
}

impl RegistryInner {
    /// Forget a device that reached its sentinel
    pub(crate) fn unlink(&self, device: &SharedDevice) {
        self.devices.lock().retain(|d| !Arc::ptr_eq(d, device));
    }
}

/// Hands out shared receiver devices keyed by port
#[derive(Clone)]
pub struct DeviceRegistry {
    inner: Arc<RegistryInner>,
}

impl DeviceRegistry {
    pub fn new(resolver: Resolver) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                devices: Mutex::new(Vec::new()),
                resolver,
            }),
        }
    }

    /// Get the live device for `port`, binding a new one if there is none.
    ///
    /// A device already on its way down is never revived; a fresh one takes
    /// its place.
    pub fn find_or_create(&self, port: u16) -> Result<DeviceRef, NetworkError> {
        let mut devices = self.inner.devices.lock();

        if let Some(device) = devices
            .iter()
            .find(|d| d.port() == port && d.try_acquire())
        {
            return Ok(DeviceRef::from_acquired(device.clone()));
        }

        let device = ReceiverDevice::spawn(
            port,
            Arc::downgrade(&self.inner),
            self.inner.resolver.clone(),
        )?;
        devices.push(device.clone());
        Ok(DeviceRef::from_acquired(device))
    }

    /// Number of linked devices
    pub fn device_count(&self) -> usize {
        self.inner.devices.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{BitResolution, StreamName, VbanHeader};
    use bytes::BytesMut;
    use crossbeam_channel::unbounded;
    use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    fn free_port() -> u16 {
        UdpSocket::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    fn datagram(name: &str) -> Vec<u8> {
        let mut header = VbanHeader::audio(3, BitResolution::Int16, 1, StreamName::new(name));
        header.samples = 1;
        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        buf.extend_from_slice(&[0, 0]);
        buf.to_vec()
    }

    #[test]
    fn test_concurrent_find_or_create_shares_device() {
        let registry = DeviceRegistry::new(Resolver::new());
        let port = free_port();
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    registry.find_or_create(port).unwrap()
                })
            })
            .collect();
        let refs: Vec<DeviceRef> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(registry.device_count(), 1);
        assert!(refs.iter().all(|r| r.ptr_eq(&refs[0])));

        drop(refs);
        assert_eq!(registry.device_count(), 0);

        let again = registry.find_or_create(port).unwrap();
        assert_eq!(again.port(), port);
        assert_eq!(registry.device_count(), 1);
    }

    #[test]
    fn test_ports_get_separate_devices() {
        let registry = DeviceRegistry::new(Resolver::new());
        let a = registry.find_or_create(free_port()).unwrap();
        let b = registry.find_or_create(free_port()).unwrap();
        assert!(!a.ptr_eq(&b));
        assert_eq!(registry.device_count(), 2);
    }

    #[test]
    fn test_filters_apply_to_later_packets() {
        let registry = DeviceRegistry::new(Resolver::new());
        let port = free_port();
        let device = registry.find_or_create(port).unwrap();

        let (tx, rx) = unbounded();
        let id = device.add_subscriber(Arc::new(move |data: &[u8], _: SocketAddrV4| {
            let _ = tx.send(data.to_vec());
        }));
        device.set_name(id, "studio");

        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let dest = SocketAddrV4::new(Ipv4Addr::LOCALHOST, port);
        let wait = Duration::from_secs(2);

        socket.send_to(&datagram("stage"), dest).unwrap();
        socket.send_to(&datagram("studio"), dest).unwrap();
        let got = rx.recv_timeout(wait).unwrap();
        assert_eq!(&got[8..14], b"studio");

        // Exact filter on another host: nothing from loopback gets through
        assert!(device.set_host(id, "10.1.2.3"));
        socket.send_to(&datagram("studio"), dest).unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());

        assert!(device.set_host(id, "127.0.0.1"));
        socket.send_to(&datagram("studio"), dest).unwrap();
        assert!(rx.recv_timeout(wait).is_ok());

        assert!(device.remove_subscriber(id));
        assert!(device.stats().datagrams_received >= 4);
    }

    #[test]
    fn test_hostname_filter_resolves() {
        let resolver = Resolver::new();
        let registry = DeviceRegistry::new(resolver.clone());
        let port = free_port();
        let device = registry.find_or_create(port).unwrap();

        let (tx, rx) = unbounded();
        let id = device.add_subscriber(Arc::new(move |_: &[u8], source: SocketAddrV4| {
            let _ = tx.send(source);
        }));

        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let dest = SocketAddrV4::new(Ipv4Addr::LOCALHOST, port);

        // A name that cannot be resolved blocks every source
        assert!(device.set_host(id, "invalid-"));
        socket.send_to(&datagram(""), dest).unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());

        assert!(device.set_host(id, "localhost"));
        resolver.wait_all();
        socket.send_to(&datagram(""), dest).unwrap();
        let source = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(*source.ip(), Ipv4Addr::LOCALHOST);

        assert!(device.remove_subscriber(id));
    }

    #[test]
    fn test_filtered_subscriber_starts_filtered() {
        let registry = DeviceRegistry::new(Resolver::new());
        let port = free_port();
        let device = registry.find_or_create(port).unwrap();

        let (tx, rx) = unbounded();
        let id = device.add_filtered_subscriber(
            Arc::new(move |data: &[u8], _: SocketAddrV4| {
                let _ = tx.send(data.to_vec());
            }),
            "studio",
            "10.1.2.3",
        );

        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let dest = SocketAddrV4::new(Ipv4Addr::LOCALHOST, port);
        socket.send_to(&datagram("studio"), dest).unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());

        assert!(device.set_host(id, ""));
        socket.send_to(&datagram("stage"), dest).unwrap();
        socket.send_to(&datagram("studio"), dest).unwrap();
        let got = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(&got[8..14], b"studio");

        assert!(device.remove_subscriber(id));
    }

    #[test]
    fn test_superseded_lookup_leaves_filter() {
        let resolver = Resolver::new();
        let registry = DeviceRegistry::new(resolver.clone());
        let port = free_port();
        let device = registry.find_or_create(port).unwrap();

        let (tx, rx) = unbounded();
        let id = device.add_subscriber(Arc::new(move |_: &[u8], source: SocketAddrV4| {
            let _ = tx.send(source);
        }));

        // Each lookup of "localhost" is replaced by an exact filter on
        // another host before or while it runs
        for _ in 0..20 {
            assert!(device.set_host(id, "localhost"));
            assert!(device.set_host(id, "10.9.9.9"));
        }
        resolver.wait_all();

        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let dest = SocketAddrV4::new(Ipv4Addr::LOCALHOST, port);
        socket.send_to(&datagram(""), dest).unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());

        // A later lookup that is not superseded does apply
        assert!(device.set_host(id, "10.9.9.9"));
        assert!(device.set_host(id, "localhost"));
        resolver.wait_all();
        socket.send_to(&datagram(""), dest).unwrap();
        assert!(rx.recv_timeout(Duration::from_secs(2)).is_ok());

        assert!(device.remove_subscriber(id));
    }

    #[test]
    fn test_non_vban_traffic_is_rejected() {
        let registry = DeviceRegistry::new(Resolver::new());
        let port = free_port();
        let device = registry.find_or_create(port).unwrap();

        let (tx, rx) = unbounded();
        let id = device.add_subscriber(Arc::new(move |_: &[u8], _: SocketAddrV4| {
            let _ = tx.send(());
        }));

        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let dest = SocketAddrV4::new(Ipv4Addr::LOCALHOST, port);
        socket.send_to(b"not a vban packet at all, really", dest).unwrap();
        let mut bad_codec = datagram("");
        bad_codec[7] |= 0x20;
        socket.send_to(&bad_codec, dest).unwrap();
        socket.send_to(&datagram(""), dest).unwrap();

        rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(rx.try_recv().is_err());
        assert_eq!(device.stats().datagrams_rejected, 2);

        device.remove_subscriber(id);
    }
}
