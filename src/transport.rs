//! Process-wide transport context
//!
//! Owns the receiver device registry and the resolver. Create one per
//! process (or per test), hand clones to senders and receivers, and call
//! [`Transport::shutdown`] before exiting so no lookup thread outlives it.

use crate::error::NetworkError;
use crate::network::{DeviceRef, DeviceRegistry, Resolver};

#[derive(Clone)]
pub struct Transport {
    registry: DeviceRegistry,
    resolver: Resolver,
}

impl Transport {
    pub fn new() -> Self {
        let resolver = Resolver::new();
        Self {
            registry: DeviceRegistry::new(resolver.clone()),
            resolver,
        }
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    /// Shared receiver device for `port`
    pub fn device(&self, port: u16) -> Result<DeviceRef, NetworkError> {
        self.registry.find_or_create(port)
    }

    /// Wait for every outstanding host name lookup to finish
    pub fn shutdown(&self) {
        let pending = self.resolver.in_flight();
        if pending > 0 {
            tracing::info!("Waiting for {} host name lookup(s)", pending);
        }
        self.resolver.wait_all();
    }
}

impl Default for Transport {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_waits_for_lookups() {
        let transport = Transport::new();
        for _ in 0..4 {
            drop(transport.resolver().start("localhost", |_| {}));
        }
        transport.shutdown();
        assert_eq!(transport.resolver().in_flight(), 0);
    }

    #[test]
    fn test_clones_share_registry() {
        let transport = Transport::new();
        let other = transport.clone();

        let port = std::net::UdpSocket::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let a = transport.device(port).unwrap();
        let b = other.device(port).unwrap();
        assert!(a.ptr_eq(&b));
        assert_eq!(other.registry().device_count(), 1);
    }
}
