//! Asynchronous host name resolution
//!
//! Every lookup runs on its own short-lived `vban-resolve` thread so callers
//! never block on DNS. A lookup is represented by a [`ResolveHandle`], a
//! sentinel-counted share of the task; dropping the last handle cancels the
//! lookup if it has not started yet. The completion callback fires exactly
//! once in every case, after [`ResolveHandle::is_done`] turns true.
//!
//! [`Resolver::wait_all`] is the shutdown barrier: it returns once every
//! worker started through this resolver has exited.

use parking_lot::{Condvar, Mutex};
use std::net::{IpAddr, Ipv4Addr, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crate::error::ResolveError;
use crate::refcount::RefCounted;

/// Result delivered to the completion callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveOutcome {
    Resolved(Ipv4Addr),
    Failed(ResolveError),
}

type Callback = Box<dyn FnOnce(ResolveOutcome) + Send>;

/// Check a host name: dot separated labels of letters, digits and hyphens.
/// A label must start and end with a letter or digit.
pub fn is_valid_hostname(name: &str) -> bool {
    let mut in_label = false;
    let mut prev_alnum = false;

    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            in_label = true;
            prev_alnum = true;
        } else if c == '-' {
            if !in_label {
                return false;
            }
            prev_alnum = false;
        } else if c == '.' {
            if !prev_alnum {
                return false;
            }
            in_label = false;
            prev_alnum = false;
        } else {
            return false;
        }
    }

    prev_alnum
}

/// One lookup
struct ResolveTask {
    hostname: String,
    done: AtomicBool,
    cancelled: AtomicBool,
    address: Mutex<Option<Ipv4Addr>>,
    callback: Mutex<Option<Callback>>,
}

impl ResolveTask {
    fn new(hostname: &str, callback: Callback) -> Self {
        Self {
            hostname: hostname.to_string(),
            done: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            address: Mutex::new(None),
            callback: Mutex::new(Some(callback)),
        }
    }

    /// Worker body: look the name up unless cancelled, then complete
    fn run(&self) {
        let outcome = if self.cancelled.load(Ordering::Acquire) {
            ResolveOutcome::Failed(ResolveError::Cancelled(self.hostname.clone()))
        } else {
            lookup(&self.hostname)
        };
        self.complete(outcome);
    }

    fn complete(&self, outcome: ResolveOutcome) {
        if let ResolveOutcome::Resolved(addr) = outcome {
            *self.address.lock() = Some(addr);
        }
        self.done.store(true, Ordering::Release);

        if let Some(callback) = self.callback.lock().take() {
            callback(outcome);
        }
    }
}

#[derive(Default)]
struct InFlight {
    count: Mutex<usize>,
    idle: Condvar,
}

/// Decrements the in-flight counter when a worker exits, even on panic
struct InFlightGuard(Arc<InFlight>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut count = self.0.count.lock();
        *count -= 1;
        if *count == 0 {
            self.0.idle.notify_all();
        }
    }
}

/// Starts lookups and tracks the ones still running
#[derive(Clone, Default)]
pub struct Resolver {
    in_flight: Arc<InFlight>,
}

impl Resolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `hostname` to an IPv4 address in the background.
    ///
    /// An invalid name, or a worker that cannot be spawned, reports failure
    /// through `on_done` before returning `None`.
    pub fn start<F>(&self, hostname: &str, on_done: F) -> Option<ResolveHandle>
    where
        F: FnOnce(ResolveOutcome) + Send + 'static,
    {
        if !is_valid_hostname(hostname) {
            tracing::warn!("Invalid host name '{}'", hostname);
            on_done(ResolveOutcome::Failed(ResolveError::InvalidHostname(
                hostname.to_string(),
            )));
            return None;
        }

        let task = Arc::new(RefCounted::new(ResolveTask::new(hostname, Box::new(on_done))));

        *self.in_flight.count.lock() += 1;
        let guard = InFlightGuard(self.in_flight.clone());
        let worker_task = task.clone();

        let spawned = thread::Builder::new()
            .name("vban-resolve".to_string())
            .spawn(move || {
                let _guard = guard;
                worker_task.run();
            });

        if let Err(e) = spawned {
            // The closure, and with it the guard, was dropped by the failed spawn
            tracing::error!("Failed to create resolving thread for '{}': {}", hostname, e);
            task.complete(ResolveOutcome::Failed(ResolveError::SpawnFailed(
                hostname.to_string(),
            )));
            return None;
        }

        Some(ResolveHandle { task })
    }

    /// Block until no lookup is running
    pub fn wait_all(&self) {
        let mut count = self.in_flight.count.lock();
        while *count > 0 {
            self.in_flight.idle.wait(&mut count);
        }
    }

    /// Number of lookups whose worker has not exited yet
    pub fn in_flight(&self) -> usize {
        *self.in_flight.count.lock()
    }
}

fn lookup(hostname: &str) -> ResolveOutcome {
    let found = (hostname, 0).to_socket_addrs().ok().and_then(|mut addrs| {
        addrs.find_map(|addr| match addr.ip() {
            IpAddr::V4(ip) => Some(ip),
            IpAddr::V6(_) => None,
        })
    });

    match found {
        Some(ip) => {
            tracing::debug!("Resolved '{}' to {}", hostname, ip);
            ResolveOutcome::Resolved(ip)
        }
        None => {
            tracing::warn!("Failed to resolve '{}'", hostname);
            ResolveOutcome::Failed(ResolveError::NotFound(hostname.to_string()))
        }
    }
}

/// Counted share of a running or finished lookup
pub struct ResolveHandle {
    task: Arc<RefCounted<ResolveTask>>,
}

impl ResolveHandle {
    /// Take another share, `None` once the lookup has been torn down
    pub fn get_ref(&self) -> Option<ResolveHandle> {
        if self.task.try_acquire() {
            Some(ResolveHandle {
                task: self.task.clone(),
            })
        } else {
            None
        }
    }

    pub fn is_done(&self) -> bool {
        self.task.done.load(Ordering::Acquire)
    }

    /// Resolved address, once done and successful
    pub fn address(&self) -> Option<Ipv4Addr> {
        *self.task.address.lock()
    }

    pub fn hostname(&self) -> &str {
        &self.task.hostname
    }

    /// Skip the lookup if the worker has not begun it yet
    pub fn cancel(&self) {
        self.task.cancelled.store(true, Ordering::Release);
    }
}

impl Drop for ResolveHandle {
    fn drop(&mut self) {
        if self.task.release() {
            self.cancel();
        }
    }
}

impl std::fmt::Debug for ResolveHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolveHandle")
            .field("hostname", &self.task.hostname)
            .field("done", &self.is_done())
            .finish()
    }
}
