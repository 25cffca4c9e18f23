//! Sentinel reference counting
//!
//! Shared objects that must be torn down exactly once (receiver devices,
//! resolution tasks) carry a signed owner counter:
//!
//! - the counter starts at `0`, meaning one owner (the creator);
//! - any value `> -1` means the object is alive and may be acquired;
//! - the release that drives the counter to `-1` owns teardown.
//!
//! Acquisition is a compare-and-swap loop, so a reference can never be taken
//! on an object that has already passed `-1`. Memory itself is still managed
//! by `Arc`; the counter only decides *logical* lifetime.

use std::ops::Deref;
use std::sync::atomic::{AtomicIsize, Ordering};

/// Value wrapped with a sentinel owner counter
#[derive(Debug)]
pub struct RefCounted<T> {
    owners: AtomicIsize,
    value: T,
}

impl<T> RefCounted<T> {
    /// Wrap `value`, owned once by the caller
    pub fn new(value: T) -> Self {
        Self {
            owners: AtomicIsize::new(0),
            value,
        }
    }

    /// Take one more ownership share.
    ///
    /// Returns `false` once the sentinel has been reached; the object is then
    /// being torn down and must not be used as a live instance.
    pub fn try_acquire(&self) -> bool {
        let mut owners = self.owners.load(Ordering::Acquire);
        while owners > -1 {
            match self.owners.compare_exchange_weak(
                owners,
                owners + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(current) => owners = current,
            }
        }
        false
    }

    /// Give back one ownership share.
    ///
    /// Returns `true` for exactly one caller: the one that reached the
    /// sentinel and therefore has to tear the object down.
    pub fn release(&self) -> bool {
        let previous = self.owners.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > -1, "released past the sentinel");
        previous == 0
    }

    /// Whether the object is still acquirable
    pub fn is_alive(&self) -> bool {
        self.owners.load(Ordering::Acquire) > -1
    }

    /// Number of extra owners beyond the first (`-1` once torn down)
    pub fn owners(&self) -> isize {
        self.owners.load(Ordering::Acquire)
    }

    pub fn get(&self) -> &T {
        &self.value
    }
}

impl<T> Deref for RefCounted<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_single_owner_release() {
        let rc = RefCounted::new(5u32);
        assert!(rc.is_alive());
        assert_eq!(*rc, 5);
        assert!(rc.release());
        assert!(!rc.is_alive());
    }

    #[test]
    fn test_acquire_after_sentinel_fails() {
        let rc = RefCounted::new(());
        assert!(rc.try_acquire());
        assert!(!rc.release());
        assert!(rc.release());
        assert!(!rc.try_acquire());
        assert_eq!(rc.owners(), -1);
    }

    #[test]
    fn test_teardown_exactly_once_under_contention() {
        let rc = Arc::new(RefCounted::new(()));
        let teardowns = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            assert!(rc.try_acquire());
            let rc = rc.clone();
            let teardowns = teardowns.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..1000 {
                    if rc.try_acquire() && rc.release() {
                        teardowns.fetch_add(1, Ordering::SeqCst);
                    }
                }
                if rc.release() {
                    teardowns.fetch_add(1, Ordering::SeqCst);
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(teardowns.load(Ordering::SeqCst), 0);
        assert!(rc.release());
        assert!(!rc.try_acquire());
    }
}
