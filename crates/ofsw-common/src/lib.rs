//! OpenSwitch Common - shared types for the OpenFlow dataplane core
//!
//! This crate provides the pieces every other crate leans on:
//! - Error taxonomy and OpenFlow protocol error pairs
//! - OpenFlow 1.3/1.4 numeric constants
//! - Byte-order safe value wrappers
//! - Monotonic timestamps and lock-free counters

#![warn(missing_docs)]

pub mod error;
pub mod net;
pub mod openflow;

pub use error::*;
pub use net::*;

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Monotonic timestamp as (seconds, nanoseconds).
///
/// Flow/group/meter creation times and durations are computed from
/// monotonic deltas, never wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Timestamp {
    /// Whole seconds.
    pub sec: u64,
    /// Nanosecond remainder.
    pub nsec: u32,
}

impl Timestamp {
    /// Zero timestamp.
    pub const ZERO: Timestamp = Timestamp { sec: 0, nsec: 0 };

    /// Build from a monotonic instant relative to a fixed origin.
    pub fn from_origin(origin: Instant, now: Instant) -> Self {
        let d = now.duration_since(origin);
        Timestamp {
            sec: d.as_secs(),
            nsec: d.subsec_nanos(),
        }
    }

    /// Duration since `earlier`, with borrow from the seconds field.
    pub fn duration_since(&self, earlier: Timestamp) -> (u32, u32) {
        let mut sec = self.sec.saturating_sub(earlier.sec) as u32;
        let nsec;
        if self.nsec < earlier.nsec {
            sec = sec.saturating_sub(1);
            nsec = 1_000_000_000 + self.nsec - earlier.nsec;
        } else {
            nsec = self.nsec - earlier.nsec;
        }
        (sec, nsec)
    }
}

/// Lock-free cumulative counter.
#[derive(Debug, Default)]
pub struct AtomicCounter(AtomicU64);

impl AtomicCounter {
    /// Create a counter with an initial value.
    pub const fn new(value: u64) -> Self {
        Self(AtomicU64::new(value))
    }

    /// Increment and return the previous value.
    #[inline(always)]
    pub fn inc(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }

    /// Add a value and return the previous value.
    #[inline(always)]
    pub fn add(&self, val: u64) -> u64 {
        self.0.fetch_add(val, Ordering::Relaxed)
    }

    /// Read the current value.
    #[inline(always)]
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    /// Reset to zero.
    #[inline(always)]
    pub fn reset(&self) {
        self.0.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_duration_borrow() {
        let a = Timestamp { sec: 10, nsec: 900_000_000 };
        let b = Timestamp { sec: 12, nsec: 100_000_000 };
        let (sec, nsec) = b.duration_since(a);
        assert_eq!(sec, 1);
        assert_eq!(nsec, 200_000_000);
    }

    #[test]
    fn test_timestamp_duration_plain() {
        let a = Timestamp { sec: 5, nsec: 100 };
        let b = Timestamp { sec: 7, nsec: 300 };
        assert_eq!(b.duration_since(a), (2, 200));
    }

    #[test]
    fn test_atomic_counter() {
        let c = AtomicCounter::new(0);
        assert_eq!(c.inc(), 0);
        assert_eq!(c.add(10), 1);
        assert_eq!(c.get(), 11);
        c.reset();
        assert_eq!(c.get(), 0);
    }
}
