//! Frame counter gap detection
//!
//! VBAN packets carry a monotonically increasing 32-bit frame counter. A
//! discontinuity means packets were lost; short gaps are bridged with padding
//! frames so downstream timing stays continuous, long gaps are only reported.

use std::time::Duration;

/// Packets a counter may lag behind before the stream counts as restarted
const REORDER_WINDOW: u32 = 32;

/// Result of observing one frame counter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gap {
    /// First packet of the stream, or of a restarted counter
    First,
    /// Counter followed the previous one
    Contiguous,
    /// `missing` packets were lost and should be padded
    Pad { missing: u32 },
    /// `missing` packets were lost, too long to pad
    Skip { missing: u32 },
    /// Duplicate or reordered packet, shortly behind the last one
    Stale,
}

/// Tracks the last frame counter seen on a stream
#[derive(Debug, Clone)]
pub struct GapTracker {
    last: Option<u32>,
    max_padding_ns: u64,
    missed_events: u64,
    packets_lost: u64,
}

impl GapTracker {
    /// Gaps whose audio is shorter than `max_padding` are padded
    pub fn new(max_padding: Duration) -> Self {
        Self {
            last: None,
            max_padding_ns: max_padding.as_nanos() as u64,
            missed_events: 0,
            packets_lost: 0,
        }
    }

    /// Observe the counter of a received packet carrying `packet_ns` of audio
    pub fn observe(&mut self, counter: u32, packet_ns: u64) -> Gap {
        let Some(last) = self.last else {
            self.last = Some(counter);
            return Gap::First;
        };

        let missing = counter.wrapping_sub(last).wrapping_sub(1);
        if missing == 0 {
            self.last = Some(counter);
            return Gap::Contiguous;
        }
        if missing >= u32::MAX / 2 {
            let behind = last.wrapping_sub(counter);
            if behind > REORDER_WINDOW {
                // The sender restarted its counter
                self.last = Some(counter);
                return Gap::First;
            }
            return Gap::Stale;
        }

        self.last = Some(counter);
        self.missed_events += 1;
        self.packets_lost += missing as u64;

        if (missing as u64).saturating_mul(packet_ns) < self.max_padding_ns {
            Gap::Pad { missing }
        } else {
            Gap::Skip { missing }
        }
    }

    /// Number of discontinuities seen
    pub fn missed_events(&self) -> u64 {
        self.missed_events
    }

    /// Number of packets lost across all discontinuities
    pub fn packets_lost(&self) -> u64 {
        self.packets_lost
    }

    /// Start over, e.g. after the stream source changed
    pub fn reset(&mut self) {
        self.last = None;
    }
}

/// Timestamps of `missing` padding frames placed right before a packet
/// stamped `timestamp`, one packet duration apart
pub fn padding_timestamps(
    timestamp: u64,
    missing: u32,
    packet_ns: u64,
) -> impl Iterator<Item = u64> {
    (0..missing as u64).map(move |i| timestamp.saturating_sub(packet_ns * (missing as u64 - i)))
}
