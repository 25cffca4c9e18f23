//! Audio frames and the clock used to timestamp them

use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Audio frame containing interleaved samples
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    /// Interleaved audio samples (f32)
    pub samples: Vec<f32>,
    /// Number of channels
    pub channels: u16,
    /// Timestamp of the first sample in nanoseconds
    pub timestamp: u64,
    /// Frame sequence number
    pub sequence: u32,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, channels: u16, timestamp: u64, sequence: u32) -> Self {
        Self {
            samples,
            channels,
            timestamp,
            sequence,
        }
    }

    /// Frame of silence with `frames` samples per channel
    pub fn silence(channels: u16, frames: usize, timestamp: u64, sequence: u32) -> Self {
        Self::new(vec![0.0; frames * channels as usize], channels, timestamp, sequence)
    }

    /// Get number of samples per channel
    pub fn samples_per_channel(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    /// Get frame duration in nanoseconds
    pub fn duration_ns(&self, sample_rate: u32) -> u64 {
        frames_to_ns(self.samples_per_channel() as u64, sample_rate)
    }
}

/// Duration of `frames` samples per channel at `sample_rate`, in nanoseconds
pub fn frames_to_ns(frames: u64, sample_rate: u32) -> u64 {
    frames * 1_000_000_000 / sample_rate as u64
}

/// Monotonic nanosecond clock anchored at wall-clock time.
///
/// Readings never go backwards and are large enough that subtracting a few
/// packet durations cannot underflow.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
    base_ns: u64,
}

impl MonotonicClock {
    pub fn new() -> Self {
        let base_ns = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        Self {
            origin: Instant::now(),
            base_ns,
        }
    }

    pub fn now_ns(&self) -> u64 {
        self.base_ns + self.origin.elapsed().as_nanos() as u64
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_geometry() {
        let frame = AudioFrame::new(vec![0.0; 960], 2, 0, 0);
        assert_eq!(frame.samples_per_channel(), 480);
        assert_eq!(frame.duration_ns(48000), 10_000_000);

        let silence = AudioFrame::silence(2, 256, 5, 1);
        assert_eq!(silence.samples.len(), 512);
        assert!(silence.samples.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_clock_is_monotonic() {
        let clock = MonotonicClock::new();
        let a = clock.now_ns();
        let b = clock.now_ns();
        assert!(b >= a);
        assert!(a > 1_000_000_000);
    }
}
