//! VBAN stream receiver
//!
//! Subscribes to the shared device of a port and turns matching packets back
//! into audio frames. Lost packets are detected from the frame counter; short
//! gaps are filled with silent frames so the consumer keeps a continuous
//! timeline.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use std::net::SocketAddrV4;
use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::audio::sequence::padding_timestamps;
use crate::audio::{AudioFrame, Gap, GapTracker, MonotonicClock};
use crate::codec::PcmDecoder;
use crate::config::ReceiverConfig;
use crate::constants::MAX_PADDING_GAP_MS;
use crate::error::NetworkError;
use crate::network::device::DeviceRef;
use crate::network::subscriber::{PacketHandler, SubscriberId};
use crate::protocol::Packet;
use crate::transport::Transport;

/// A decoded frame as delivered to the consumer
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    pub frame: AudioFrame,
    pub sample_rate: u32,
    /// Silence standing in for a lost packet
    pub padding: bool,
}

/// Receiver statistics
#[derive(Debug, Clone, Default)]
pub struct ReceiverStats {
    pub packets_received: u64,
    /// Sample frames received, all channels counted once
    pub frames_received: u64,
    pub packets_rejected: u64,
    /// Times one or more packets went missing
    pub missed_events: u64,
    pub packets_lost: u64,
    pub padding_frames: u64,
    /// Frames lost to a full consumer channel
    pub frames_dropped: u64,
}

#[derive(Default)]
struct Counters {
    packets_received: AtomicU64,
    frames_received: AtomicU64,
    packets_rejected: AtomicU64,
    padding_frames: AtomicU64,
    frames_dropped: AtomicU64,
}

struct SinkState {
    decoder: PcmDecoder,
    gaps: GapTracker,
}

/// Packet handler registered with the device
struct StreamSink {
    port: AtomicU16,
    state: Mutex<SinkState>,
    clock: MonotonicClock,
    tx: Sender<DecodedFrame>,
    counters: Counters,
}

impl StreamSink {
    fn emit(&self, frame: DecodedFrame) {
        match self.tx.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.counters.frames_dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn port(&self) -> u16 {
        self.port.load(Ordering::Relaxed)
    }

    /// Start over on a new port
    fn rebind(&self, port: u16) {
        self.port.store(port, Ordering::Relaxed);
        self.state.lock().gaps.reset();
    }
}

impl PacketHandler for StreamSink {
    fn on_packet(&self, datagram: &[u8], source: SocketAddrV4) {
        let packet = match Packet::parse(datagram) {
            Ok(packet) => packet,
            Err(e) => {
                self.counters.packets_rejected.fetch_add(1, Ordering::Relaxed);
                tracing::error!("Port {}: {} from {}", self.port(), e, source);
                return;
            }
        };
        let header = packet.header;

        let mut state = self.state.lock();
        let samples = match state.decoder.decode(&packet) {
            Ok(samples) => samples,
            Err(e) => {
                self.counters.packets_rejected.fetch_add(1, Ordering::Relaxed);
                tracing::error!("Port {}: {}", self.port(), e);
                return;
            }
        };

        let duration = header.duration_ns();
        let timestamp = self.clock.now_ns().saturating_sub(duration);
        let sample_rate = header.sample_rate();

        match state.gaps.observe(header.frame_counter, duration) {
            Gap::First | Gap::Contiguous => {}
            Gap::Pad { missing } => {
                tracing::error!(
                    "Stream '{}': missing {} packet(s) at frame {}",
                    header.stream_name,
                    missing,
                    header.frame_counter
                );
                for (i, ts) in padding_timestamps(timestamp, missing, duration).enumerate() {
                    tracing::debug!("Padding packet ts={}", ts);
                    let sequence = header
                        .frame_counter
                        .wrapping_sub(missing)
                        .wrapping_add(i as u32);
                    self.emit(DecodedFrame {
                        frame: AudioFrame::silence(
                            header.channels,
                            header.samples as usize,
                            ts,
                            sequence,
                        ),
                        sample_rate,
                        padding: true,
                    });
                    self.counters.padding_frames.fetch_add(1, Ordering::Relaxed);
                }
            }
            Gap::Skip { missing } => {
                tracing::error!(
                    "Stream '{}': missing {} packet(s) at frame {}, too long to pad",
                    header.stream_name,
                    missing,
                    header.frame_counter
                );
            }
            Gap::Stale => {
                tracing::warn!(
                    "Stream '{}': out of order frame {}",
                    header.stream_name,
                    header.frame_counter
                );
            }
        }
        drop(state);

        self.counters.packets_received.fetch_add(1, Ordering::Relaxed);
        self.counters
            .frames_received
            .fetch_add(header.samples as u64, Ordering::Relaxed);

        self.emit(DecodedFrame {
            frame: AudioFrame::new(samples, header.channels, timestamp, header.frame_counter),
            sample_rate,
            padding: false,
        });
    }
}

/// Receives one VBAN stream
pub struct VbanReceiver {
    transport: Transport,
    config: ReceiverConfig,
    subscription: Option<(DeviceRef, SubscriberId)>,
    sink: Arc<StreamSink>,
    frames: Receiver<DecodedFrame>,
}

impl VbanReceiver {
    /// Subscribe to `config.port` with the configured filters
    pub fn new(transport: Transport, config: ReceiverConfig) -> Result<Self, NetworkError> {
        let (tx, frames) = bounded(config.channel_capacity.max(1));
        let sink = Arc::new(StreamSink {
            port: AtomicU16::new(config.port),
            state: Mutex::new(SinkState {
                decoder: PcmDecoder::new(),
                gaps: GapTracker::new(Duration::from_millis(MAX_PADDING_GAP_MS)),
            }),
            clock: MonotonicClock::new(),
            tx,
            counters: Counters::default(),
        });

        let mut receiver = Self {
            transport,
            config: config.clone(),
            subscription: None,
            sink,
            frames,
        };
        receiver.update(&config)?;
        Ok(receiver)
    }

    /// Apply new settings.
    ///
    /// A new port moves the subscription to that port's device before the
    /// old one is released; name and host filters are reapplied as needed.
    pub fn update(&mut self, config: &ReceiverConfig) -> Result<(), NetworkError> {
        let port_changed = self.subscription.is_none() || config.port != self.config.port;
        let name_changed = config.stream_name != self.config.stream_name;
        let host_changed = config.host != self.config.host;

        if port_changed {
            let device = self.transport.device(config.port)?;
            self.sink.rebind(config.port);
            let id = device.add_filtered_subscriber(
                self.sink.clone(),
                &config.stream_name,
                &config.host,
            );
            if let Some((old, old_id)) = self.subscription.replace((device, id)) {
                old.remove_subscriber(old_id);
            }
        } else if let Some((device, id)) = &self.subscription {
            if name_changed {
                device.set_name(*id, &config.stream_name);
            }
            if host_changed {
                device.set_host(*id, &config.host);
            }
        }

        self.config = config.clone();
        Ok(())
    }

    /// Decoded frames, in arrival order, padding included
    pub fn frames(&self) -> &Receiver<DecodedFrame> {
        &self.frames
    }

    pub fn config(&self) -> &ReceiverConfig {
        &self.config
    }

    pub fn stats(&self) -> ReceiverStats {
        let c = &self.sink.counters;
        let state = self.sink.state.lock();
        ReceiverStats {
            packets_received: c.packets_received.load(Ordering::Relaxed),
            frames_received: c.frames_received.load(Ordering::Relaxed),
            packets_rejected: c.packets_rejected.load(Ordering::Relaxed),
            missed_events: state.gaps.missed_events(),
            packets_lost: state.gaps.packets_lost(),
            padding_frames: c.padding_frames.load(Ordering::Relaxed),
            frames_dropped: c.frames_dropped.load(Ordering::Relaxed),
        }
    }
}

impl Drop for VbanReceiver {
    fn drop(&mut self) {
        if let Some((device, id)) = self.subscription.take() {
            device.remove_subscriber(id);
        }

        let stats = self.stats();
        if stats.missed_events > 0 {
            tracing::error!(
                "Port {}: received {} packets, {} frames, {} time(s) missed packets",
                self.config.port,
                stats.packets_received,
                stats.frames_received,
                stats.missed_events
            );
        } else {
            tracing::info!(
                "Port {}: received {} packets, {} frames, {} time(s) missed packets",
                self.config.port,
                stats.packets_received,
                stats.frames_received,
                stats.missed_events
            );
        }
    }
}
