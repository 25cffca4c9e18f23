//! VBAN sender
//!
//! Captured frames are queued by [`SenderInput::push`] and drained by a
//! `vban-out` thread that converts them to the target encoding, slices the
//! result into packets of at most 256 sample frames and paces itself on the
//! duration of each packet sent.
//!
//! The thread runs a small state machine:
//!
//! ```text
//! Starting ──▶ Running ──▶ Restart ──▶ Starting
//!     │            │
//!     └────────────┴──▶ Stopped
//! ```
//!
//! Destination and stream name changes apply on the next iteration; a new
//! sample rate or format forces a restart with fresh encoder, resampler and
//! socket.

use bytes::BytesMut;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::{frames_to_ns, AudioFrame, Resampler};
use crate::codec::PcmEncoder;
use crate::config::SenderConfig;
use crate::constants::{HEADER_SIZE, MAX_PAYLOAD_SIZE, MAX_SAMPLES_PER_PACKET};
use crate::error::{Error, NetworkError, Result};
use crate::network::resolver::{ResolveHandle, ResolveOutcome};
use crate::network::udp::{open_send_socket, send_datagram};
use crate::protocol::{sample_rate_index, StreamName, VbanHeader};
use crate::transport::Transport;

/// Format of the audio handed to the sender
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

/// Sender statistics
#[derive(Debug, Clone, Default)]
pub struct SenderStats {
    pub packets_sent: u64,
    /// Sample frames sent, all channels counted once
    pub frames_sent: u64,
    pub bytes_sent: u64,
    /// Captured frames discarded because the queue was full
    pub frames_dropped: u64,
    pub send_errors: u64,
    pub restarts: u64,
    /// Capture time of the first sample of the last packet, in nanoseconds
    pub last_packet_timestamp_ns: u64,
}

#[derive(Default)]
struct Counters {
    packets_sent: AtomicU64,
    frames_sent: AtomicU64,
    bytes_sent: AtomicU64,
    frames_dropped: AtomicU64,
    send_errors: AtomicU64,
    restarts: AtomicU64,
    last_packet_timestamp_ns: AtomicU64,
}

/// Everything the caller and the output thread share, under one lock
struct State {
    queue: VecDeque<AudioFrame>,
    /// Latched wake-up, cleared by the thread when it wakes
    signalled: bool,
    config: SenderConfig,
    destination: Option<Ipv4Addr>,
    /// Identity of the newest destination lookup
    resolve_context: u64,
    resolve: Option<ResolveHandle>,
}

struct Shared {
    state: Mutex<State>,
    wake: Condvar,
    running: AtomicBool,
    queue_capacity: usize,
    channels: u16,
    counters: Counters,
}

impl Shared {
    fn new(config: SenderConfig, channels: u16) -> Self {
        let queue_capacity = config.queue_capacity.max(1);
        Self {
            state: Mutex::new(State {
                queue: VecDeque::with_capacity(queue_capacity),
                signalled: false,
                config,
                destination: None,
                resolve_context: 0,
                resolve: None,
            }),
            wake: Condvar::new(),
            running: AtomicBool::new(false),
            queue_capacity,
            channels,
            counters: Counters::default(),
        }
    }

    fn signal(&self, state: &mut State) {
        state.signalled = true;
        self.wake.notify_one();
    }

    fn enqueue(&self, frame: AudioFrame) -> bool {
        if !self.running.load(Ordering::Acquire) {
            return false;
        }
        if frame.channels != self.channels {
            tracing::warn!(
                "Dropping frame with {} channels, sender expects {}",
                frame.channels,
                self.channels
            );
            return false;
        }

        let mut state = self.state.lock();
        if state.queue.len() >= self.queue_capacity {
            state.queue.pop_front();
            self.counters.frames_dropped.fetch_add(1, Ordering::Relaxed);
        }
        state.queue.push_back(frame);
        self.signal(&mut state);
        true
    }

    fn stats(&self) -> SenderStats {
        let c = &self.counters;
        SenderStats {
            packets_sent: c.packets_sent.load(Ordering::Relaxed),
            frames_sent: c.frames_sent.load(Ordering::Relaxed),
            bytes_sent: c.bytes_sent.load(Ordering::Relaxed),
            frames_dropped: c.frames_dropped.load(Ordering::Relaxed),
            send_errors: c.send_errors.load(Ordering::Relaxed),
            restarts: c.restarts.load(Ordering::Relaxed),
            last_packet_timestamp_ns: c.last_packet_timestamp_ns.load(Ordering::Relaxed),
        }
    }
}

/// Clonable handle for feeding audio into a sender, e.g. from a capture
/// callback
#[derive(Clone)]
pub struct SenderInput {
    shared: Arc<Shared>,
}

impl SenderInput {
    /// Queue a frame, dropping the oldest queued one when full.
    ///
    /// Returns `false` if the sender is not running or the channel count
    /// does not match the source format.
    pub fn push(&self, frame: AudioFrame) -> bool {
        self.shared.enqueue(frame)
    }
}

/// Paced VBAN packet sender
pub struct VbanSender {
    shared: Arc<Shared>,
    transport: Transport,
    format: SourceFormat,
    thread_handle: Option<JoinHandle<()>>,
}

impl VbanSender {
    pub fn new(transport: Transport, format: SourceFormat, config: SenderConfig) -> Self {
        let sender = Self {
            shared: Arc::new(Shared::new(config.clone(), format.channels)),
            transport,
            format,
            thread_handle: None,
        };
        sender.apply_host(&config.host);
        sender
    }

    /// Start sending.
    ///
    /// The first start happens on the caller's thread so configuration
    /// errors (unsupported sample rate or format) and socket errors are
    /// returned here.
    pub fn start(&mut self) -> Result<()> {
        if self.thread_handle.is_some() {
            return Ok(());
        }

        let session = Session::start(&self.shared, self.format)?;
        self.shared.running.store(true, Ordering::Release);

        let shared = self.shared.clone();
        let format = self.format;
        let handle = thread::Builder::new()
            .name("vban-out".to_string())
            .spawn(move || output_thread(shared, format, session))
            .map_err(|e| {
                self.shared.running.store(false, Ordering::Release);
                NetworkError::ThreadSpawn(e.to_string())
            })?;

        self.thread_handle = Some(handle);
        Ok(())
    }

    /// Stop the output thread and drop queued audio
    pub fn stop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        {
            let mut state = self.shared.state.lock();
            self.shared.signal(&mut state);
        }

        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();

            let stats = self.stats();
            tracing::info!(
                "Sender stopped: {} packets, {} frames, {} bytes, {} dropped",
                stats.packets_sent,
                stats.frames_sent,
                stats.bytes_sent,
                stats.frames_dropped
            );
        }
        self.shared.state.lock().queue.clear();
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Apply new settings.
    ///
    /// A different host is looked up again; the newest lookup wins.
    pub fn update(&self, config: SenderConfig) {
        let host_changed = {
            let mut state = self.shared.state.lock();
            let changed = state.config.host.trim() != config.host.trim();
            state.config = config.clone();
            self.shared.signal(&mut state);
            changed
        };

        if host_changed {
            self.apply_host(&config.host);
        }
    }

    fn apply_host(&self, host: &str) {
        let host = host.trim();

        let context = {
            let mut state = self.shared.state.lock();
            state.resolve_context += 1;
            if let Some(previous) = state.resolve.take() {
                previous.cancel();
            }
            state.destination = if host.is_empty() {
                None
            } else {
                host.parse::<Ipv4Addr>().ok()
            };
            if host.is_empty() || state.destination.is_some() {
                return;
            }
            state.resolve_context
        };

        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        let handle = self.transport.resolver().start(host, move |outcome| {
            let Some(shared) = weak.upgrade() else {
                return;
            };
            let mut state = shared.state.lock();
            if state.resolve_context != context {
                return;
            }
            match outcome {
                ResolveOutcome::Resolved(addr) => {
                    tracing::info!("Sending to {}", addr);
                    state.destination = Some(addr);
                }
                ResolveOutcome::Failed(e) => {
                    tracing::warn!("Sender destination: {}", e);
                    state.destination = None;
                }
            }
            state.resolve = None;
        });

        if let Some(handle) = handle {
            let mut state = self.shared.state.lock();
            if state.resolve_context == context && state.destination.is_none() && !handle.is_done()
            {
                state.resolve = Some(handle);
            }
        }
    }

    /// Queue a captured frame, see [`SenderInput::push`]
    pub fn push_audio(&self, frame: AudioFrame) -> bool {
        self.shared.enqueue(frame)
    }

    pub fn input(&self) -> SenderInput {
        SenderInput {
            shared: self.shared.clone(),
        }
    }

    /// Address packets currently go to, if known
    pub fn destination(&self) -> Option<SocketAddrV4> {
        let state = self.shared.state.lock();
        state
            .destination
            .map(|addr| SocketAddrV4::new(addr, state.config.port))
    }

    pub fn format(&self) -> SourceFormat {
        self.format
    }

    pub fn stats(&self) -> SenderStats {
        self.shared.stats()
    }
}

impl Drop for VbanSender {
    fn drop(&mut self) {
        self.stop();
    }
}

enum Phase {
    Starting,
    Running(Session),
    Restart,
    Stopped,
}

fn output_thread(shared: Arc<Shared>, format: SourceFormat, first: Session) {
    let mut phase = Phase::Running(first);

    loop {
        phase = match phase {
            Phase::Starting => match Session::start(&shared, format) {
                Ok(session) => Phase::Running(session),
                Err(e) => {
                    tracing::error!("Cannot start VBAN output: {}", e);
                    shared.running.store(false, Ordering::Release);
                    Phase::Stopped
                }
            },
            Phase::Running(mut session) => {
                let restart = session.run(&shared);
                tracing::info!("Total number of output packets: {}", session.frame_counter);
                if restart {
                    shared.counters.restarts.fetch_add(1, Ordering::Relaxed);
                    Phase::Restart
                } else {
                    Phase::Stopped
                }
            }
            Phase::Restart => Phase::Starting,
            Phase::Stopped => break,
        };
    }
}

/// One configuration of the output: fixed rate, format and socket
struct Session {
    socket: UdpSocket,
    header: VbanHeader,
    encoder: PcmEncoder,
    resampler: Option<Resampler>,
    rate: u32,
    frame_size: usize,
    /// Encoded samples not sent yet
    pending: BytesMut,
    /// Capture time of the first pending sample
    pending_ts: u64,
    /// Frame popped from the queue, waiting for room in `pending`
    held: Option<AudioFrame>,
    packet: BytesMut,
    frame_counter: u32,
}

impl Session {
    fn start(shared: &Shared, format: SourceFormat) -> Result<Self> {
        let config = shared.state.lock().config.clone();

        let rate = if config.sample_rate != 0 {
            config.sample_rate
        } else {
            format.sample_rate
        };
        let index = sample_rate_index(rate).ok_or_else(|| {
            tracing::error!("VBAN cannot handle sampling frequency {} Hz", rate);
            Error::UnsupportedSampleRate(rate)
        })?;

        let encoder = PcmEncoder::new(config.format, format.channels)?;
        let resampler = if rate != format.sample_rate {
            tracing::info!("Configuring resampler {} -> {} Hz", format.sample_rate, rate);
            Some(Resampler::new(format.sample_rate, rate, format.channels))
        } else {
            None
        };
        let socket = open_send_socket()?;

        tracing::info!(
            "vban-out starting format={} channels={} frequency={}",
            config.format,
            format.channels,
            rate
        );

        let frame_size = encoder.bytes_per_frame();
        Ok(Self {
            socket,
            header: VbanHeader::audio(
                index,
                config.format,
                format.channels,
                StreamName::new(&config.stream_name),
            ),
            encoder,
            resampler,
            rate,
            frame_size,
            pending: BytesMut::with_capacity(MAX_PAYLOAD_SIZE * 2),
            pending_ts: 0,
            held: None,
            packet: BytesMut::with_capacity(HEADER_SIZE + MAX_PAYLOAD_SIZE),
            frame_counter: 0,
        })
    }

    /// Run until stopped (`false`) or until the rate or format changes (`true`)
    fn run(&mut self, shared: &Shared) -> bool {
        let mut wait = Duration::from_nanos(frames_to_ns(MAX_SAMPLES_PER_PACKET as u64, self.rate));

        loop {
            let destination = {
                let mut state = shared.state.lock();
                if !state.signalled {
                    shared.wake.wait_for(&mut state, wait);
                }
                state.signalled = false;

                let config = &state.config;
                let wanted_rate = if config.sample_rate != 0 {
                    config.sample_rate
                } else {
                    self.resampler
                        .as_ref()
                        .map(Resampler::from_rate)
                        .unwrap_or(self.rate)
                };
                if wanted_rate != self.rate {
                    tracing::info!(
                        "Restarting to change frequency from {} to {}",
                        self.rate,
                        wanted_rate
                    );
                    return true;
                }
                if config.format != self.header.resolution {
                    tracing::info!(
                        "Restarting to change format from {} to {}",
                        self.header.resolution,
                        config.format
                    );
                    return true;
                }

                self.header.stream_name = StreamName::new(&config.stream_name);
                if self.held.is_none() {
                    self.held = state.queue.pop_front();
                }
                let port = state.config.port;
                let destination = state
                    .destination
                    .map(|addr| SocketAddr::V4(SocketAddrV4::new(addr, port)));
                destination
            };

            if !shared.running.load(Ordering::Acquire) {
                return false;
            }

            self.accept_held();

            if let Some(frames) = self.send_ready(shared, destination) {
                wait = Duration::from_nanos(frames_to_ns(frames as u64, self.rate));
            }
        }
    }

    /// Move the held frame into `pending` if there is room for another
    /// sample frame
    fn accept_held(&mut self) {
        if self.pending.len() + self.frame_size > MAX_PAYLOAD_SIZE {
            return;
        }
        let Some(frame) = self.held.take() else {
            return;
        };

        let queued_frames = (self.pending.len() / self.frame_size) as u64;
        self.pending_ts = frame
            .timestamp
            .saturating_sub(frames_to_ns(queued_frames, self.rate));

        let encoded = match self.resampler.as_mut() {
            Some(resampler) => {
                let samples = resampler.process(&frame.samples);
                self.encoder.encode_into(&samples, &mut self.pending)
            }
            None => self.encoder.encode_into(&frame.samples, &mut self.pending),
        };
        if let Err(e) = encoded {
            tracing::error!("Failed to convert frame {}: {}", frame.sequence, e);
        }
    }

    /// Send one packet if a full one is pending or no further sample frame
    /// fits. Returns the number of sample frames sent.
    fn send_ready(&mut self, shared: &Shared, destination: Option<SocketAddr>) -> Option<usize> {
        let mut frames = self.pending.len() / self.frame_size;
        if frames < MAX_SAMPLES_PER_PACKET
            && self.pending.len() + self.frame_size <= MAX_PAYLOAD_SIZE
        {
            return None;
        }

        frames = frames
            .min(MAX_PAYLOAD_SIZE / self.frame_size)
            .min(MAX_SAMPLES_PER_PACKET);
        let len = frames * self.frame_size;

        self.header.samples = frames as u16;
        self.header.frame_counter = self.frame_counter;
        self.packet.clear();
        self.header.encode(&mut self.packet);
        self.packet.extend_from_slice(&self.pending.split_to(len));

        let counters = &shared.counters;
        if let Some(dest) = destination {
            match send_datagram(&self.socket, &self.packet, dest) {
                Ok(sent) => {
                    counters.packets_sent.fetch_add(1, Ordering::Relaxed);
                    counters.frames_sent.fetch_add(frames as u64, Ordering::Relaxed);
                    counters.bytes_sent.fetch_add(sent as u64, Ordering::Relaxed);
                }
                Err(e) => {
                    counters.send_errors.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!("Packet {}: {}", self.frame_counter, e);
                }
            }
        }
        counters
            .last_packet_timestamp_ns
            .store(self.pending_ts, Ordering::Relaxed);
        tracing::trace!("Sent packet nuFrame: {}", self.frame_counter);

        self.pending_ts += frames_to_ns(frames as u64, self.rate);
        self.frame_counter = self.frame_counter.wrapping_add(1);
        Some(frames)
    }
}
