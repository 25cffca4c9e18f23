//! Audio capture from an input device
//!
//! The cpal stream lives on a dedicated thread; every callback buffer is
//! wrapped in an [`AudioFrame`] and handed to a sink, normally a sender input.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam_channel::{bounded, Receiver};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::buffer::{AudioFrame, MonotonicClock};
use crate::audio::device::open_input_device;
use crate::error::AudioError;

/// Capture from a single input device
pub struct AudioCapture {
    device_name: Option<String>,

    running: Arc<AtomicBool>,

    thread_handle: Option<JoinHandle<()>>,

    /// Stream errors reported by the cpal callback
    error_rx: Option<Receiver<AudioError>>,

    sequence: Arc<AtomicU32>,

    samples_captured: Arc<AtomicU64>,

    config: StreamConfig,
}

impl AudioCapture {
    /// Prepare capture from `device_name` (default input when `None`).
    ///
    /// Channel count and sample rate default to the device's own.
    pub fn new(
        device_name: Option<&str>,
        sample_rate: Option<u32>,
        channels: Option<u16>,
    ) -> Result<Self, AudioError> {
        let device = open_input_device(device_name)?;
        let default_config = device
            .default_input_config()
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        if default_config.sample_format() != cpal::SampleFormat::F32 {
            return Err(AudioError::UnsupportedFormat(format!(
                "{:?}",
                default_config.sample_format()
            )));
        }

        let config = StreamConfig {
            channels: channels.unwrap_or(default_config.channels()),
            sample_rate: cpal::SampleRate(sample_rate.unwrap_or(default_config.sample_rate().0)),
            buffer_size: cpal::BufferSize::Default,
        };

        Ok(Self {
            device_name: device_name.map(str::to_string),
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
            error_rx: None,
            sequence: Arc::new(AtomicU32::new(0)),
            samples_captured: Arc::new(AtomicU64::new(0)),
            config,
        })
    }

    /// Start capturing, delivering every buffer to `sink`
    pub fn start<F>(&mut self, sink: F) -> Result<(), AudioError>
    where
        F: Fn(AudioFrame) + Send + 'static,
    {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        let device = open_input_device(self.device_name.as_deref())?;
        let (error_tx, error_rx) = bounded::<AudioError>(16);
        self.error_rx = Some(error_rx);

        let running = self.running.clone();
        let running_for_loop = self.running.clone();
        let sequence = self.sequence.clone();
        let samples_captured = self.samples_captured.clone();
        let config = self.config.clone();
        let channels = self.config.channels;
        let clock = MonotonicClock::new();

        self.sequence.store(0, Ordering::SeqCst);
        self.samples_captured.store(0, Ordering::SeqCst);
        running.store(true, Ordering::SeqCst);

        let thread_name = format!(
            "capture-{}",
            self.device_name.as_deref().unwrap_or("default")
        );

        let handle = thread::Builder::new()
            .name(thread_name)
            .spawn(move || {
                let stream = device.build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        if !running.load(Ordering::Relaxed) {
                            return;
                        }

                        let seq = sequence.fetch_add(1, Ordering::Relaxed);
                        samples_captured.fetch_add(data.len() as u64, Ordering::Relaxed);

                        sink(AudioFrame::new(data.to_vec(), channels, clock.now_ns(), seq));
                    },
                    move |err| {
                        let _ = error_tx.try_send(AudioError::StreamError(err.to_string()));
                    },
                    None,
                );

                match stream {
                    Ok(stream) => {
                        if let Err(e) = stream.play() {
                            tracing::error!("Failed to start stream: {}", e);
                            running_for_loop.store(false, Ordering::SeqCst);
                            return;
                        }

                        while running_for_loop.load(Ordering::Relaxed) {
                            thread::sleep(Duration::from_millis(10));
                        }
                    }
                    Err(e) => {
                        tracing::error!("Failed to build stream: {}", e);
                        running_for_loop.store(false, Ordering::SeqCst);
                    }
                }
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        self.thread_handle = Some(handle);
        Ok(())
    }

    /// Stop capturing
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn samples_captured(&self) -> u64 {
        self.samples_captured.load(Ordering::Relaxed)
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    pub fn channels(&self) -> u16 {
        self.config.channels
    }

    /// Next error reported by the stream, if any
    pub fn check_errors(&self) -> Option<AudioError> {
        self.error_rx.as_ref().and_then(|rx| rx.try_recv().ok())
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.stop();
    }
}
