//! Audio subsystem module

pub mod buffer;
pub mod resample;
pub mod sequence;

#[cfg(feature = "device-io")]
pub mod capture;
#[cfg(feature = "device-io")]
pub mod device;

pub use buffer::{frames_to_ns, AudioFrame, MonotonicClock};
pub use resample::Resampler;
pub use sequence::{Gap, GapTracker};

#[cfg(feature = "device-io")]
pub use capture::AudioCapture;
#[cfg(feature = "device-io")]
pub use device::{list_input_devices, open_input_device, InputDevice};
