//! Audio I/O: S/PDIF capture, playback devices and resampling.
//!
//! # Data flow
//!
//! ```text
//! CpalCapture ──512-byte s16le chunks──▶ router
//!                                          │
//!        s16le_to_planar / decoder ◀───────┘
//!                 │
//!           ResamplerBank ──▶ RateAdaptiveBuffer ──drain thread──▶ CpalPlayback
//! ```

pub mod capture;
pub mod playback;
pub mod resample;

pub use capture::{list_devices, CaptureError, CaptureSource, CpalCapture, DeviceList};
pub use playback::{playback_buffer_samples, CpalPlayback, DeviceError, PlaybackDevice};
pub use resample::{s16le_to_planar, ResampleError, Resampler, ResamplerBank, SincResampler};

#[cfg(test)]
pub use capture::ScriptedCapture;
#[cfg(test)]
pub use playback::RecordingDevice;
#[cfg(test)]
pub use resample::MockResampler;
