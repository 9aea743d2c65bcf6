//! Router settings structs, defaults and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be round-tripped through TOML files.  Defaults reproduce the
//! tuning the router was designed around: 48 kHz stereo capture in
//! 512-byte chunks, a 64-chunk detection window, and per-sink ring sizes,
//! targets and loop gains.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::decode::default_ffmpeg_args;
use crate::sink::{BufferParams, ChannelLayout, SinkError};

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{sink} sink: {reason}")]
    InvalidSink { sink: &'static str, reason: String },

    #[error("detection window must be at least one chunk")]
    DetectionWindow,

    #[error("capture chunk of {bytes} bytes is not a whole number of {channels}-channel s16 frames")]
    ChunkSize { bytes: usize, channels: u16 },

    #[error("{sink} sink must have {expected} channels, configured {got}")]
    ChannelCount {
        sink: &'static str,
        expected: usize,
        got: usize,
    },
}

// ---------------------------------------------------------------------------
// CaptureConfig
// ---------------------------------------------------------------------------

/// Format of the S/PDIF capture stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureConfig {
    pub sample_rate: u32,
    pub channels: u16,
    /// Bytes handed to the router per read.
    pub chunk_bytes: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 2,
            chunk_bytes: 512,
        }
    }
}

// ---------------------------------------------------------------------------
// SinkConfig
// ---------------------------------------------------------------------------

/// Ring, controller and device sizing for one playback path.
/// Sizes are in samples (frames × channels) unless noted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkConfig {
    pub channels: usize,
    /// Ring capacity; power of two, multiple of `channels`.
    pub capacity: usize,
    /// Occupancy setpoint of the controller.
    pub target: usize,
    /// Loop gain: ratio change per sample of averaged error.
    pub gain: f64,
    /// Samples per device write.
    pub output_chunk: usize,
    /// Controller error history length.
    pub history_len: usize,
    /// Device buffer used when no latency is requested.
    pub device_buffer_samples: usize,
    /// Input frames per resampler call.
    pub resampler_chunk_frames: usize,
}

impl SinkConfig {
    pub fn pcm() -> Self {
        Self {
            channels: 2,
            capacity: 2048,
            target: 128,
            gain: 4e-6,
            output_chunk: 32,
            history_len: 32,
            device_buffer_samples: 512,
            resampler_chunk_frames: 128,
        }
    }

    pub fn compressed() -> Self {
        Self {
            channels: 6,
            capacity: 32_768,
            target: 384,
            gain: 1.3334e-6,
            output_chunk: 96,
            history_len: 32,
            device_buffer_samples: 1536,
            resampler_chunk_frames: 256,
        }
    }

    pub fn buffer_params(&self) -> BufferParams {
        BufferParams {
            channels: self.channels,
            capacity: self.capacity,
            target: self.target,
            gain: self.gain,
            output_chunk: self.output_chunk,
            history_len: self.history_len,
        }
    }

    /// Check the ring and controller invariants.  `name` labels the error.
    pub fn validate(&self, name: &'static str) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidSink { sink: name, reason };

        self.buffer_params().validate().map_err(|e| match e {
            SinkError::InvalidParams(reason) => invalid(reason),
            other => invalid(other.to_string()),
        })?;

        if self.resampler_chunk_frames == 0 {
            return Err(invalid("resampler chunk must be at least one frame".into()));
        }
        if self.device_buffer_samples < self.output_chunk {
            return Err(invalid(format!(
                "device buffer of {} samples is smaller than one output chunk ({})",
                self.device_buffer_samples, self.output_chunk
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// DecoderConfig
// ---------------------------------------------------------------------------

/// External AC-3 decoder command.  It reads AC-3 frames on stdin and writes
/// interleaved `f32le` at 48 kHz on stdout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecoderConfig {
    pub command: String,
    pub args: Vec<String>,
    /// Channels the command writes per frame.
    pub channels: usize,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            command: "ffmpeg".into(),
            args: default_ffmpeg_args(),
            channels: 6,
        }
    }
}

// ---------------------------------------------------------------------------
// RouterConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level configuration, serialised as `settings.toml`.
///
/// # Persistence
///
/// ```rust,no_run
/// use spdif_router::config::{AppPaths, RouterConfig};
///
/// // Load, writing the defaults on first run
/// let config = RouterConfig::load_or_create(&AppPaths::new().settings_file).unwrap();
/// config.validate().unwrap();
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Consecutive chunks without a burst before the stream is taken as PCM.
    pub detection_window: usize,
    /// Slot order of the 5.1 output device.
    pub layout: ChannelLayout,
    /// Output device name; `None` means the system default.
    pub playback_device: Option<String>,
    /// Playback latency in microseconds; the command line overrides it.
    pub latency_us: Option<u32>,
    pub capture: CaptureConfig,
    pub pcm: SinkConfig,
    pub compressed: SinkConfig,
    pub decoder: DecoderConfig,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            detection_window: 64,
            layout: ChannelLayout::default(),
            playback_device: None,
            latency_us: None,
            capture: CaptureConfig::default(),
            pcm: SinkConfig::pcm(),
            compressed: SinkConfig::compressed(),
            decoder: DecoderConfig::default(),
        }
    }
}

impl RouterConfig {
    /// Load `path`, or write the defaults there on first run.
    ///
    /// Failing to write the defaults is logged; the defaults are still
    /// returned.
    pub fn load_or_create(path: &std::path::Path) -> Result<Self> {
        if path.exists() {
            return Self::load_from(path);
        }
        let config = Self::default();
        match config.save_to(path) {
            Ok(()) => log::info!("wrote default settings to {}", path.display()),
            Err(e) => log::warn!("could not write default settings to {}: {e}", path.display()),
        }
        Ok(config)
    }

    /// Load from an explicit path.
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save to an explicit path, creating parent directories as needed.
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject settings the router cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.detection_window == 0 {
            return Err(ConfigError::DetectionWindow);
        }

        let frame_bytes = 2 * usize::from(self.capture.channels);
        if frame_bytes == 0 || self.capture.chunk_bytes == 0 || self.capture.chunk_bytes % frame_bytes != 0 {
            return Err(ConfigError::ChunkSize {
                bytes: self.capture.chunk_bytes,
                channels: self.capture.channels,
            });
        }

        if self.pcm.channels != usize::from(self.capture.channels) {
            return Err(ConfigError::ChannelCount {
                sink: "pcm",
                expected: usize::from(self.capture.channels),
                got: self.pcm.channels,
            });
        }
        if self.compressed.channels != 6 {
            return Err(ConfigError::ChannelCount {
                sink: "compressed",
                expected: 6,
                got: self.compressed.channels,
            });
        }

        self.pcm.validate("pcm")?;
        self.compressed.validate("compressed")?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
