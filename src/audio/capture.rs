//! S/PDIF capture via `cpal`.
//!
//! [`CpalCapture`] opens a 48 kHz stereo `i16` input stream and hands the
//! router fixed-size chunks of little-endian bytes, exactly as they arrived
//! on the wire.  The cpal callback runs on its own audio thread and forwards
//! samples over an mpsc channel; [`CaptureSource::read`] blocks on that
//! channel until a full chunk is assembled.
//!
//! A stream error or a dropped stream is reported from `read` and is fatal
//! to the router.

use std::collections::VecDeque;
use std::sync::mpsc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use thiserror::Error;

// ---------------------------------------------------------------------------
// CaptureError
// ---------------------------------------------------------------------------

/// Errors that can occur while setting up or reading the capture stream.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("no input device found on the default audio host")]
    NoDevice,

    #[error("input device not found: {0}")]
    NotFound(String),

    #[error("failed to enumerate audio devices: {0}")]
    Devices(#[from] cpal::DevicesError),

    #[error("failed to build input stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("failed to start input stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[error("input stream error: {0}")]
    Stream(String),

    #[error("input stream closed")]
    Disconnected,
}

// ---------------------------------------------------------------------------
// CaptureSource
// ---------------------------------------------------------------------------

/// Blocking source of raw capture chunks.
pub trait CaptureSource {
    /// Fill `chunk` completely with the next bytes of the capture stream.
    fn read(&mut self, chunk: &mut [u8]) -> Result<(), CaptureError>;
}

impl<S: CaptureSource + ?Sized> CaptureSource for Box<S> {
    fn read(&mut self, chunk: &mut [u8]) -> Result<(), CaptureError> {
        (**self).read(chunk)
    }
}

// ---------------------------------------------------------------------------
// CpalCapture
// ---------------------------------------------------------------------------

enum CaptureEvent {
    Samples(Vec<i16>),
    Failed(String),
}

/// Input stream on a named (or the default) cpal device.
///
/// Dropping it stops the underlying stream.
pub struct CpalCapture {
    rx: mpsc::Receiver<CaptureEvent>,
    pending: VecDeque<u8>,
    _stream: cpal::Stream,
}

impl CpalCapture {
    /// Open `source` (a cpal device name, or `"default"`) as signed 16-bit
    /// interleaved input and start it.
    ///
    /// # Errors
    ///
    /// [`CaptureError::NotFound`] when no input device carries that name;
    /// [`CaptureError::BuildStream`] when the device rejects the format.
    pub fn open(source: &str, sample_rate: u32, channels: u16) -> Result<Self, CaptureError> {
        let host = cpal::default_host();
        let device = if source == "default" {
            host.default_input_device().ok_or(CaptureError::NoDevice)?
        } else {
            host.input_devices()?
                .find(|d| d.name().map(|n| n == source).unwrap_or(false))
                .ok_or_else(|| CaptureError::NotFound(source.to_string()))?
        };

        let config = cpal::StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let (tx, rx) = mpsc::channel::<CaptureEvent>();
        let err_tx = tx.clone();

        let stream = device.build_input_stream(
            &config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                // Receiver gone means the router is shutting down.
                let _ = tx.send(CaptureEvent::Samples(data.to_vec()));
            },
            move |err: cpal::StreamError| {
                log::error!("cpal input stream error: {err}");
                let _ = err_tx.send(CaptureEvent::Failed(err.to_string()));
            },
            None,
        )?;

        stream.play()?;

        log::info!("capture opened on {source} ({sample_rate} Hz, {channels} ch, s16le)");

        Ok(Self {
            rx,
            pending: VecDeque::new(),
            _stream: stream,
        })
    }
}

impl CaptureSource for CpalCapture {
    fn read(&mut self, chunk: &mut [u8]) -> Result<(), CaptureError> {
        while self.pending.len() < chunk.len() {
            match self.rx.recv() {
                Ok(CaptureEvent::Samples(samples)) => {
                    self.pending
                        .extend(samples.iter().flat_map(|s| s.to_le_bytes()));
                }
                Ok(CaptureEvent::Failed(msg)) => return Err(CaptureError::Stream(msg)),
                Err(_) => return Err(CaptureError::Disconnected),
            }
        }

        let len = chunk.len();
        for (dst, src) in chunk.iter_mut().zip(self.pending.drain(..len)) {
            *dst = src;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Device listing
// ---------------------------------------------------------------------------

/// Names of the devices on the default cpal host.
#[derive(Debug, Clone, Default)]
pub struct DeviceList {
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

pub fn list_devices() -> Result<DeviceList, CaptureError> {
    let host = cpal::default_host();
    let names = |devices: Box<dyn Iterator<Item = cpal::Device>>| {
        devices
            .filter_map(|d| d.name().ok())
            .collect::<Vec<_>>()
    };

    Ok(DeviceList {
        inputs: names(Box::new(host.input_devices()?)),
        outputs: names(Box::new(host.output_devices()?)),
    })
}

// ---------------------------------------------------------------------------
// ScriptedCapture  (test-only)
// ---------------------------------------------------------------------------

/// Replays prepared chunks, then reports [`CaptureError::Disconnected`].
#[cfg(test)]
pub struct ScriptedCapture {
    pub chunks: VecDeque<Vec<u8>>,
}

#[cfg(test)]
impl ScriptedCapture {
    pub fn new(chunks: impl IntoIterator<Item = Vec<u8>>) -> Self {
        Self {
            chunks: chunks.into_iter().collect(),
        }
    }
}

#[cfg(test)]
impl CaptureSource for ScriptedCapture {
    fn read(&mut self, chunk: &mut [u8]) -> Result<(), CaptureError> {
        let next = self.chunks.pop_front().ok_or(CaptureError::Disconnected)?;
        assert_eq!(next.len(), chunk.len(), "scripted chunk size mismatch");
        chunk.copy_from_slice(&next);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
