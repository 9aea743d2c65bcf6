//! Playback endpoint via `cpal`.
//!
//! [`PlaybackDevice`] is the seam the draining thread writes through.
//! [`CpalPlayback`] implements it with a bounded chunk queue feeding a cpal
//! output callback: `write` waits once `buffer_samples` worth of audio is
//! queued, which paces the draining thread at the device clock.  A stream
//! error or a callback that stops pulling turns `write` into an error
//! instead of a hang, so the draining thread can always be joined.
//!
//! `cpal::Stream` is not `Send`, so a [`CpalPlayback`] must be opened on
//! the thread that will write to it.  [`crate::sink::RateAdaptiveBuffer`]
//! takes a device factory for that reason.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use thiserror::Error;

// ---------------------------------------------------------------------------
// DeviceError
// ---------------------------------------------------------------------------

/// Errors from opening or writing to a playback device.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("no output device found on the default audio host")]
    NoDevice,

    #[error("output device not found: {0}")]
    NotFound(String),

    #[error("failed to enumerate output devices: {0}")]
    Devices(#[from] cpal::DevicesError),

    #[error("failed to build output stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("failed to start output stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[error("output stream is no longer consuming samples")]
    Disconnected,

    #[error("device write failed: {0}")]
    Write(String),
}

// ---------------------------------------------------------------------------
// PlaybackDevice
// ---------------------------------------------------------------------------

/// Blocking sink for interleaved `f32` chunks.
pub trait PlaybackDevice {
    /// Queue `samples` for playback, blocking while the device buffer is full.
    fn write(&mut self, samples: &[f32]) -> Result<(), DeviceError>;
}

impl<D: PlaybackDevice + ?Sized> PlaybackDevice for Box<D> {
    fn write(&mut self, samples: &[f32]) -> Result<(), DeviceError> {
        (**self).write(samples)
    }
}

// ---------------------------------------------------------------------------
// Latency sizing
// ---------------------------------------------------------------------------

/// Device buffer size, in samples, that yields `latency_us` of output
/// latency.
///
/// Falls back to `default_samples` when no latency was requested or the
/// request is smaller than the default.
///
/// ```rust
/// use spdif_router::audio::playback_buffer_samples;
///
/// // 10 ms of stereo at 48 kHz
/// assert_eq!(playback_buffer_samples(10_000, 48_000, 2, 512), 960);
/// // Too small → default
/// assert_eq!(playback_buffer_samples(1_000, 48_000, 2, 512), 512);
/// ```
pub fn playback_buffer_samples(
    latency_us: u32,
    sample_rate: u32,
    channels: u16,
    default_samples: usize,
) -> usize {
    let frames = u64::from(latency_us) * u64::from(sample_rate) / 1_000_000;
    let samples = frames as usize * usize::from(channels);

    if latency_us == 0 || samples < default_samples {
        log::info!("using default sink buffer size of {default_samples} samples");
        return default_samples;
    }

    log::info!("sink buffer size = {samples} samples ({latency_us} us)");
    samples
}

// ---------------------------------------------------------------------------
// ChunkQueue / CallbackFeed
// ---------------------------------------------------------------------------

/// How long `write` waits for the output callback to accept a chunk before
/// the stream is treated as stalled.
pub(crate) const STALL_TIMEOUT: Duration = Duration::from_millis(500);

const RETRY_INTERVAL: Duration = Duration::from_millis(1);

/// Writer half of the queue between the draining thread and the output
/// callback.
///
/// `write` never blocks indefinitely: it fails once the stream reported an
/// error or the callback stopped taking chunks for `stall_timeout`.
pub(crate) struct ChunkQueue {
    tx: mpsc::SyncSender<Vec<f32>>,
    recycled: mpsc::Receiver<Vec<f32>>,
    failed: Arc<AtomicBool>,
    stall_timeout: Duration,
}

/// Callback half: copies queued chunks into the device buffer and hands
/// spent chunks back to the writer so the audio thread never frees memory.
pub(crate) struct CallbackFeed {
    rx: mpsc::Receiver<Vec<f32>>,
    recycle: mpsc::SyncSender<Vec<f32>>,
    current: Vec<f32>,
    pos: usize,
}

/// Build a queue holding at most `depth` chunks.
pub(crate) fn chunk_queue(depth: usize, stall_timeout: Duration) -> (ChunkQueue, CallbackFeed) {
    let depth = depth.max(1);
    let (tx, rx) = mpsc::sync_channel(depth);
    // Queued chunks, the one being played and the one being written.
    let (recycle, recycled) = mpsc::sync_channel(depth + 2);

    (
        ChunkQueue {
            tx,
            recycled,
            failed: Arc::new(AtomicBool::new(false)),
            stall_timeout,
        },
        CallbackFeed {
            rx,
            recycle,
            current: Vec::new(),
            pos: 0,
        },
    )
}

impl ChunkQueue {
    /// Flag raised by the stream's error callback.
    pub(crate) fn failure_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.failed)
    }

    fn failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }
}

impl PlaybackDevice for ChunkQueue {
    fn write(&mut self, samples: &[f32]) -> Result<(), DeviceError> {
        if self.failed() {
            return Err(DeviceError::Disconnected);
        }

        let mut chunk = self.recycled.try_recv().unwrap_or_default();
        chunk.clear();
        chunk.extend_from_slice(samples);

        let deadline = Instant::now() + self.stall_timeout;
        loop {
            match self.tx.try_send(chunk) {
                Ok(()) => return Ok(()),
                Err(mpsc::TrySendError::Disconnected(_)) => return Err(DeviceError::Disconnected),
                Err(mpsc::TrySendError::Full(back)) => chunk = back,
            }
            if self.failed() {
                return Err(DeviceError::Disconnected);
            }
            if Instant::now() >= deadline {
                return Err(DeviceError::Write(format!(
                    "output stream stalled for {} ms",
                    self.stall_timeout.as_millis()
                )));
            }
            std::thread::sleep(RETRY_INTERVAL);
        }
    }
}

impl CallbackFeed {
    /// Fill `data` from the queue, padding with silence on underrun.
    pub(crate) fn fill(&mut self, data: &mut [f32]) {
        let mut filled = 0;
        while filled < data.len() {
            if self.pos >= self.current.len() {
                match self.rx.try_recv() {
                    Ok(next) => {
                        let spent = std::mem::replace(&mut self.current, next);
                        if spent.capacity() > 0 {
                            // Only fails once the writer is gone.
                            let _ = self.recycle.try_send(spent);
                        }
                        self.pos = 0;
                    }
                    Err(_) => break,
                }
            }
            let n = (self.current.len() - self.pos).min(data.len() - filled);
            data[filled..filled + n].copy_from_slice(&self.current[self.pos..self.pos + n]);
            self.pos += n;
            filled += n;
        }
        data[filled..].fill(0.0);
    }
}

// ---------------------------------------------------------------------------
// CpalPlayback
// ---------------------------------------------------------------------------

/// Output stream on a named (or the default) cpal device.
pub struct CpalPlayback {
    queue: ChunkQueue,
    _stream: cpal::Stream,
}

impl CpalPlayback {
    /// Open an `f32` output stream and start it.
    ///
    /// `chunk_samples` is the size of each `write`; the queue holds
    /// `buffer_samples / chunk_samples` chunks.
    pub fn open(
        device_name: Option<&str>,
        sample_rate: u32,
        channels: u16,
        buffer_samples: usize,
        chunk_samples: usize,
    ) -> Result<Self, DeviceError> {
        let host = cpal::default_host();
        let device = match device_name {
            Some(name) => host
                .output_devices()?
                .find(|d| d.name().map(|n| n == name).unwrap_or(false))
                .ok_or_else(|| DeviceError::NotFound(name.to_string()))?,
            None => host.default_output_device().ok_or(DeviceError::NoDevice)?,
        };

        let config = cpal::StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let depth = (buffer_samples / chunk_samples.max(1)).max(1);
        let (queue, mut feed) = chunk_queue(depth, STALL_TIMEOUT);
        let failed = queue.failure_flag();

        let stream = device.build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| feed.fill(data),
            move |err: cpal::StreamError| {
                log::error!("cpal output stream error: {err}");
                failed.store(true, Ordering::Release);
            },
            None,
        )?;

        stream.play()?;

        log::info!(
            "playback opened on {} ({} Hz, {} ch, {} chunks queued max)",
            device_name.unwrap_or("default output"),
            sample_rate,
            channels,
            depth
        );

        Ok(Self {
            queue,
            _stream: stream,
        })
    }
}

impl PlaybackDevice for CpalPlayback {
    fn write(&mut self, samples: &[f32]) -> Result<(), DeviceError> {
        self.queue.write(samples)
    }
}

// ---------------------------------------------------------------------------
// RecordingDevice  (test-only)
// ---------------------------------------------------------------------------

/// Test double that records every chunk written to it.
#[cfg(test)]
#[derive(Clone, Default)]
pub struct RecordingDevice {
    pub writes: std::sync::Arc<std::sync::Mutex<Vec<Vec<f32>>>>,
    pub fail: std::sync::Arc<std::sync::atomic::AtomicBool>,
}

#[cfg(test)]
impl RecordingDevice {
    pub fn write_count(&self) -> usize {
        self.writes.lock().unwrap().len()
    }

    pub fn samples(&self) -> Vec<f32> {
        self.writes.lock().unwrap().concat()
    }
}

#[cfg(test)]
impl PlaybackDevice for RecordingDevice {
    fn write(&mut self, samples: &[f32]) -> Result<(), DeviceError> {
        self.writes.lock().unwrap().push(samples.to_vec());
        if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(DeviceError::Write("injected failure".into()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
