//! Rate-adaptive playback buffer.
//!
//! One [`RateAdaptiveBuffer`] sits between a pipeline's resampler (the
//! producer, on the capture thread) and its playback device (driven by a
//! dedicated draining thread).
//!
//! ```text
//! capture thread                         "<name>-drain" thread
//! ──────────────                         ─────────────────────
//! enqueue(frames, map)                   loop:
//!   lock                                   lock
//!   ratio = controller.update(occupancy)   wait while occupancy < output_chunk
//!   ring.push_frames (all or nothing)      ring.pop_into(chunk)
//!   unlock, notify ───────────────────▶    unlock
//!   return ratio for next resample         device.write(chunk)   (outside the lock)
//! ```
//!
//! The producer never waits for space: a chunk that does not fit is dropped
//! whole.  The ring starts seeded with `target` samples of silence so the
//! controller begins at its setpoint.
//!
//! Closing (or dropping) the buffer clears the running flag, wakes the
//! drainer and joins it.  Audio still queued at that point is discarded.

use std::sync::{mpsc, Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use thiserror::Error;

use super::controller::RateController;
use super::ring::SampleRing;
use crate::audio::{DeviceError, PlaybackDevice, ResampleError};
use crate::decode::DecodeError;

// ---------------------------------------------------------------------------
// SinkError
// ---------------------------------------------------------------------------

/// Failures while opening a pipeline.  All of them are fatal at startup.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("invalid buffer parameters: {0}")]
    InvalidParams(String),

    #[error("failed to open playback device: {0}")]
    Device(#[from] DeviceError),

    #[error("failed to create resampler: {0}")]
    Resampler(#[from] ResampleError),

    #[error("failed to open decoder: {0}")]
    Decoder(#[from] DecodeError),

    #[error("failed to spawn draining thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("draining thread exited before opening its device")]
    DrainerLost,
}

// ---------------------------------------------------------------------------
// BufferParams
// ---------------------------------------------------------------------------

/// Shape and tuning of one buffer instance.  All sizes are in samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BufferParams {
    pub channels: usize,
    pub capacity: usize,
    pub target: usize,
    pub gain: f64,
    pub output_chunk: usize,
    pub history_len: usize,
}

impl BufferParams {
    pub fn validate(&self) -> Result<(), SinkError> {
        let bad = |msg: String| Err(SinkError::InvalidParams(msg));

        if self.channels == 0 {
            return bad("channel count must be at least 1".into());
        }
        if !self.capacity.is_power_of_two() || self.capacity % self.channels != 0 {
            return bad(format!(
                "capacity {} must be a power of two and a multiple of {} channels",
                self.capacity, self.channels
            ));
        }
        if self.target % self.channels != 0 || self.target >= self.capacity {
            return bad(format!(
                "target {} must be a multiple of {} channels and below capacity {}",
                self.target, self.channels, self.capacity
            ));
        }
        if self.output_chunk == 0
            || self.output_chunk % self.channels != 0
            || self.output_chunk >= self.capacity
        {
            return bad(format!(
                "output chunk {} must be a non-zero multiple of {} channels below capacity {}",
                self.output_chunk, self.channels, self.capacity
            ));
        }
        if self.history_len == 0 {
            return bad("controller history length must be at least 1".into());
        }
        if !self.gain.is_finite() {
            return bad(format!("loop gain {} is not finite", self.gain));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// EnqueueOutcome / BufferStats
// ---------------------------------------------------------------------------

/// Result of one [`RateAdaptiveBuffer::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnqueueOutcome {
    /// `false` when the chunk was dropped for lack of space.
    pub queued: bool,
    /// Ratio to use for the next resample call.
    pub ratio: f64,
    /// Smoothed controller error behind `ratio`.
    pub average: f64,
    /// Occupancy observed before the push.
    pub occupancy: usize,
}

/// Running counters for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BufferStats {
    pub enqueued: u64,
    pub dropped: u64,
    pub drained: u64,
    pub write_failures: u64,
    pub ratio: f64,
    pub average: f64,
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

struct Inner {
    ring: SampleRing,
    controller: RateController,
    running: bool,
    stats: BufferStats,
}

struct Shared {
    inner: Mutex<Inner>,
    data_ready: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// RateAdaptiveBuffer
// ---------------------------------------------------------------------------

pub struct RateAdaptiveBuffer {
    name: String,
    params: BufferParams,
    shared: Arc<Shared>,
    drainer: Option<JoinHandle<()>>,
}

impl RateAdaptiveBuffer {
    /// Allocate the ring and start the draining thread.
    ///
    /// `make_device` runs on the draining thread, which then owns the device
    /// until the buffer is closed.  Its error is returned from `open`.
    pub fn open<F, D>(name: &str, params: BufferParams, make_device: F) -> Result<Self, SinkError>
    where
        F: FnOnce() -> Result<D, DeviceError> + Send + 'static,
        D: PlaybackDevice + 'static,
    {
        params.validate()?;

        let shared = Arc::new(Shared {
            inner: Mutex::new(Inner {
                ring: SampleRing::with_silence(params.capacity, params.target),
                controller: RateController::new(params.target, params.gain, params.history_len),
                running: true,
                stats: BufferStats {
                    ratio: 1.0,
                    ..BufferStats::default()
                },
            }),
            data_ready: Condvar::new(),
        });

        let (status_tx, status_rx) = mpsc::sync_channel::<Result<(), DeviceError>>(1);
        let thread_shared = Arc::clone(&shared);
        let output_chunk = params.output_chunk;
        let thread_name = format!("{name}-drain");

        let handle = std::thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                let device = match make_device() {
                    Ok(device) => {
                        let _ = status_tx.send(Ok(()));
                        device
                    }
                    Err(e) => {
                        let _ = status_tx.send(Err(e));
                        return;
                    }
                };
                drain_loop(&thread_name, &thread_shared, device, output_chunk);
            })?;

        match status_rx.recv() {
            Ok(Ok(())) => {
                log::debug!("{name}: buffer opened ({params:?})");
                Ok(Self {
                    name: name.to_string(),
                    params,
                    shared,
                    drainer: Some(handle),
                })
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(SinkError::Device(e))
            }
            Err(_) => {
                let _ = handle.join();
                Err(SinkError::DrainerLost)
            }
        }
    }

    /// Update the controller, then queue `frames` (one slice per source
    /// channel) interleaved through `channel_map`.
    ///
    /// The returned ratio reflects the occupancy seen *before* this chunk and
    /// is meant for the following resample call.
    pub fn enqueue<C: AsRef<[f32]>>(&self, frames: &[C], channel_map: &[usize]) -> EnqueueOutcome {
        debug_assert_eq!(channel_map.len(), self.params.channels);
        debug_assert!(channel_map.iter().all(|&src| src < frames.len()));

        let frame_count = frames.iter().map(|ch| ch.as_ref().len()).min().unwrap_or(0);
        let needed = frame_count * self.params.channels;

        let (outcome, free) = {
            let mut inner = self.shared.lock();

            let occupancy = inner.ring.occupancy();
            let ratio = inner.controller.update(occupancy);
            let average = inner.controller.average();
            let free = inner.ring.free_space();
            let queued = inner.ring.push_frames(frames, channel_map);

            if queued {
                inner.stats.enqueued += 1;
            } else {
                inner.stats.dropped += 1;
            }
            inner.stats.ratio = ratio;
            inner.stats.average = average;

            (
                EnqueueOutcome {
                    queued,
                    ratio,
                    average,
                    occupancy,
                },
                free,
            )
        };

        log::trace!(
            "{}: buffer {:5}  ratio {:.6}  avg {:.2}",
            self.name,
            outcome.occupancy,
            outcome.ratio,
            outcome.average
        );

        if outcome.queued {
            self.shared.data_ready.notify_one();
        } else {
            log::warn!(
                "{}: can't fit entire chunk, dropping it ({} free < {} needed)",
                self.name,
                free,
                needed
            );
        }

        outcome
    }

    pub fn occupancy(&self) -> usize {
        self.shared.lock().ring.occupancy()
    }

    pub fn free_space(&self) -> usize {
        self.shared.lock().ring.free_space()
    }

    pub fn stats(&self) -> BufferStats {
        self.shared.lock().stats
    }

    pub fn params(&self) -> &BufferParams {
        &self.params
    }

    /// Stop and join the draining thread, discarding queued audio.
    pub fn close(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let Some(handle) = self.drainer.take() else {
            return;
        };

        self.shared.lock().running = false;
        self.shared.data_ready.notify_all();

        if handle.join().is_err() {
            log::error!("{}: draining thread panicked", self.name);
        }
        log::debug!("{}: buffer closed", self.name);
    }
}

impl Drop for RateAdaptiveBuffer {
    fn drop(&mut self) {
        self.stop();
    }
}

// ---------------------------------------------------------------------------
// Draining thread
// ---------------------------------------------------------------------------

fn drain_loop<D: PlaybackDevice>(name: &str, shared: &Shared, mut device: D, chunk: usize) {
    let mut tmp = vec![0.0_f32; chunk];

    loop {
        {
            let guard = shared.lock();
            let mut inner = shared
                .data_ready
                .wait_while(guard, |i| i.running && i.ring.occupancy() < chunk)
                .unwrap_or_else(PoisonError::into_inner);

            if !inner.running {
                break;
            }

            inner.ring.pop_into(&mut tmp);
            inner.stats.drained += 1;
        }

        if let Err(e) = device.write(&tmp) {
            log::warn!("{name}: could not write chunk to output stream: {e}");
            shared.lock().stats.write_failures += 1;
        }
    }

    log::debug!("{name}: exiting");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
