//! Adjustable-ratio resampling.
//!
//! Both pipelines run a sinc resampler per channel whose ratio is nudged
//! every chunk by the buffer controller.  Capture and playback are nominally
//! both 48 kHz, so the base ratio is 1.0 and the controller only corrects
//! drift between the two clocks.
//!
//! * [`Resampler`]: one mono channel with a settable ratio.
//! * [`SincResampler`]: `rubato::SincFixedIn` behind that trait, buffering
//!   input until a full rubato chunk is available.
//! * [`ResamplerBank`]: one resampler per channel sharing a single ratio.
//! * [`s16le_to_planar`]: split a raw capture chunk into per-channel `f32`.

use rubato::{
    Resampler as _, SincFixedIn, SincInterpolationParameters, SincInterpolationType,
    WindowFunction,
};
use thiserror::Error;

/// Largest ratio excursion the sinc resamplers accept, relative to 1.0.
const MAX_RELATIVE_RATIO: f64 = 1.1;

// ---------------------------------------------------------------------------
// ResampleError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ResampleError {
    #[error("failed to construct resampler: {0}")]
    Construction(#[from] rubato::ResamplerConstructionError),

    #[error("resampling failed: {0}")]
    Process(#[from] rubato::ResampleError),

    #[error("expected {expected} input channels, got {got}")]
    ChannelCount { expected: usize, got: usize },
}

// ---------------------------------------------------------------------------
// Resampler trait
// ---------------------------------------------------------------------------

/// A single-channel resampler whose ratio can change between calls.
pub trait Resampler: Send {
    /// Set the output/input ratio relative to the nominal rate conversion.
    fn set_ratio(&mut self, ratio: f64) -> Result<(), ResampleError>;

    /// Resample `input`, returning whatever output is ready.  May return
    /// fewer samples than `input.len() * ratio` while input is buffered.
    fn process(&mut self, input: &[f32]) -> Result<Vec<f32>, ResampleError>;
}

// ---------------------------------------------------------------------------
// SincResampler
// ---------------------------------------------------------------------------

pub struct SincResampler {
    inner: SincFixedIn<f32>,
    pending: Vec<f32>,
    base_ratio: f64,
}

impl SincResampler {
    /// Create a resampler from `input_rate` to `output_rate` that processes
    /// `chunk_frames` input frames per rubato call.
    pub fn new(input_rate: u32, output_rate: u32, chunk_frames: usize) -> Result<Self, ResampleError> {
        let params = SincInterpolationParameters {
            sinc_len: 256,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 256,
            window: WindowFunction::BlackmanHarris2,
        };

        let base_ratio = f64::from(output_rate) / f64::from(input_rate);
        let inner = SincFixedIn::<f32>::new(base_ratio, MAX_RELATIVE_RATIO, params, chunk_frames, 1)?;

        Ok(Self {
            inner,
            pending: Vec::with_capacity(chunk_frames * 2),
            base_ratio,
        })
    }

    /// Input samples waiting for a full chunk.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

impl Resampler for SincResampler {
    fn set_ratio(&mut self, ratio: f64) -> Result<(), ResampleError> {
        self.inner.set_resample_ratio(self.base_ratio * ratio, true)?;
        Ok(())
    }

    fn process(&mut self, input: &[f32]) -> Result<Vec<f32>, ResampleError> {
        self.pending.extend_from_slice(input);

        let mut out = Vec::new();
        loop {
            let needed = self.inner.input_frames_next();
            if self.pending.len() < needed {
                break;
            }
            let produced = self.inner.process(&[&self.pending[..needed]], None)?;
            if let Some(channel) = produced.first() {
                out.extend_from_slice(channel);
            }
            self.pending.drain(..needed);
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// ResamplerBank
// ---------------------------------------------------------------------------

/// Per-channel resamplers driven with one shared ratio.
pub struct ResamplerBank {
    channels: Vec<Box<dyn Resampler>>,
    ratio: f64,
}

impl ResamplerBank {
    pub fn new(channels: Vec<Box<dyn Resampler>>) -> Self {
        Self { channels, ratio: 1.0 }
    }

    /// `count` sinc resamplers at a 1:1 nominal rate.
    pub fn sinc(count: usize, sample_rate: u32, chunk_frames: usize) -> Result<Self, ResampleError> {
        let channels = (0..count)
            .map(|_| {
                SincResampler::new(sample_rate, sample_rate, chunk_frames)
                    .map(|r| Box::new(r) as Box<dyn Resampler>)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(channels))
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    /// Apply `ratio` to every channel.  The stored ratio only changes when
    /// all channels accepted it.
    pub fn set_ratio(&mut self, ratio: f64) -> Result<(), ResampleError> {
        for r in &mut self.channels {
            r.set_ratio(ratio)?;
        }
        self.ratio = ratio;
        Ok(())
    }

    /// Resample one slice per channel.  Output channels are truncated to the
    /// shortest so they stay frame-aligned.
    pub fn process_planar<C: AsRef<[f32]>>(
        &mut self,
        input: &[C],
    ) -> Result<Vec<Vec<f32>>, ResampleError> {
        if input.len() != self.channels.len() {
            return Err(ResampleError::ChannelCount {
                expected: self.channels.len(),
                got: input.len(),
            });
        }

        let mut out = self
            .channels
            .iter_mut()
            .zip(input)
            .map(|(r, ch)| r.process(ch.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;

        let frames = out.iter().map(Vec::len).min().unwrap_or(0);
        for ch in &mut out {
            ch.truncate(frames);
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// s16le_to_planar
// ---------------------------------------------------------------------------

/// Convert interleaved signed 16-bit little-endian bytes to one `f32` vector
/// per channel, scaled by `1 / 32768`.
///
/// A trailing partial frame is ignored.
///
/// # Example
///
/// ```rust
/// use spdif_router::audio::s16le_to_planar;
///
/// // L = 16384, R = -32768
/// let bytes = [0x00, 0x40, 0x00, 0x80];
/// let planar = s16le_to_planar(&bytes, 2);
/// assert_eq!(planar, vec![vec![0.5], vec![-1.0]]);
/// ```
pub fn s16le_to_planar(bytes: &[u8], channels: usize) -> Vec<Vec<f32>> {
    if channels == 0 {
        return Vec::new();
    }

    let frame_bytes = 2 * channels;
    let frames = bytes.len() / frame_bytes;
    let mut out = vec![Vec::with_capacity(frames); channels];

    for frame in bytes.chunks_exact(frame_bytes) {
        for (ch, sample) in out.iter_mut().zip(frame.chunks_exact(2)) {
            ch.push(f32::from(i16::from_le_bytes([sample[0], sample[1]])) / 32768.0);
        }
    }
    out
}

// ---------------------------------------------------------------------------
// MockResampler  (test-only)
// ---------------------------------------------------------------------------

/// Pass-through resampler that records the ratios it was given.
#[cfg(test)]
#[derive(Default)]
pub struct MockResampler {
    pub ratios: std::sync::Arc<std::sync::Mutex<Vec<f64>>>,
    pub fail: std::sync::Arc<std::sync::atomic::AtomicBool>,
}

#[cfg(test)]
impl Resampler for MockResampler {
    fn set_ratio(&mut self, ratio: f64) -> Result<(), ResampleError> {
        self.ratios.lock().unwrap().push(ratio);
        Ok(())
    }

    fn process(&mut self, input: &[f32]) -> Result<Vec<f32>, ResampleError> {
        if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(ResampleError::ChannelCount {
                expected: 0,
                got: 0,
            });
        }
        Ok(input.to_vec())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // ---- s16le_to_planar ---------------------------------------------------

    #[test]
    fn planar_split_deinterleaves() {
        let samples: [i16; 6] = [1, -1, 2, -2, 3, -3];
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        let planar = s16le_to_planar(&bytes, 2);

        assert_eq!(planar.len(), 2);
        assert_eq!(planar[0], vec![1.0 / 32768.0, 2.0 / 32768.0, 3.0 / 32768.0]);
        assert_eq!(planar[1], vec![-1.0 / 32768.0, -2.0 / 32768.0, -3.0 / 32768.0]);
    }

    #[test]
    fn planar_split_ignores_partial_frame() {
        let planar = s16le_to_planar(&[0, 0, 0, 0, 0x01], 2);
        assert_eq!(planar[0].len(), 1);
        assert_eq!(planar[1].len(), 1);
    }

    #[test]
    fn planar_split_full_scale() {
        let bytes: Vec<u8> = [i16::MAX, i16::MIN]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();
        let planar = s16le_to_planar(&bytes, 2);
        assert!(planar[0][0] < 1.0);
        assert_eq!(planar[1][0], -1.0);
    }

    // ---- SincResampler -----------------------------------------------------

    #[test]
    fn sinc_buffers_until_a_full_chunk() {
        let mut r = SincResampler::new(48_000, 48_000, 128).unwrap();

        let out = r.process(&[0.0; 100]).unwrap();
        assert!(out.is_empty());
        assert_eq!(r.pending(), 100);

        let out = r.process(&[0.0; 28]).unwrap();
        assert!(out.len() <= 130, "got {}", out.len());
        assert_eq!(r.pending(), 0);
    }

    #[test]
    fn sinc_accepts_small_ratio_changes() {
        let mut r = SincResampler::new(48_000, 48_000, 128).unwrap();
        assert!(r.set_ratio(1.0 + 5e-4).is_ok());
        assert!(r.set_ratio(1.0 - 5e-4).is_ok());
    }

    #[test]
    fn sinc_rejects_ratio_outside_bounds() {
        let mut r = SincResampler::new(48_000, 48_000, 128).unwrap();
        assert!(matches!(r.set_ratio(2.0), Err(ResampleError::Process(_))));
    }

    #[test]
    fn sinc_output_tracks_input_length() {
        let mut r = SincResampler::new(48_000, 48_000, 256).unwrap();
        let mut total = 0;
        for _ in 0..20 {
            total += r.process(&[0.25; 256]).unwrap().len();
        }
        // Filter delay may hold back up to one chunk at the start.
        assert!(total > 18 * 256 && total <= 20 * 256 + 4, "got {total}");
    }

    #[test]
    fn ratio_above_one_produces_more_output() {
        let run = |ratio: f64| {
            let mut r = SincResampler::new(48_000, 48_000, 256).unwrap();
            r.set_ratio(ratio).unwrap();
            (0..40).map(|_| r.process(&[0.25; 256]).unwrap().len()).sum::<usize>()
        };

        let fast = run(1.05);
        let slow = run(0.95);
        // 10% of 40 * 256 input frames, less one chunk for filter delay.
        assert!(fast > slow + 768, "fast {fast}, slow {slow}");
        assert!(slow < 40 * 256 && fast > 40 * 256, "fast {fast}, slow {slow}");
    }

    // ---- ResamplerBank -----------------------------------------------------

    fn mock_bank(n: usize) -> (ResamplerBank, Vec<std::sync::Arc<std::sync::Mutex<Vec<f64>>>>) {
        let mocks: Vec<MockResampler> = (0..n).map(|_| MockResampler::default()).collect();
        let ratios = mocks.iter().map(|m| std::sync::Arc::clone(&m.ratios)).collect();
        let boxed = mocks
            .into_iter()
            .map(|m| Box::new(m) as Box<dyn Resampler>)
            .collect();
        (ResamplerBank::new(boxed), ratios)
    }

    #[test]
    fn bank_shares_one_ratio() {
        let (mut bank, ratios) = mock_bank(6);
        bank.set_ratio(1.0001).unwrap();

        assert_eq!(bank.ratio(), 1.0001);
        for r in ratios {
            assert_eq!(*r.lock().unwrap(), vec![1.0001]);
        }
    }

    #[test]
    fn bank_rejects_wrong_channel_count() {
        let (mut bank, _) = mock_bank(2);
        let input = vec![vec![0.0_f32; 4]; 3];
        assert!(matches!(
            bank.process_planar(&input),
            Err(ResampleError::ChannelCount { expected: 2, got: 3 })
        ));
    }

    #[test]
    fn bank_truncates_to_shortest_channel() {
        let (mut bank, _) = mock_bank(2);
        let input = vec![vec![1.0_f32; 5], vec![2.0_f32; 3]];
        let out = bank.process_planar(&input).unwrap();
        assert_eq!(out[0].len(), 3);
        assert_eq!(out[1], vec![2.0; 3]);
    }

    #[test]
    fn sinc_bank_builds_requested_channels() {
        let bank = ResamplerBank::sinc(6, 48_000, 256).unwrap();
        assert_eq!(bank.channel_count(), 6);
        assert_eq!(bank.ratio(), 1.0);
    }
}
