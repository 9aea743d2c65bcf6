//! Linear PCM playback path.
//!
//! Each capture chunk is converted to planar `f32`, resampled with the ratio
//! from the previous enqueue, and queued with an identity channel map.

use super::buffer::{EnqueueOutcome, RateAdaptiveBuffer};
use crate::audio::{s16le_to_planar, ResamplerBank};

pub struct PcmPipeline {
    buffer: RateAdaptiveBuffer,
    resamplers: ResamplerBank,
    channel_map: Vec<usize>,
}

impl PcmPipeline {
    pub fn new(buffer: RateAdaptiveBuffer, resamplers: ResamplerBank) -> Self {
        let channels = buffer.params().channels;
        debug_assert_eq!(resamplers.channel_count(), channels);
        log::info!("pcm sink opened ({channels} ch)");
        Self {
            buffer,
            resamplers,
            channel_map: (0..channels).collect(),
        }
    }

    /// Play one raw s16le capture chunk.
    ///
    /// Returns `None` when the resampler failed; the chunk is skipped and the
    /// previous ratio stays in effect.
    pub fn process(&mut self, chunk: &[u8]) -> Option<EnqueueOutcome> {
        let planar = s16le_to_planar(chunk, self.channel_map.len());

        let resampled = match self.resamplers.process_planar(&planar) {
            Ok(out) => out,
            Err(e) => {
                log::warn!("pcm sink rate converter error: {e}");
                return None;
            }
        };

        let outcome = self.buffer.enqueue(&resampled, &self.channel_map);
        if let Err(e) = self.resamplers.set_ratio(outcome.ratio) {
            log::warn!("pcm sink could not apply ratio {:.6}: {e}", outcome.ratio);
        }
        Some(outcome)
    }

    pub fn buffer(&self) -> &RateAdaptiveBuffer {
        &self.buffer
    }

    pub fn close(self) {
        self.buffer.close();
        log::info!("pcm sink closed");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::audio::{MockResampler, RecordingDevice, Resampler};
    use crate::sink::BufferParams;

    fn params() -> BufferParams {
        BufferParams {
            channels: 2,
            capacity: 2048,
            target: 128,
            gain: 4e-6,
            output_chunk: 1024,
            history_len: 4,
        }
    }

    struct Harness {
        pipeline: PcmPipeline,
        ratios: Vec<Arc<Mutex<Vec<f64>>>>,
        fail: Arc<std::sync::atomic::AtomicBool>,
    }

    fn harness() -> Harness {
        let device = RecordingDevice::default();
        let buffer = RateAdaptiveBuffer::open("pcm", params(), move || Ok(device)).unwrap();

        let fail = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let mocks: Vec<MockResampler> = (0..2)
            .map(|_| MockResampler {
                fail: Arc::clone(&fail),
                ..MockResampler::default()
            })
            .collect();
        let ratios = mocks.iter().map(|m| Arc::clone(&m.ratios)).collect();
        let bank = ResamplerBank::new(
            mocks
                .into_iter()
                .map(|m| Box::new(m) as Box<dyn Resampler>)
                .collect(),
        );

        Harness {
            pipeline: PcmPipeline::new(buffer, bank),
            ratios,
            fail,
        }
    }

    fn chunk(frames: usize, sample: i16) -> Vec<u8> {
        (0..frames * 2).flat_map(|_| sample.to_le_bytes()).collect()
    }

    #[test]
    fn chunk_is_queued_with_every_sample() {
        let mut h = harness();
        let outcome = h.pipeline.process(&chunk(128, 1000)).unwrap();

        assert!(outcome.queued);
        assert_eq!(h.pipeline.buffer().occupancy(), 128 + 256);
    }

    #[test]
    fn controller_ratio_is_fed_back_to_every_channel() {
        let mut h = harness();
        h.pipeline.process(&chunk(16, 0));
        let outcome = h.pipeline.process(&chunk(16, 0)).unwrap();

        // Second update sees 32 samples above target.
        assert!(outcome.ratio < 1.0);
        for r in &h.ratios {
            let seen = r.lock().unwrap();
            assert_eq!(seen.len(), 2);
            assert_eq!(seen[1], outcome.ratio);
        }
    }

    #[test]
    fn resampler_error_skips_chunk() {
        let mut h = harness();
        h.fail.store(true, Ordering::SeqCst);

        assert!(h.pipeline.process(&chunk(64, 5)).is_none());
        assert_eq!(h.pipeline.buffer().occupancy(), 128);
        assert!(h.ratios[0].lock().unwrap().is_empty());
    }

    #[test]
    fn overflow_drops_whole_chunk() {
        let mut h = harness();
        // 1000 frames * 2 = 2000 samples > 2047 - 128 free
        let outcome = h.pipeline.process(&chunk(1000, 5)).unwrap();
        assert!(!outcome.queued);
        assert_eq!(h.pipeline.buffer().stats().dropped, 1);
    }

    #[test]
    fn close_stops_draining() {
        let h = harness();
        h.pipeline.close();
    }
}
