//! Compressed (AC-3) playback path.
//!
//! ```text
//! burst payload → BurstDecoder::send → receive()* → 6 × resample (shared ratio)
//!               → enqueue(layout map) → drain thread → device
//! ```
//!
//! A decoder asking for its output to be drained gets everything pending
//! discarded; decoding resumes with the next burst.  Frames with a channel
//! count other than the configured one are dropped.

use serde::{Deserialize, Serialize};

use super::buffer::RateAdaptiveBuffer;
use crate::audio::ResamplerBank;
use crate::decode::{BurstDecoder, DecodeError, DecodedFrame};

// ---------------------------------------------------------------------------
// ChannelLayout
// ---------------------------------------------------------------------------

/// Slot order of the 5.1 output device.
///
/// Decoded channels arrive as FL FR FC LFE SL SR.  cpal uses ALSA on Linux,
/// so that is the default there.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelLayout {
    /// FL FR FC LFE SL SR (WAVE / WASAPI / CoreAudio order).
    #[cfg_attr(not(target_os = "linux"), default)]
    Wave,
    /// FL FR RL RR FC LFE (ALSA order).
    #[cfg_attr(target_os = "linux", default)]
    Alsa,
}

impl ChannelLayout {
    /// `map[slot]` is the decoded channel written to device slot `slot`.
    pub fn channel_map(self) -> [usize; 6] {
        match self {
            ChannelLayout::Wave => [0, 1, 2, 3, 4, 5],
            ChannelLayout::Alsa => [0, 1, 4, 5, 2, 3],
        }
    }
}

// ---------------------------------------------------------------------------
// CompressedPipeline
// ---------------------------------------------------------------------------

pub struct CompressedPipeline {
    decoder: Box<dyn BurstDecoder>,
    resamplers: ResamplerBank,
    buffer: RateAdaptiveBuffer,
    channel_map: Vec<usize>,
}

impl CompressedPipeline {
    pub fn new(
        decoder: Box<dyn BurstDecoder>,
        resamplers: ResamplerBank,
        buffer: RateAdaptiveBuffer,
        layout: ChannelLayout,
    ) -> Self {
        debug_assert_eq!(buffer.params().channels, 6);
        debug_assert_eq!(resamplers.channel_count(), 6);
        log::info!("ac3 sink opened ({layout:?} layout)");
        Self {
            decoder,
            resamplers,
            buffer,
            channel_map: layout.channel_map().to_vec(),
        }
    }

    /// Decode one AC-3 burst payload and queue every frame it yields.
    ///
    /// Returns the number of decoded frames that made it into the buffer.
    pub fn process(&mut self, payload: &[u8]) -> usize {
        match self.decoder.send(payload) {
            Ok(()) => {}
            Err(DecodeError::NeedsDrain) => {
                let discarded = self.decoder.discard_output();
                log::warn!("decoder not accepting input, discarded {discarded} frames");
                return 0;
            }
            Err(e) => {
                log::warn!("error decoding AC3 frame: {e}");
                return 0;
            }
        }

        let mut queued = 0;
        while let Some(frame) = self.decoder.receive() {
            if self.queue_frame(&frame) {
                queued += 1;
            }
        }
        queued
    }

    fn queue_frame(&mut self, frame: &DecodedFrame) -> bool {
        if frame.channel_count() != self.channel_map.len() {
            log::warn!(
                "only 5.1 is supported right now (channels = {})",
                frame.channel_count()
            );
            return false;
        }

        let resampled = match self.resamplers.process_planar(&frame.channels) {
            Ok(out) => out,
            Err(e) => {
                log::warn!("ac3 sink rate converter error: {e}");
                return false;
            }
        };

        let outcome = self.buffer.enqueue(&resampled, &self.channel_map);
        if let Err(e) = self.resamplers.set_ratio(outcome.ratio) {
            log::warn!("ac3 sink could not apply ratio {:.6}: {e}", outcome.ratio);
        }
        outcome.queued
    }

    pub fn buffer(&self) -> &RateAdaptiveBuffer {
        &self.buffer
    }

    /// Stop the drain thread, then release the decoder.
    pub fn close(self) {
        let Self {
            decoder, buffer, ..
        } = self;
        buffer.close();
        drop(decoder);
        log::info!("ac3 sink closed");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
