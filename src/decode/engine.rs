//! Compressed-payload decoder seam.
//!
//! # Overview
//!
//! [`BurstDecoder`] is the interface the compressed pipeline drives: one
//! [`send`](BurstDecoder::send) per AC-3 burst payload, then
//! [`receive`](BurstDecoder::receive) until it returns `None`.  Decoding may
//! lag input, so a `send` need not produce a frame right away.
//!
//! [`ProcessDecoder`](crate::decode::ProcessDecoder) is the production
//! implementation.  [`MockDecoder`] (available under `#[cfg(test)]`) returns
//! pre-configured frames so the pipeline can be tested without a decoder
//! binary.

use thiserror::Error;

// ---------------------------------------------------------------------------
// DecodeError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum DecodeError {
    /// Input is not accepted until queued output has been received.
    /// Non-fatal: the caller discards pending output and moves on.
    #[error("decoder output must be drained before new input is accepted")]
    NeedsDrain,

    /// The payload could not be decoded.  Non-fatal.
    #[error("corrupt payload: {0}")]
    Corrupt(String),

    #[error("failed to start decoder `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("decoder is no longer accepting input")]
    Closed,

    #[error("decoder I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// DecodedFrame
// ---------------------------------------------------------------------------

/// One block of decoded audio, planar: `channels[c][i]` is sample `i` of
/// channel `c`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedFrame {
    pub channels: Vec<Vec<f32>>,
}

impl DecodedFrame {
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Samples per channel (shortest channel).
    pub fn frames(&self) -> usize {
        self.channels.iter().map(Vec::len).min().unwrap_or(0)
    }

    /// Split interleaved samples into planar channels.  A trailing partial
    /// frame is ignored.
    pub fn from_interleaved(samples: &[f32], channels: usize) -> Self {
        if channels == 0 {
            return Self::default();
        }
        let frames = samples.len() / channels;
        let mut planar = vec![Vec::with_capacity(frames); channels];
        for frame in samples.chunks_exact(channels) {
            for (ch, &s) in planar.iter_mut().zip(frame) {
                ch.push(s);
            }
        }
        Self { channels: planar }
    }
}

// ---------------------------------------------------------------------------
// BurstDecoder trait
// ---------------------------------------------------------------------------

/// Send/receive interface for a compressed-audio decoder.
pub trait BurstDecoder: Send {
    /// Submit one complete burst payload.
    fn send(&mut self, payload: &[u8]) -> Result<(), DecodeError>;

    /// Take the next decoded frame, if one is ready.  Never blocks.
    fn receive(&mut self) -> Option<DecodedFrame>;

    /// Receive and throw away everything currently available.  Returns how
    /// many frames were discarded.
    fn discard_output(&mut self) -> usize {
        let mut discarded = 0;
        while self.receive().is_some() {
            discarded += 1;
        }
        discarded
    }
}

impl<D: BurstDecoder + ?Sized> BurstDecoder for Box<D> {
    fn send(&mut self, payload: &[u8]) -> Result<(), DecodeError> {
        (**self).send(payload)
    }

    fn receive(&mut self) -> Option<DecodedFrame> {
        (**self).receive()
    }
}

// Compile-time assertion: Box<dyn BurstDecoder> must be constructible.
const _: fn() = || {
    fn _assert_object_safe(_: Box<dyn BurstDecoder>) {}
};

// ---------------------------------------------------------------------------
// MockDecoder  (test-only)
// ---------------------------------------------------------------------------

/// Scripted decoder.
///
/// Each successful `send` queues a clone of `frame_per_send` (when set).
/// If `fail_next` holds an error, the next `send` returns it instead.
#[cfg(test)]
#[derive(Default)]
pub struct MockDecoder {
    pub frame_per_send: Option<DecodedFrame>,
    pub fail_next: Option<DecodeError>,
    pub output: std::collections::VecDeque<DecodedFrame>,
    pub sent: std::sync::Arc<std::sync::Mutex<Vec<Vec<u8>>>>,
}

#[cfg(test)]
impl MockDecoder {
    /// A decoder producing `frames` samples of `value` on `channels`
    /// channels for every payload.
    pub fn producing(channels: usize, frames: usize, value: f32) -> Self {
        Self {
            frame_per_send: Some(DecodedFrame {
                channels: vec![vec![value; frames]; channels],
            }),
            ..Self::default()
        }
    }
}

#[cfg(test)]
impl BurstDecoder for MockDecoder {
    fn send(&mut self, payload: &[u8]) -> Result<(), DecodeError> {
        self.sent.lock().unwrap().push(payload.to_vec());
        if let Some(err) = self.fail_next.take() {
            return Err(err);
        }
        if let Some(frame) = &self.frame_per_send {
            self.output.push_back(frame.clone());
        }
        Ok(())
    }

    fn receive(&mut self) -> Option<DecodedFrame> {
        self.output.pop_front()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
