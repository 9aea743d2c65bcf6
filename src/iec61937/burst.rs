//! Per-sample IEC 61937 burst state machine.
//!
//! [`BurstDetector`] consumes one 16-bit word at a time and recognises the
//! burst preamble:
//!
//! ```text
//! 0x0000 0x0000 0x0000 0x0000 | Pa=0xF872 Pb=0x4E1F | Pc (data type) | Pd (length) | payload…
//! ```
//!
//! Words must already be in the big-endian convention the sync words are
//! defined against.  The capture stream is little-endian, so callers build
//! each word with `u16::from_be_bytes([lo, hi])` (a byte swap of the native
//! sample value).  [`crate::router::StreamClassifier`] does this.
//!
//! When a payload completes the `on_burst` closure passed to
//! [`BurstDetector::feed`] runs inline, before `feed` returns, and the
//! detector goes back to [`DetectorState::AwaitZero1`].

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// First burst sync word (Pa).
pub const SYNC_WORD_A: u16 = 0xF872;
/// Second burst sync word (Pb).
pub const SYNC_WORD_B: u16 = 0x4E1F;
/// Upper bound on a burst payload, in bytes.
pub const MAX_BURST_PAYLOAD: usize = 0x10000;

const DATA_TYPE_MASK: u16 = 0x7F;

// ---------------------------------------------------------------------------
// DataType
// ---------------------------------------------------------------------------

/// Burst data-type tag (low 7 bits of Pc).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DataType(pub u8);

impl DataType {
    /// AC-3 frames.  The only compressed type the router plays.
    pub const AC3: DataType = DataType(0x01);
    /// Pause bursts sent during gaps in a compressed stream.
    pub const PAUSE: DataType = DataType(0x03);
    /// Extended burst-info header; not supported.
    pub const EXTENDED: DataType = DataType(0x1F);

    /// Extract the tag from a Pc word.
    pub fn from_burst_info(word: u16) -> Self {
        DataType((word & DATA_TYPE_MASK) as u8)
    }

    /// Translate a Pd word into a payload byte count, or `None` when the
    /// length unit for this type is unknown.
    ///
    /// For AC-3 the field is a bit count; a trailing partial byte is padding.
    pub fn payload_bytes(self, length_word: u16) -> Option<usize> {
        match self {
            DataType::AC3 => Some(usize::from(length_word) / 8),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// DetectorState
// ---------------------------------------------------------------------------

/// Position of the detector inside the burst preamble.
///
/// Variants are ordered; every state after [`DetectorState::AwaitSync1`]
/// means both sync words have matched in the current attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum DetectorState {
    #[default]
    AwaitZero1,
    AwaitZero2,
    AwaitZero3,
    AwaitZero4,
    AwaitSync0,
    AwaitSync1,
    DataType,
    Length,
    Payload,
}

// ---------------------------------------------------------------------------
// Burst
// ---------------------------------------------------------------------------

/// A complete burst, borrowed from the detector's payload buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Burst<'a> {
    pub data_type: DataType,
    pub payload: &'a [u8],
}

// ---------------------------------------------------------------------------
// BurstDetector
// ---------------------------------------------------------------------------

/// IEC 61937 burst extractor.
///
/// # Example
///
/// ```rust
/// use spdif_router::iec61937::{BurstDetector, DataType, SYNC_WORD_A, SYNC_WORD_B};
///
/// let mut detector = BurstDetector::new();
/// // 4 zero words, Pa, Pb, Pc = AC-3, Pd = 32 bits, then two payload words.
/// let words = [0, 0, 0, 0, SYNC_WORD_A, SYNC_WORD_B, 0x0001, 32, 0xDEAD, 0xBEEF];
///
/// let mut seen = Vec::new();
/// for w in words {
///     detector.feed(w, |burst| seen.push((burst.data_type, burst.payload.to_vec())));
/// }
/// assert_eq!(seen, vec![(DataType::AC3, vec![0xDE, 0xAD, 0xBE, 0xEF])]);
/// ```
#[derive(Debug)]
pub struct BurstDetector {
    state: DetectorState,
    data_type: DataType,
    payload_len: usize,
    payload: Vec<u8>,
}

impl BurstDetector {
    pub fn new() -> Self {
        Self {
            state: DetectorState::default(),
            data_type: DataType(0),
            payload_len: 0,
            payload: Vec::with_capacity(MAX_BURST_PAYLOAD),
        }
    }

    /// Drop any partial burst and wait for the next preamble.
    pub fn reset(&mut self) {
        self.state = DetectorState::default();
        self.payload_len = 0;
        self.payload.clear();
    }

    pub fn state(&self) -> DetectorState {
        self.state
    }

    /// `true` once both sync words have matched in the current attempt.
    pub fn is_locked(&self) -> bool {
        self.state > DetectorState::AwaitSync1
    }

    /// Advance the state machine by one word.
    ///
    /// `on_burst` is invoked synchronously when the final payload byte
    /// arrives.  Returns the lock signal after this word was processed.
    pub fn feed<F>(&mut self, word: u16, mut on_burst: F) -> bool
    where
        F: FnMut(Burst<'_>),
    {
        use DetectorState as S;

        self.state = match self.state {
            S::AwaitZero1 if word == 0 => S::AwaitZero2,
            S::AwaitZero1 => S::AwaitZero1,
            S::AwaitZero2 if word == 0 => S::AwaitZero3,
            S::AwaitZero3 if word == 0 => S::AwaitZero4,
            S::AwaitZero4 if word == 0 => S::AwaitSync0,
            S::AwaitZero2 | S::AwaitZero3 | S::AwaitZero4 => S::AwaitZero1,
            // Longer runs of silence before Pa are allowed.
            S::AwaitSync0 if word == 0 => S::AwaitSync0,
            S::AwaitSync0 if word == SYNC_WORD_A => S::AwaitSync1,
            S::AwaitSync0 => S::AwaitZero1,
            S::AwaitSync1 if word == SYNC_WORD_B => S::DataType,
            S::AwaitSync1 => S::AwaitZero1,
            S::DataType => {
                self.data_type = DataType::from_burst_info(word);
                if self.data_type == DataType::EXTENDED {
                    S::AwaitZero1
                } else {
                    S::Length
                }
            }
            S::Length => match self.data_type.payload_bytes(word) {
                Some(len) if len > 0 && len <= MAX_BURST_PAYLOAD => {
                    self.payload_len = len;
                    self.payload.clear();
                    S::Payload
                }
                _ => S::AwaitZero1,
            },
            S::Payload => {
                let [hi, lo] = word.to_be_bytes();
                self.payload.push(hi);
                if self.payload.len() < self.payload_len {
                    self.payload.push(lo);
                }

                if self.payload.len() == self.payload_len {
                    on_burst(Burst {
                        data_type: self.data_type,
                        payload: &self.payload,
                    });
                    self.payload.clear();
                    S::AwaitZero1
                } else {
                    S::Payload
                }
            }
        };

        self.is_locked()
    }
}

impl Default for BurstDetector {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
