//! IEC 61937 compressed-audio burst parsing.
//!
//! An IEC 60958 (S/PDIF) link carries either linear PCM or compressed
//! frames wrapped in IEC 61937 bursts.  This module finds those bursts in a
//! stream of 16-bit words.
//!
//! ```text
//! capture chunk (s16le bytes) → byte swap → BurstDetector::feed → on_burst(Burst)
//! ```

pub mod burst;

pub use burst::{
    Burst, BurstDetector, DataType, DetectorState, MAX_BURST_PAYLOAD, SYNC_WORD_A, SYNC_WORD_B,
};
