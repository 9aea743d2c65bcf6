//! Decoding of compressed burst payloads.
//!
//! The router does not decode AC-3 itself; [`ProcessDecoder`] delegates to
//! an external decoder process behind the [`BurstDecoder`] trait.

pub mod engine;
pub mod process;

pub use engine::{BurstDecoder, DecodeError, DecodedFrame};
pub use process::{default_ffmpeg_args, ProcessDecoder, AC3_FRAME_SAMPLES};

#[cfg(test)]
pub use engine::MockDecoder;
