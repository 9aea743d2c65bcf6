//! Top-level routing: classify the S/PDIF input and drive the matching
//! pipeline.
//!
//! ```text
//! CaptureSource::read ─▶ StreamClassifier::process_chunk
//!                          ├─ BurstDetector (every chunk, every mode)
//!                          ├─ Pcm        → SinkSet::process_pcm(chunk)
//!                          └─ Compressed → SinkSet::process_burst(payload)
//! ```

pub mod classifier;
pub mod sinks;
pub mod state;

pub use classifier::{run, should_forward, ChunkReport, RouterError, SinkSet, StreamClassifier};
pub use sinks::DeviceSinks;
pub use state::StreamMode;

#[cfg(test)]
pub use classifier::{RecordingSinks, SinkEvent};
