//! Playback sinks: rate-adaptive buffering between capture and playback.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────── RateAdaptiveBuffer ───────────────────────┐
//! │  Mutex { SampleRing, RateController, running, stats } + Condvar  │
//! │                                                                  │
//! │  enqueue() ── capture thread        drain thread ── device.write │
//! └──────────────────────────────────────────────────────────────────┘
//!        ▲                                      ▲
//!   PcmPipeline                          CompressedPipeline
//!   s16le → resample                     decode → resample ×6
//! ```
//!
//! At most one pipeline is open at a time; the router decides which.

pub mod buffer;
pub mod compressed;
pub mod controller;
pub mod pcm;
pub mod ring;

pub use buffer::{BufferParams, BufferStats, EnqueueOutcome, RateAdaptiveBuffer, SinkError};
pub use compressed::{ChannelLayout, CompressedPipeline};
pub use controller::RateController;
pub use pcm::PcmPipeline;
pub use ring::SampleRing;
