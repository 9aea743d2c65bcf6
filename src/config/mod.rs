//! Configuration for the S/PDIF router.
//!
//! Provides `RouterConfig` (top-level settings), per-sink `SinkConfig`,
//! `AppPaths` for the platform config directory, and TOML persistence via
//! `RouterConfig::load` / `RouterConfig::save`.

pub mod paths;
pub mod settings;

pub use paths::AppPaths;
pub use settings::{CaptureConfig, ConfigError, DecoderConfig, RouterConfig, SinkConfig};
