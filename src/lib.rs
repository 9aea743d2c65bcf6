//! S/PDIF router: classifies a captured S/PDIF stream as linear PCM or
//! IEC 61937 compressed bursts and plays it through the matching
//! rate-adaptive pipeline.

pub mod audio;
pub mod config;
pub mod decode;
pub mod iec61937;
pub mod router;
pub mod sink;
