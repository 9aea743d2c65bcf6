//! Real playback pipelines behind the [`SinkSet`] seam.
//!
//! Each open builds a fresh pipeline from [`RouterConfig`]: sinc resamplers,
//! a [`RateAdaptiveBuffer`] whose draining thread opens a [`CpalPlayback`],
//! and for the compressed path a [`ProcessDecoder`].  Closing drops all of
//! it, so pipelines can be reopened on the next mode switch.

use super::classifier::SinkSet;
use crate::audio::{playback_buffer_samples, CpalPlayback, ResamplerBank};
use crate::config::{RouterConfig, SinkConfig};
use crate::decode::ProcessDecoder;
use crate::sink::{CompressedPipeline, PcmPipeline, RateAdaptiveBuffer, SinkError};

pub struct DeviceSinks {
    config: RouterConfig,
    latency_us: Option<u32>,
    pcm: Option<PcmPipeline>,
    compressed: Option<CompressedPipeline>,
}

impl DeviceSinks {
    /// `latency_us` overrides the configured playback latency.
    pub fn new(config: RouterConfig, latency_us: Option<u32>) -> Self {
        let latency_us = latency_us.or(config.latency_us);
        Self {
            config,
            latency_us,
            pcm: None,
            compressed: None,
        }
    }

    pub fn pcm(&self) -> Option<&PcmPipeline> {
        self.pcm.as_ref()
    }

    pub fn compressed(&self) -> Option<&CompressedPipeline> {
        self.compressed.as_ref()
    }

    fn open_buffer(&self, name: &str, sink: &SinkConfig) -> Result<RateAdaptiveBuffer, SinkError> {
        let channels = u16::try_from(sink.channels)
            .map_err(|_| SinkError::InvalidParams(format!("{} channels", sink.channels)))?;
        let sample_rate = self.config.capture.sample_rate;
        let buffer_samples = playback_buffer_samples(
            self.latency_us.unwrap_or(0),
            sample_rate,
            channels,
            sink.device_buffer_samples,
        );
        let device_name = self.config.playback_device.clone();
        let chunk_samples = sink.output_chunk;

        RateAdaptiveBuffer::open(name, sink.buffer_params(), move || {
            CpalPlayback::open(
                device_name.as_deref(),
                sample_rate,
                channels,
                buffer_samples,
                chunk_samples,
            )
        })
    }

    fn resamplers(&self, sink: &SinkConfig) -> Result<ResamplerBank, SinkError> {
        Ok(ResamplerBank::sinc(
            sink.channels,
            self.config.capture.sample_rate,
            sink.resampler_chunk_frames,
        )?)
    }
}

impl SinkSet for DeviceSinks {
    fn open_pcm(&mut self) -> Result<(), SinkError> {
        let resamplers = self.resamplers(&self.config.pcm)?;
        let buffer = self.open_buffer("pcm", &self.config.pcm)?;
        self.pcm = Some(PcmPipeline::new(buffer, resamplers));
        Ok(())
    }

    fn close_pcm(&mut self) {
        if let Some(pipeline) = self.pcm.take() {
            pipeline.close();
        }
    }

    fn process_pcm(&mut self, chunk: &[u8]) {
        if let Some(pipeline) = self.pcm.as_mut() {
            pipeline.process(chunk);
        }
    }

    fn open_compressed(&mut self) -> Result<(), SinkError> {
        let decoder = &self.config.decoder;
        let decoder = ProcessDecoder::spawn(&decoder.command, &decoder.args, decoder.channels)?;
        let resamplers = self.resamplers(&self.config.compressed)?;
        let buffer = self.open_buffer("ac3", &self.config.compressed)?;

        self.compressed = Some(CompressedPipeline::new(
            Box::new(decoder),
            resamplers,
            buffer,
            self.config.layout,
        ));
        Ok(())
    }

    fn close_compressed(&mut self) {
        if let Some(pipeline) = self.compressed.take() {
            pipeline.close();
        }
    }

    fn process_burst(&mut self, payload: &[u8]) {
        if let Some(pipeline) = self.compressed.as_mut() {
            pipeline.process(payload);
        }
    }
}

impl Drop for DeviceSinks {
    fn drop(&mut self) {
        self.close_compressed();
        self.close_pcm();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
