//! PCM / IEC 61937 stream classification.
//!
//! [`StreamClassifier`] runs every capture chunk through a
//! [`BurstDetector`], whatever the current mode, and switches pipelines with
//! a hysteresis of `detection_window` chunks:
//!
//! * any completed burst switches to [`StreamMode::Compressed`] at once;
//! * `detection_window` consecutive chunks without one fall back to
//!   [`StreamMode::Pcm`].
//!
//! Pipelines are reached through the [`SinkSet`] trait so the mode logic can
//! be tested without audio devices.  Transitions are the only place a
//! pipeline is opened or closed, and a pipeline is always closed before the
//! other one opens.

use thiserror::Error;

use super::state::StreamMode;
use crate::audio::{CaptureError, CaptureSource};
use crate::iec61937::{BurstDetector, DataType};
use crate::sink::SinkError;

// ---------------------------------------------------------------------------
// RouterError
// ---------------------------------------------------------------------------

/// Fatal router conditions.
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("failed to open {mode} pipeline: {source}")]
    OpenPipeline {
        mode: StreamMode,
        #[source]
        source: SinkError,
    },

    #[error("could not read sample chunk: {0}")]
    Capture(#[from] CaptureError),
}

// ---------------------------------------------------------------------------
// SinkSet
// ---------------------------------------------------------------------------

/// The two playback pipelines as seen by the classifier.
///
/// `process_*` are only called while the matching pipeline is open.
pub trait SinkSet {
    fn open_pcm(&mut self) -> Result<(), SinkError>;
    fn close_pcm(&mut self);
    /// Play one raw s16le capture chunk.
    fn process_pcm(&mut self, chunk: &[u8]);

    fn open_compressed(&mut self) -> Result<(), SinkError>;
    fn close_compressed(&mut self);
    /// Decode and play one AC-3 burst payload.
    fn process_burst(&mut self, payload: &[u8]);
}

// ---------------------------------------------------------------------------
// ChunkReport
// ---------------------------------------------------------------------------

/// What happened while processing one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkReport {
    /// Bursts completed inside this chunk, of any data type.
    pub bursts: usize,
    /// The detector reported lock at least once.
    pub locked: bool,
    /// Mode after the chunk.
    pub mode: StreamMode,
    /// The mode changed on this chunk.
    pub switched: bool,
}

/// Bursts reach the compressed pipeline only once it is open, and only when
/// they carry AC-3.
pub fn should_forward(mode: StreamMode, data_type: DataType) -> bool {
    mode == StreamMode::Compressed && data_type == DataType::AC3
}

// ---------------------------------------------------------------------------
// StreamClassifier
// ---------------------------------------------------------------------------

pub struct StreamClassifier<S> {
    detector: BurstDetector,
    mode: StreamMode,
    non_detect: usize,
    detection_window: usize,
    sinks: S,
}

impl<S: SinkSet> StreamClassifier<S> {
    pub fn new(sinks: S, detection_window: usize) -> Self {
        Self {
            detector: BurstDetector::new(),
            mode: StreamMode::Unknown,
            non_detect: 0,
            detection_window: detection_window.max(1),
            sinks,
        }
    }

    pub fn mode(&self) -> StreamMode {
        self.mode
    }

    /// Consecutive chunks seen without a completed burst.
    pub fn non_detect_count(&self) -> usize {
        self.non_detect
    }

    pub fn sinks(&self) -> &S {
        &self.sinks
    }

    /// Classify one chunk of s16le capture bytes and route it.
    ///
    /// # Errors
    ///
    /// [`RouterError::OpenPipeline`] when a mode switch could not open its
    /// pipeline.  The mode is left at [`StreamMode::Unknown`] in that case.
    pub fn process_chunk(&mut self, chunk: &[u8]) -> Result<ChunkReport, RouterError> {
        let (bursts, locked) = self.detect(chunk);
        let before = self.mode;

        match self.mode {
            StreamMode::Unknown => {
                if bursts > 0 {
                    log::info!("found an IEC 61937 stream");
                    self.enter_compressed()?;
                } else {
                    self.non_detect += 1;
                    if self.non_detect >= self.detection_window {
                        log::info!(
                            "received {} chunks without a single IEC 61937 data burst; assuming PCM",
                            self.detection_window
                        );
                        self.enter_pcm()?;
                    }
                }
            }
            StreamMode::Pcm => {
                if bursts > 0 {
                    log::info!("found IEC 61937 stream; switching from PCM");
                    self.sinks.close_pcm();
                    self.mode = StreamMode::Unknown;
                    self.enter_compressed()?;
                } else {
                    self.sinks.process_pcm(chunk);
                }
            }
            StreamMode::Compressed => {
                if bursts > 0 {
                    self.non_detect = 0;
                } else {
                    self.non_detect += 1;
                    if self.non_detect >= self.detection_window {
                        log::info!(
                            "received {} chunks without a single IEC 61937 data burst; switching to PCM",
                            self.detection_window
                        );
                        self.sinks.close_compressed();
                        self.mode = StreamMode::Unknown;
                        self.enter_pcm()?;
                    }
                }
            }
        }

        Ok(ChunkReport {
            bursts,
            locked,
            mode: self.mode,
            switched: self.mode != before,
        })
    }

    /// Close whichever pipeline is open and return to `Unknown`.
    pub fn shutdown(&mut self) {
        match self.mode {
            StreamMode::Pcm => self.sinks.close_pcm(),
            StreamMode::Compressed => self.sinks.close_compressed(),
            StreamMode::Unknown => {}
        }
        self.mode = StreamMode::Unknown;
        self.non_detect = 0;
        self.detector.reset();
    }

    /// Feed every word of `chunk` to the detector, forwarding bursts that
    /// pass [`should_forward`] for the mode at the start of the chunk.
    fn detect(&mut self, chunk: &[u8]) -> (usize, bool) {
        let mode = self.mode;
        let sinks = &mut self.sinks;
        let mut bursts = 0;
        let mut locked = false;

        for pair in chunk.chunks_exact(2) {
            // Sync words are big-endian; the capture is little-endian.
            let word = u16::from_be_bytes([pair[0], pair[1]]);
            locked |= self.detector.feed(word, |burst| {
                bursts += 1;
                if should_forward(mode, burst.data_type) {
                    sinks.process_burst(burst.payload);
                }
            });
        }
        (bursts, locked)
    }

    fn enter_compressed(&mut self) -> Result<(), RouterError> {
        self.non_detect = 0;
        self.sinks
            .open_compressed()
            .map_err(|source| RouterError::OpenPipeline {
                mode: StreamMode::Compressed,
                source,
            })?;
        self.mode = StreamMode::Compressed;
        Ok(())
    }

    fn enter_pcm(&mut self) -> Result<(), RouterError> {
        self.sinks
            .open_pcm()
            .map_err(|source| RouterError::OpenPipeline {
                mode: StreamMode::Pcm,
                source,
            })?;
        self.mode = StreamMode::Pcm;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

/// Read `chunk_bytes` chunks from `capture` and classify them until a read
/// or a pipeline open fails.  Closes the active pipeline before returning.
pub fn run<C, S>(
    capture: &mut C,
    classifier: &mut StreamClassifier<S>,
    chunk_bytes: usize,
) -> RouterError
where
    C: CaptureSource + ?Sized,
    S: SinkSet,
{
    let mut chunk = vec![0u8; chunk_bytes];

    let err = loop {
        if let Err(e) = capture.read(&mut chunk) {
            break RouterError::from(e);
        }
        if let Err(e) = classifier.process_chunk(&chunk) {
            break e;
        }
    };

    classifier.shutdown();
    err
}

// ---------------------------------------------------------------------------
// RecordingSinks  (test-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    OpenPcm,
    ClosePcm,
    Pcm(usize),
    OpenCompressed,
    CloseCompressed,
    Burst(Vec<u8>),
}

/// Records every call and tracks which pipeline is open.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct RecordingSinks {
    pub events: Vec<SinkEvent>,
    pub pcm_open: bool,
    pub compressed_open: bool,
    pub fail_compressed_open: bool,
}

#[cfg(test)]
impl RecordingSinks {
    pub fn opened(&self) -> Vec<&SinkEvent> {
        self.events
            .iter()
            .filter(|e| !matches!(e, SinkEvent::Pcm(_) | SinkEvent::Burst(_)))
            .collect()
    }

    pub fn bursts(&self) -> Vec<Vec<u8>> {
        self.events
            .iter()
            .filter_map(|e| match e {
                SinkEvent::Burst(p) => Some(p.clone()),
                _ => None,
            })
            .collect()
    }

    fn assert_exclusive(&self) {
        assert!(
            !(self.pcm_open && self.compressed_open),
            "both pipelines open at once"
        );
    }
}

#[cfg(test)]
impl SinkSet for RecordingSinks {
    fn open_pcm(&mut self) -> Result<(), SinkError> {
        self.events.push(SinkEvent::OpenPcm);
        self.pcm_open = true;
        self.assert_exclusive();
        Ok(())
    }

    fn close_pcm(&mut self) {
        assert!(self.pcm_open, "closing pcm pipeline that is not open");
        self.events.push(SinkEvent::ClosePcm);
        self.pcm_open = false;
    }

    fn process_pcm(&mut self, chunk: &[u8]) {
        assert!(self.pcm_open, "pcm chunk routed to a closed pipeline");
        self.events.push(SinkEvent::Pcm(chunk.len()));
    }

    fn open_compressed(&mut self) -> Result<(), SinkError> {
        if self.fail_compressed_open {
            return Err(SinkError::DrainerLost);
        }
        self.events.push(SinkEvent::OpenCompressed);
        self.compressed_open = true;
        self.assert_exclusive();
        Ok(())
    }

    fn close_compressed(&mut self) {
        assert!(self.compressed_open, "closing compressed pipeline that is not open");
        self.events.push(SinkEvent::CloseCompressed);
        self.compressed_open = false;
    }

    fn process_burst(&mut self, payload: &[u8]) {
        assert!(self.compressed_open, "burst routed to a closed pipeline");
        self.events.push(SinkEvent::Burst(payload.to_vec()));
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::ScriptedCapture;
    use crate::iec61937::{SYNC_WORD_A, SYNC_WORD_B};

    const WINDOW: usize = 8;
    const CHUNK_WORDS: usize = 256;

    /// Encode big-endian words as they appear in the s16le capture.
    fn to_capture_bytes(words: &[u16]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_be_bytes()).collect()
    }

    fn quiet_chunk() -> Vec<u8> {
        let words: Vec<u16> = (0..CHUNK_WORDS).map(|i| 0x1000 + i as u16).collect();
        to_capture_bytes(&words)
    }

    fn burst_chunk_with(data_type: u16, payload: &[u16]) -> Vec<u8> {
        let mut words = vec![0, 0, 0, 0, SYNC_WORD_A, SYNC_WORD_B, data_type];
        words.push((payload.len() * 16) as u16);
        words.extend_from_slice(payload);
        words.resize(CHUNK_WORDS, 0x2222);
        to_capture_bytes(&words)
    }

    fn burst_chunk() -> Vec<u8> {
        burst_chunk_with(0x0001, &[0x0B77, 0xABCD])
    }

    fn classifier() -> StreamClassifier<RecordingSinks> {
        StreamClassifier::new(RecordingSinks::default(), WINDOW)
    }

    // ---- Unknown -----------------------------------------------------------

    #[test]
    fn quiet_window_switches_to_pcm_exactly_once() {
        let mut c = classifier();

        for i in 1..WINDOW {
            let report = c.process_chunk(&quiet_chunk()).unwrap();
            assert_eq!(report.mode, StreamMode::Unknown);
            assert_eq!(c.non_detect_count(), i);
        }

        let report = c.process_chunk(&quiet_chunk()).unwrap();
        assert_eq!(report.mode, StreamMode::Pcm);
        assert!(report.switched);

        for _ in 0..3 * WINDOW {
            let report = c.process_chunk(&quiet_chunk()).unwrap();
            assert_eq!(report.mode, StreamMode::Pcm);
            assert!(!report.switched);
        }

        assert_eq!(c.sinks().opened(), vec![&SinkEvent::OpenPcm]);
    }

    #[test]
    fn chunk_that_decides_pcm_is_not_played() {
        let mut c = classifier();
        for _ in 0..WINDOW {
            c.process_chunk(&quiet_chunk()).unwrap();
        }
        assert_eq!(c.sinks().events, vec![SinkEvent::OpenPcm]);

        c.process_chunk(&quiet_chunk()).unwrap();
        assert_eq!(c.sinks().events[1], SinkEvent::Pcm(CHUNK_WORDS * 2));
    }

    #[test]
    fn burst_in_unknown_switches_on_that_chunk() {
        let mut c = classifier();
        for _ in 0..3 {
            c.process_chunk(&quiet_chunk()).unwrap();
        }
        assert_eq!(c.non_detect_count(), 3);

        let report = c.process_chunk(&burst_chunk()).unwrap();
        assert_eq!(report.mode, StreamMode::Compressed);
        assert_eq!(report.bursts, 1);
        assert!(report.locked);
        assert!(report.switched);
        assert_eq!(c.non_detect_count(), 0);

        // The detecting burst arrived before the pipeline was open.
        assert_eq!(c.sinks().events, vec![SinkEvent::OpenCompressed]);
    }

    #[test]
    fn end_to_end_window_minus_one_then_burst() {
        let mut capture = ScriptedCapture::new(
            std::iter::repeat_with(quiet_chunk)
                .take(WINDOW - 1)
                .chain([burst_chunk(), burst_chunk()]),
        );
        let mut c = classifier();
        let mut chunk = vec![0u8; CHUNK_WORDS * 2];

        for _ in 0..WINDOW - 1 {
            capture.read(&mut chunk).unwrap();
            assert_eq!(c.process_chunk(&chunk).unwrap().mode, StreamMode::Unknown);
        }

        capture.read(&mut chunk).unwrap();
        assert_eq!(c.process_chunk(&chunk).unwrap().mode, StreamMode::Compressed);

        capture.read(&mut chunk).unwrap();
        c.process_chunk(&chunk).unwrap();

        assert!(!c.sinks().events.contains(&SinkEvent::OpenPcm));
        assert_eq!(c.sinks().bursts(), vec![vec![0x0B, 0x77, 0xAB, 0xCD]]);
    }

    // ---- Pcm ---------------------------------------------------------------

    #[test]
    fn burst_in_pcm_closes_pcm_then_opens_compressed() {
        let mut c = classifier();
        for _ in 0..WINDOW + 2 {
            c.process_chunk(&quiet_chunk()).unwrap();
        }

        let report = c.process_chunk(&burst_chunk()).unwrap();
        assert_eq!(report.mode, StreamMode::Compressed);
        assert_eq!(c.non_detect_count(), 0);

        let opened = c.sinks().opened();
        assert_eq!(
            opened,
            vec![&SinkEvent::OpenPcm, &SinkEvent::ClosePcm, &SinkEvent::OpenCompressed]
        );
        // The bursting chunk is not played as PCM.
        let pcm_chunks = c
            .sinks()
            .events
            .iter()
            .filter(|e| matches!(e, SinkEvent::Pcm(_)))
            .count();
        assert_eq!(pcm_chunks, 2);
    }

    #[test]
    fn pcm_chunks_leave_counter_untouched() {
        let mut c = classifier();
        for _ in 0..WINDOW {
            c.process_chunk(&quiet_chunk()).unwrap();
        }
        let count = c.non_detect_count();
        for _ in 0..5 {
            c.process_chunk(&quiet_chunk()).unwrap();
        }
        assert_eq!(c.non_detect_count(), count);
    }

    // ---- Compressed --------------------------------------------------------

    #[test]
    fn bursts_are_forwarded_while_compressed() {
        let mut c = classifier();
        c.process_chunk(&burst_chunk()).unwrap();
        c.process_chunk(&burst_chunk_with(0x0001, &[0x1111])).unwrap();
        c.process_chunk(&burst_chunk_with(0x0001, &[0x2222, 0x3333])).unwrap();

        assert_eq!(
            c.sinks().bursts(),
            vec![vec![0x11, 0x11], vec![0x22, 0x22, 0x33, 0x33]]
        );
    }

    #[test]
    fn burst_resets_counter_in_compressed() {
        let mut c = classifier();
        c.process_chunk(&burst_chunk()).unwrap();
        for _ in 0..WINDOW - 1 {
            c.process_chunk(&quiet_chunk()).unwrap();
        }
        assert_eq!(c.non_detect_count(), WINDOW - 1);

        c.process_chunk(&burst_chunk()).unwrap();
        assert_eq!(c.non_detect_count(), 0);
        assert_eq!(c.mode(), StreamMode::Compressed);
    }

    #[test]
    fn quiet_window_in_compressed_switches_to_pcm() {
        let mut c = classifier();
        c.process_chunk(&burst_chunk()).unwrap();

        for _ in 0..WINDOW - 1 {
            assert_eq!(c.process_chunk(&quiet_chunk()).unwrap().mode, StreamMode::Compressed);
        }
        let report = c.process_chunk(&quiet_chunk()).unwrap();
        assert_eq!(report.mode, StreamMode::Pcm);
        assert!(report.switched);

        assert_eq!(
            c.sinks().opened(),
            vec![
                &SinkEvent::OpenCompressed,
                &SinkEvent::CloseCompressed,
                &SinkEvent::OpenPcm
            ]
        );
    }

    #[test]
    fn only_ac3_is_forwarded_and_only_when_compressed() {
        assert!(should_forward(StreamMode::Compressed, DataType::AC3));
        assert!(!should_forward(StreamMode::Compressed, DataType::PAUSE));
        assert!(!should_forward(StreamMode::Compressed, DataType(0x0B)));
        assert!(!should_forward(StreamMode::Unknown, DataType::AC3));
        assert!(!should_forward(StreamMode::Pcm, DataType::AC3));
    }

    #[test]
    fn burst_split_across_chunks_is_detected() {
        let mut c = classifier();
        let mut words = vec![0x3333; CHUNK_WORDS - 4];
        words.extend_from_slice(&[0, 0, 0, 0]);
        c.process_chunk(&to_capture_bytes(&words)).unwrap();
        assert_eq!(c.mode(), StreamMode::Unknown);

        let mut words = vec![SYNC_WORD_A, SYNC_WORD_B, 0x0001, 16, 0x0102];
        words.resize(CHUNK_WORDS, 0x3333);
        let report = c.process_chunk(&to_capture_bytes(&words)).unwrap();
        assert_eq!(report.bursts, 1);
        assert_eq!(report.mode, StreamMode::Compressed);
    }

    // ---- Errors / shutdown -------------------------------------------------

    #[test]
    fn failed_open_is_fatal_and_leaves_unknown() {
        let mut c = StreamClassifier::new(
            RecordingSinks {
                fail_compressed_open: true,
                ..RecordingSinks::default()
            },
            WINDOW,
        );
        let err = c.process_chunk(&burst_chunk()).unwrap_err();
        assert!(matches!(
            err,
            RouterError::OpenPipeline {
                mode: StreamMode::Compressed,
                ..
            }
        ));
        assert_eq!(c.mode(), StreamMode::Unknown);
    }

    #[test]
    fn shutdown_closes_active_pipeline() {
        let mut c = classifier();
        c.process_chunk(&burst_chunk()).unwrap();
        c.shutdown();

        assert_eq!(c.mode(), StreamMode::Unknown);
        assert!(!c.sinks().compressed_open);
        assert_eq!(c.sinks().events.last(), Some(&SinkEvent::CloseCompressed));
    }

    #[test]
    fn run_stops_on_capture_error_and_closes() {
        let chunks: Vec<Vec<u8>> = std::iter::repeat_with(quiet_chunk).take(WINDOW + 1).collect();
        let mut capture = ScriptedCapture::new(chunks);
        let mut c = classifier();

        let err = run(&mut capture, &mut c, CHUNK_WORDS * 2);

        assert!(matches!(err, RouterError::Capture(CaptureError::Disconnected)));
        assert_eq!(c.mode(), StreamMode::Unknown);
        assert_eq!(
            c.sinks().opened(),
            vec![&SinkEvent::OpenPcm, &SinkEvent::ClosePcm]
        );
    }
}
