//! AC-3 decoding through a long-lived external decoder process.
//!
//! The decoder command (ffmpeg by default) reads raw AC-3 frames on stdin
//! and writes interleaved `f32le` PCM on stdout.  A reader thread cuts
//! stdout into [`DecodedFrame`]s of [`AC3_FRAME_SAMPLES`] samples per
//! channel and hands them over an mpsc channel, so
//! [`BurstDecoder::receive`] never blocks.
//!
//! ```text
//! send(payload) ──stdin──▶ decoder ──stdout──▶ "decoder-reader" ──mpsc──▶ receive()
//! ```

use std::io::{ErrorKind, Read, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;

use super::engine::{BurstDecoder, DecodeError, DecodedFrame};

/// Samples per channel in one AC-3 frame.
pub const AC3_FRAME_SAMPLES: usize = 1536;

/// Decoded frames allowed to pile up unreceived before `send` refuses input.
const MAX_BACKLOG: usize = 16;

/// ffmpeg arguments for low-latency AC-3 → 6-channel f32le at 48 kHz.
pub fn default_ffmpeg_args() -> Vec<String> {
    [
        "-hide_banner",
        "-loglevel",
        "error",
        "-fflags",
        "nobuffer",
        "-f",
        "ac3",
        "-i",
        "pipe:0",
        "-ac",
        "6",
        "-ar",
        "48000",
        "-f",
        "f32le",
        "-flush_packets",
        "1",
        "pipe:1",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

// ---------------------------------------------------------------------------
// ProcessDecoder
// ---------------------------------------------------------------------------

pub struct ProcessDecoder {
    command: String,
    child: Child,
    stdin: Option<ChildStdin>,
    frames: mpsc::Receiver<DecodedFrame>,
    backlog: Arc<AtomicUsize>,
    reader: Option<JoinHandle<()>>,
}

impl ProcessDecoder {
    /// Start `command args…` and the thread reading its output as
    /// `channels`-channel interleaved `f32le`.
    ///
    /// # Errors
    ///
    /// [`DecodeError::Spawn`] when the command cannot be started.
    pub fn spawn(command: &str, args: &[String], channels: usize) -> Result<Self, DecodeError> {
        let mut child = Command::new(command)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| DecodeError::Spawn {
                command: command.to_string(),
                source,
            })?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take().ok_or(DecodeError::Closed)?;

        let (tx, rx) = mpsc::channel();
        let backlog = Arc::new(AtomicUsize::new(0));
        let reader_backlog = Arc::clone(&backlog);

        let reader = std::thread::Builder::new()
            .name("decoder-reader".into())
            .spawn(move || read_frames(stdout, channels.max(1), tx, reader_backlog));

        let reader = match reader {
            Ok(handle) => handle,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(DecodeError::Io(e));
            }
        };

        log::info!("decoder started: {command} ({channels} ch)");

        Ok(Self {
            command: command.to_string(),
            child,
            stdin,
            frames: rx,
            backlog,
            reader: Some(reader),
        })
    }
}

impl BurstDecoder for ProcessDecoder {
    fn send(&mut self, payload: &[u8]) -> Result<(), DecodeError> {
        if self.backlog.load(Ordering::Acquire) >= MAX_BACKLOG {
            return Err(DecodeError::NeedsDrain);
        }

        let stdin = self.stdin.as_mut().ok_or(DecodeError::Closed)?;
        match stdin.write_all(payload).and_then(|()| stdin.flush()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::BrokenPipe => {
                self.stdin = None;
                Err(DecodeError::Closed)
            }
            Err(e) => Err(DecodeError::Io(e)),
        }
    }

    fn receive(&mut self) -> Option<DecodedFrame> {
        let frame = self.frames.try_recv().ok()?;
        self.backlog.fetch_sub(1, Ordering::AcqRel);
        Some(frame)
    }
}

impl Drop for ProcessDecoder {
    fn drop(&mut self) {
        // EOF on stdin lets the decoder flush and exit on its own.
        drop(self.stdin.take());
        let _ = self.child.kill();
        let _ = self.child.wait();

        if let Some(reader) = self.reader.take() {
            if reader.join().is_err() {
                log::error!("decoder reader thread panicked");
            }
        }
        log::debug!("decoder {} stopped", self.command);
    }
}

fn read_frames(
    mut stdout: ChildStdout,
    channels: usize,
    tx: mpsc::Sender<DecodedFrame>,
    backlog: Arc<AtomicUsize>,
) {
    let mut bytes = vec![0u8; AC3_FRAME_SAMPLES * channels * 4];

    loop {
        if let Err(e) = stdout.read_exact(&mut bytes) {
            if e.kind() != ErrorKind::UnexpectedEof {
                log::warn!("decoder output read failed: {e}");
            }
            break;
        }

        let samples: Vec<f32> = bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();

        backlog.fetch_add(1, Ordering::AcqRel);
        if tx.send(DecodedFrame::from_interleaved(&samples, channels)).is_err() {
            break;
        }
    }

    log::debug!("decoder output closed");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
