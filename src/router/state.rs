//! Stream mode of the S/PDIF input.

// ---------------------------------------------------------------------------
// StreamMode
// ---------------------------------------------------------------------------

/// What the router currently believes the input carries.
///
/// ```text
/// Unknown ──burst──────────────────────────▶ Compressed
///         ──detection_window quiet chunks──▶ Pcm
/// Pcm     ──burst──────────────────────────▶ Compressed
/// Compressed ──detection_window quiet chunks──▶ Pcm
/// ```
///
/// Exactly one pipeline is open in `Pcm` and `Compressed`; none in
/// `Unknown`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StreamMode {
    /// Start-up: waiting for a burst or for the detection window to elapse.
    #[default]
    Unknown,
    /// Linear PCM; the PCM pipeline is open.
    Pcm,
    /// IEC 61937 bursts; the compressed pipeline is open.
    Compressed,
}

impl StreamMode {
    /// A short label for log lines.
    ///
    /// ```
    /// use spdif_router::router::StreamMode;
    ///
    /// assert_eq!(StreamMode::Unknown.label(), "unknown");
    /// assert_eq!(StreamMode::Compressed.label(), "IEC 61937");
    /// ```
    pub fn label(&self) -> &'static str {
        match self {
            StreamMode::Unknown => "unknown",
            StreamMode::Pcm => "PCM",
            StreamMode::Compressed => "IEC 61937",
        }
    }
}

impl std::fmt::Display for StreamMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_unknown() {
        assert_eq!(StreamMode::default(), StreamMode::Unknown);
    }

    #[test]
    fn display_uses_label() {
        assert_eq!(StreamMode::Pcm.to_string(), "PCM");
    }
}
