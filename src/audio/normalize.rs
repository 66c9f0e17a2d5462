//! # Waveform Normalization
//!
//! Converts arbitrary uploaded media into the canonical waveform the
//! recognition model expects (mono, 16kHz, filtered) by shelling out to
//! ffmpeg. The tool does all the real work; this module's job is argument
//! construction and turning a non-zero exit into a bounded, typed error.

use async_trait::async_trait;
use std::fmt;
use std::path::Path;
use tokio::process::Command;
use tracing::debug;

/// Upper bound on the diagnostic text carried by a normalization error.
/// ffmpeg can emit pages of stderr; callers only ever see the first part.
const MAX_DIAGNOSTIC_CHARS: usize = 800;

/// Error from the external normalization tool.
///
/// `diagnostic` is the tool's stderr (or the spawn error), truncated to
/// [`MAX_DIAGNOSTIC_CHARS`] characters.
#[derive(Debug)]
pub struct NormalizationError {
    pub diagnostic: String,
}

impl NormalizationError {
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self {
            diagnostic: truncate_diagnostic(raw.as_ref()),
        }
    }
}

impl fmt::Display for NormalizationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ffmpeg failed: {}", self.diagnostic)
    }
}

impl std::error::Error for NormalizationError {}

/// Capability that turns an input media file into a canonical waveform at
/// `output`. Implemented by the real ffmpeg wrapper and by test fakes.
#[async_trait]
pub trait Normalizer: Send + Sync {
    async fn normalize(
        &self,
        input: &Path,
        output: &Path,
        filter_graph: &str,
    ) -> Result<(), NormalizationError>;
}

/// The production normalizer: one ffmpeg invocation per request.
pub struct FfmpegNormalizer {
    program: String,
}

impl FfmpegNormalizer {
    pub fn new() -> Self {
        Self::with_program("ffmpeg")
    }

    /// Use a different executable. Exists for tests; the argument layout
    /// stays the same.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for FfmpegNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Normalizer for FfmpegNormalizer {
    /// Run `ffmpeg -y -i <input> -vn -ac 1 -ar 16000 -af <filter> <output>`.
    ///
    /// `-vn` strips any video stream, `-ac 1` downmixes to mono, `-ar
    /// 16000` resamples to the model's rate, and the filter graph applies
    /// the configured highpass/lowpass/gain chain. `-y` overwrites a stale
    /// output file if one exists.
    ///
    /// Success means the file exists at `output`; there is no other return
    /// value. A non-zero exit or a spawn failure becomes a
    /// [`NormalizationError`].
    async fn normalize(
        &self,
        input: &Path,
        output: &Path,
        filter_graph: &str,
    ) -> Result<(), NormalizationError> {
        debug!(
            input = %input.display(),
            output = %output.display(),
            filter = %filter_graph,
            "Normalizing upload to 16kHz mono wav"
        );

        let result = Command::new(&self.program)
            .arg("-y")
            .arg("-i")
            .arg(input)
            .arg("-vn")
            .arg("-ac")
            .arg("1")
            .arg("-ar")
            .arg("16000")
            .arg("-af")
            .arg(filter_graph)
            .arg(output)
            .output()
            .await
            .map_err(|e| NormalizationError::new(format!("failed to run {}: {}", self.program, e)))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(NormalizationError::new(stderr));
        }

        Ok(())
    }
}

/// Truncate tool output to the first [`MAX_DIAGNOSTIC_CHARS`] characters,
/// respecting char boundaries.
fn truncate_diagnostic(raw: &str) -> String {
    raw.chars().take(MAX_DIAGNOSTIC_CHARS).collect()
}
