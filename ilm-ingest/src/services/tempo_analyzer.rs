//! Tempo analysis via external tools
//!
//! Converts the input to a mono 44.1 kHz WAV with ffmpeg (skipped for WAV
//! input), runs `aubio tempo` on it and parses the last number it prints.
//!
//! # Validation
//! - Raw estimate inside the tempo window (default 60-200): rounded and accepted
//! - Raw estimate in (0, min): treated as half-time and doubled; accepted only
//!   if the doubled value lands inside the window
//! - Anything else: undetermined (`Ok(None)`)
//!
//! The converted WAV is a `TempArtifact` and is deleted on every exit path.

use crate::config::AnalysisConfig;
use crate::error::IngestResult;
use crate::types::TempoEstimator;
use crate::utils::{CommandRunner, ProcessSpec, TempArtifact};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Sample rate of the analysis waveform
const ANALYSIS_SAMPLE_RATE: &str = "44100";

/// Suffix of the converted WAV, placed beside the input file
const TEMP_WAV_SUFFIX: &str = "_temp_bpm.wav";

/// Decimal number, optionally followed by `bpm`
static TEMPO_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(\d+\.?\d*)\s*(?:bpm)?").expect("valid tempo regex"));

/// Accepted tempo range and half-time handling
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TempoWindow {
    pub min_bpm: f64,
    pub max_bpm: f64,
    pub half_time_correction: bool,
}

impl Default for TempoWindow {
    fn default() -> Self {
        Self {
            min_bpm: 60.0,
            max_bpm: 200.0,
            half_time_correction: true,
        }
    }
}

impl TempoWindow {
    fn contains(&self, bpm: f64) -> bool {
        bpm >= self.min_bpm && bpm <= self.max_bpm
    }

    /// Validate a raw estimate
    pub fn accept(&self, raw: f64) -> Option<u32> {
        if !raw.is_finite() || raw <= 0.0 {
            return None;
        }
        if self.contains(raw) {
            return Some(raw.round() as u32);
        }
        if self.half_time_correction && raw < self.min_bpm {
            let doubled = raw * 2.0;
            if self.contains(doubled) {
                return Some(doubled.round() as u32);
            }
        }
        None
    }
}

impl From<&AnalysisConfig> for TempoWindow {
    fn from(config: &AnalysisConfig) -> Self {
        Self {
            min_bpm: config.min_bpm,
            max_bpm: config.max_bpm,
            half_time_correction: config.half_time_correction,
        }
    }
}

/// Last numeric token in the tool's combined output
pub fn parse_tempo_output(output: &str) -> Option<f64> {
    TEMPO_TOKEN
        .captures_iter(output)
        .filter_map(|caps| caps.get(1)?.as_str().parse::<f64>().ok())
        .last()
}

/// Path of the converted WAV for `input` (`/t/abc.mp3` → `/t/abc_temp_bpm.wav`)
pub fn temp_wav_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "track".to_string());
    input.with_file_name(format!("{}{}", stem, TEMP_WAV_SUFFIX))
}

fn is_wav(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("wav"))
        .unwrap_or(false)
}

/// Tempo analyzer backed by ffmpeg + aubio
pub struct TempoAnalyzer {
    runner: Arc<dyn CommandRunner>,
    ffmpeg: PathBuf,
    aubio: PathBuf,
    config: AnalysisConfig,
    window: TempoWindow,
}

impl TempoAnalyzer {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        ffmpeg: impl Into<PathBuf>,
        aubio: impl Into<PathBuf>,
        config: AnalysisConfig,
    ) -> Self {
        let window = TempoWindow::from(&config);
        Self {
            runner,
            ffmpeg: ffmpeg.into(),
            aubio: aubio.into(),
            config,
            window,
        }
    }

    /// Estimate the tempo of `path`
    ///
    /// # Errors
    /// Conversion or analysis process failures. An unparseable or
    /// out-of-window estimate is `Ok(None)`.
    pub async fn analyze(&self, path: &Path) -> IngestResult<Option<u32>> {
        let started = Instant::now();

        // Held until the end of this function; dropping it deletes the file
        let converted = if is_wav(path) {
            None
        } else {
            let artifact = TempArtifact::new(temp_wav_path(path));
            self.convert_to_wav(path, artifact.path()).await?;
            Some(artifact)
        };
        let waveform = converted.as_ref().map(TempArtifact::path).unwrap_or(path);

        let spec = ProcessSpec::new(&self.aubio)
            .arg("tempo")
            .arg(waveform.as_os_str())
            .timeout(self.config.analysis_timeout())
            .max_output_bytes(self.config.max_output_bytes);
        let output = self.runner.run(&spec).await?;

        let raw = parse_tempo_output(&output.combined());
        let bpm = raw.and_then(|raw| self.window.accept(raw));

        info!(
            file = %path.display(),
            raw = ?raw,
            bpm = ?bpm,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Tempo analysis complete"
        );

        drop(converted);
        Ok(bpm)
    }

    async fn convert_to_wav(&self, input: &Path, output: &Path) -> IngestResult<()> {
        debug!(input = %input.display(), output = %output.display(), "Converting to analysis WAV");

        let spec = ProcessSpec::new(&self.ffmpeg)
            .arg("-i")
            .arg(input.as_os_str())
            .args(["-ar", ANALYSIS_SAMPLE_RATE, "-ac", "1", "-f", "wav", "-y"])
            .arg(output.as_os_str())
            .timeout(self.config.conversion_timeout())
            .max_output_bytes(self.config.max_output_bytes);

        self.runner.run(&spec).await?;
        Ok(())
    }
}

#[async_trait]
impl TempoEstimator for TempoAnalyzer {
    async fn estimate_bpm(&self, path: &Path) -> IngestResult<Option<u32>> {
        self.analyze(path).await
    }
}
