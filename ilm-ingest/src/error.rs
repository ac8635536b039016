//! Error types for ilm-ingest
//!
//! Acquisition failures (metadata query, download, file location) abort
//! `add_track`. Enrichment failures (BPM/key, artwork, tag writing) are
//! logged by the resolver and never reach the caller.

use crate::utils::process::ProcessError;
use std::path::PathBuf;
use thiserror::Error;

/// Pipeline error type
#[derive(Debug, Error)]
pub enum IngestError {
    /// Remote metadata could not be queried or parsed (fatal)
    #[error("Failed to query track metadata: {reason}")]
    MetadataQueryFailure {
        reason: String,
        /// External tool that could not be started, if that was the cause
        missing_tool: Option<String>,
    },

    /// Audio extraction failed and could not be recovered by the raw-stream retry (fatal)
    #[error("Failed to download audio: {reason}")]
    AudioDownloadFailure {
        reason: String,
        missing_tool: Option<String>,
    },

    /// No file in the output directory could be attributed to the download (fatal)
    #[error("Downloaded file not found in {}. Files in directory: {}", .dir.display(), .listing.join(", "))]
    DownloadedFileNotFound { dir: PathBuf, listing: Vec<String> },

    /// Artwork could not be fetched
    #[error("Failed to download artwork: {0}")]
    ArtworkDownloadFailure(String),

    /// Artwork could not be embedded into the audio file
    #[error("Failed to embed artwork: {0}")]
    ArtworkEmbedFailure(String),

    /// Tags could not be written into the audio file
    #[error("Failed to write metadata: {0}")]
    MetadataWriteFailure(String),

    /// Embedded tags could not be read
    #[error("Failed to read file tags: {0}")]
    TagReadFailure(String),

    /// Export copy or archive failed (fatal)
    #[error("Export failed: {0}")]
    ExportIoFailure(String),

    /// External process error
    #[error(transparent)]
    Process(#[from] ProcessError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// ilm-common error
    #[error("Common error: {0}")]
    Common(#[from] ilm_common::Error),
}

impl IngestError {
    /// Metadata query failure caused by a process error
    pub fn metadata_query(err: &ProcessError) -> Self {
        IngestError::MetadataQueryFailure {
            reason: err.to_string(),
            missing_tool: err.missing_program().map(str::to_string),
        }
    }

    /// Audio download failure caused by a process error
    ///
    /// A transcoder complaint in the downloader's output also counts as a
    /// missing tool, since the raw-stream retry has already been exhausted.
    pub fn audio_download(err: &ProcessError, transcoder: &str) -> Self {
        let missing_tool = err.missing_program().map(str::to_string).or_else(|| {
            if err.mentions("ffmpeg") || err.mentions("ffprobe") {
                Some(transcoder.to_string())
            } else {
                None
            }
        });
        IngestError::AudioDownloadFailure {
            reason: err.to_string(),
            missing_tool,
        }
    }

    /// Whether this error aborts the operation it came from
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            IngestError::ArtworkDownloadFailure(_)
                | IngestError::ArtworkEmbedFailure(_)
                | IngestError::MetadataWriteFailure(_)
                | IngestError::TagReadFailure(_)
        )
    }

    /// Message suitable for showing to the end user
    pub fn user_message(&self) -> String {
        match self {
            IngestError::MetadataQueryFailure {
                missing_tool: Some(tool),
                ..
            }
            | IngestError::AudioDownloadFailure {
                missing_tool: Some(tool),
                ..
            } => format!(
                "Could not add the track: '{}' is not installed or could not be found. \
                 Install it and make sure it is on your PATH, or set its location in the [tools] config section.",
                tool
            ),
            IngestError::MetadataQueryFailure { .. } => {
                "Could not read track information. Check that the URL is correct and publicly accessible."
                    .to_string()
            }
            IngestError::AudioDownloadFailure { .. } => {
                "Could not download the track audio. Please try again later.".to_string()
            }
            IngestError::DownloadedFileNotFound { .. } => {
                "The download finished but the audio file could not be located.".to_string()
            }
            IngestError::ExportIoFailure(msg) => format!("Could not export tracks: {}", msg),
            IngestError::Common(ilm_common::Error::NotFound(what)) => format!("Not found: {}", what),
            other => other.to_string(),
        }
    }
}

/// Result type for pipeline operations
pub type IngestResult<T> = Result<T, IngestError>;
