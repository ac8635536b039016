//! Core types and trait definitions for ilm-ingest
//!
//! - `RemoteTrackInfo`: the downloader's metadata dump for one URL
//! - `SourcedValue` / `MetadataSource`: BPM/key values with provenance
//! - `EmbeddedTagSource`, `TempoEstimator`: seams the fallback chain calls
//!   through, so tests can substitute canned sources
//! - `MetadataBundle`: everything the writer embeds into a file

use crate::error::IngestResult;
use ilm_common::models::{UNKNOWN_ARTIST, UNKNOWN_TITLE};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

// ============================================================================
// Remote metadata
// ============================================================================

/// Metadata returned by `yt-dlp --dump-json --no-download`
///
/// Only the fields the pipeline reads are modelled; everything else in the
/// dump is ignored.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RemoteTrackInfo {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub uploader: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub tags: Option<RemoteTags>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub thumbnail: Option<String>,
}

/// Platform tags: a list on most extractors, a bare string on some
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum RemoteTags {
    One(String),
    Many(Vec<serde_json::Value>),
}

impl RemoteTrackInfo {
    /// Parse a single JSON object from downloader output
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text.trim())
    }

    pub fn display_title(&self) -> String {
        non_empty(self.title.as_deref())
            .unwrap_or(UNKNOWN_TITLE)
            .to_string()
    }

    /// Uploader, else channel, else the unknown-artist placeholder
    pub fn display_artist(&self) -> String {
        non_empty(self.uploader.as_deref())
            .or_else(|| non_empty(self.channel.as_deref()))
            .unwrap_or(UNKNOWN_ARTIST)
            .to_string()
    }

    pub fn duration_secs(&self) -> f64 {
        self.duration.filter(|d| d.is_finite() && *d > 0.0).unwrap_or(0.0)
    }

    /// String-valued platform tags, in order
    pub fn tag_strings(&self) -> Vec<&str> {
        match &self.tags {
            None => Vec::new(),
            Some(RemoteTags::One(tag)) => vec![tag.as_str()],
            Some(RemoteTags::Many(values)) => values.iter().filter_map(|v| v.as_str()).collect(),
        }
    }

    pub fn thumbnail_url(&self) -> Option<&str> {
        non_empty(self.thumbnail.as_deref())
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

// ============================================================================
// Provenance
// ============================================================================

/// Where a BPM or key value came from, in chain priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MetadataSource {
    PlatformTags,
    Description,
    Title,
    FileTags,
    SignalAnalysis,
}

impl fmt::Display for MetadataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MetadataSource::PlatformTags => "platform tags",
            MetadataSource::Description => "description",
            MetadataSource::Title => "title",
            MetadataSource::FileTags => "file tags",
            MetadataSource::SignalAnalysis => "signal analysis",
        };
        f.write_str(name)
    }
}

/// A resolved value and the source that supplied it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcedValue<T> {
    pub value: T,
    pub source: MetadataSource,
}

impl<T> SourcedValue<T> {
    pub fn new(value: T, source: MetadataSource) -> Self {
        Self { value, source }
    }
}

/// Output of the metadata fallback chain
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedMetadata {
    pub bpm: Option<SourcedValue<u32>>,
    pub key: Option<SourcedValue<String>>,
}

impl ResolvedMetadata {
    pub fn is_complete(&self) -> bool {
        self.bpm.is_some() && self.key.is_some()
    }

    pub fn bpm_value(&self) -> Option<u32> {
        self.bpm.as_ref().map(|v| v.value)
    }

    pub fn key_value(&self) -> Option<String> {
        self.key.as_ref().map(|v| v.value.clone())
    }
}

// ============================================================================
// Enrichment seams
// ============================================================================

/// Tag fields read from an audio file's embedded metadata
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmbeddedTags {
    pub bpm: Option<f64>,
    /// Initial-key (or plain key) field
    pub key: Option<String>,
    pub comments: Vec<String>,
}

/// Reads embedded tags from a local audio file
#[async_trait::async_trait]
pub trait EmbeddedTagSource: Send + Sync {
    async fn read_tags(&self, path: &Path) -> IngestResult<EmbeddedTags>;
}

/// Estimates tempo from the audio signal
///
/// `Ok(None)` means the estimate was undetermined, which is not an error.
#[async_trait::async_trait]
pub trait TempoEstimator: Send + Sync {
    async fn estimate_bpm(&self, path: &Path) -> IngestResult<Option<u32>>;
}

// ============================================================================
// Writer input
// ============================================================================

/// Fields embedded into an audio file by the tag writer
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataBundle {
    pub title: String,
    pub artist: String,
    pub bpm: Option<u32>,
    pub key: Option<String>,
    pub artwork_path: Option<PathBuf>,
}
