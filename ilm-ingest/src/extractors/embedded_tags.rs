//! Embedded tag reader
//!
//! Reads BPM, key and comment fields from a downloaded audio file using the
//! `lofty` crate. Works across ID3v2, MP4 atoms, Vorbis comments and APE.

use crate::error::{IngestError, IngestResult};
use crate::types::{EmbeddedTagSource, EmbeddedTags};
use async_trait::async_trait;
use lofty::file::TaggedFileExt;
use lofty::probe::Probe;
use lofty::tag::{ItemKey, Tag};
use std::path::{Path, PathBuf};
use tracing::debug;

/// `EmbeddedTagSource` backed by lofty
#[derive(Debug, Default, Clone)]
pub struct LoftyTagReader;

impl LoftyTagReader {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EmbeddedTagSource for LoftyTagReader {
    async fn read_tags(&self, path: &Path) -> IngestResult<EmbeddedTags> {
        let path: PathBuf = path.to_path_buf();
        tokio::task::spawn_blocking(move || read_embedded_tags(&path))
            .await
            .map_err(|e| IngestError::TagReadFailure(format!("tag reader task failed: {}", e)))?
    }
}

/// Read tags synchronously
pub fn read_embedded_tags(path: &Path) -> IngestResult<EmbeddedTags> {
    let tagged_file = Probe::open(path)
        .map_err(|e| IngestError::TagReadFailure(format!("{}: {}", path.display(), e)))?
        .read()
        .map_err(|e| IngestError::TagReadFailure(format!("{}: {}", path.display(), e)))?;

    let Some(tag) = tagged_file.primary_tag().or_else(|| tagged_file.first_tag()) else {
        debug!(file = %path.display(), "No tags found in audio file");
        return Ok(EmbeddedTags::default());
    };

    let tags = EmbeddedTags {
        bpm: read_bpm(tag),
        key: read_key(tag),
        comments: tag
            .get_strings(&ItemKey::Comment)
            .map(str::to_string)
            .collect(),
    };

    debug!(
        file = %path.display(),
        bpm = ?tags.bpm,
        key = ?tags.key,
        comments = tags.comments.len(),
        "Read embedded tags"
    );

    Ok(tags)
}

fn read_bpm(tag: &Tag) -> Option<f64> {
    [ItemKey::Bpm, ItemKey::IntegerBpm]
        .iter()
        .filter_map(|key| tag.get_string(key))
        .find_map(|raw| raw.trim().parse::<f64>().ok())
        .filter(|bpm| bpm.is_finite() && *bpm > 0.0)
}

fn read_key(tag: &Tag) -> Option<String> {
    tag.get_string(&ItemKey::InitialKey)
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
}
