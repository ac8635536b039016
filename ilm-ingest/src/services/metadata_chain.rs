//! Metadata fallback chain
//!
//! Resolves BPM and key from sources tried in fixed priority order:
//! 1. Platform tags (BPM and key patterns)
//! 2. Description (BPM and key patterns)
//! 3. Title (BPM pattern only)
//! 4. Embedded file tags (BPM, initial key, then comment scan for a bare key)
//! 5. Signal analysis (BPM only)
//!
//! A value set by an earlier source is never overwritten. The chain stops
//! as soon as both values are resolved. Failures of the file-based sources
//! are logged and leave the value unset.

use crate::extractors::text_patterns::{extract_bare_key, extract_bpm, extract_key};
use crate::types::{
    EmbeddedTagSource, MetadataSource, RemoteTrackInfo, ResolvedMetadata, SourcedValue,
    TempoEstimator,
};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Ordered BPM/key resolution
#[derive(Clone, Default)]
pub struct MetadataChain {
    tag_source: Option<Arc<dyn EmbeddedTagSource>>,
    tempo: Option<Arc<dyn TempoEstimator>>,
}

impl MetadataChain {
    /// Chain with text sources only
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tag_source(mut self, source: Arc<dyn EmbeddedTagSource>) -> Self {
        self.tag_source = Some(source);
        self
    }

    pub fn with_tempo_estimator(mut self, estimator: Arc<dyn TempoEstimator>) -> Self {
        self.tempo = Some(estimator);
        self
    }

    /// Run every source in order against `info` and the downloaded `file`
    pub async fn resolve(&self, info: &RemoteTrackInfo, file: &Path) -> ResolvedMetadata {
        let mut resolved = resolve_from_text(info);

        if !resolved.is_complete() {
            if let Some(source) = &self.tag_source {
                apply_file_tags(&mut resolved, source.as_ref(), file).await;
            }
        }

        if resolved.bpm.is_none() {
            if let Some(estimator) = &self.tempo {
                match estimator.estimate_bpm(file).await {
                    Ok(Some(bpm)) => {
                        debug!(bpm, "BPM from signal analysis");
                        resolved.bpm = Some(SourcedValue::new(bpm, MetadataSource::SignalAnalysis));
                    }
                    Ok(None) => debug!(file = %file.display(), "Signal analysis undetermined"),
                    Err(e) => warn!(file = %file.display(), error = %e, "Signal analysis failed"),
                }
            }
        }

        info!(
            bpm = ?resolved.bpm_value(),
            bpm_source = ?resolved.bpm.as_ref().map(|v| v.source),
            key = ?resolved.key_value(),
            key_source = ?resolved.key.as_ref().map(|v| v.source),
            "Metadata resolved"
        );

        resolved
    }
}

/// Steps 1-3: platform tags, description, title
pub fn resolve_from_text(info: &RemoteTrackInfo) -> ResolvedMetadata {
    let mut resolved = ResolvedMetadata::default();

    for tag in info.tag_strings() {
        if resolved.is_complete() {
            break;
        }
        apply_text(&mut resolved, tag, MetadataSource::PlatformTags, true);
    }

    if let Some(description) = info.description.as_deref() {
        apply_text(&mut resolved, description, MetadataSource::Description, true);
    }

    if let Some(title) = info.title.as_deref() {
        apply_text(&mut resolved, title, MetadataSource::Title, false);
    }

    resolved
}

fn apply_text(resolved: &mut ResolvedMetadata, text: &str, source: MetadataSource, with_key: bool) {
    if resolved.bpm.is_none() {
        // Zero tempo counts as unset
        if let Some(bpm) = extract_bpm(text).filter(|b| *b > 0) {
            debug!(bpm, %source, "BPM found");
            resolved.bpm = Some(SourcedValue::new(bpm, source));
        }
    }
    if with_key && resolved.key.is_none() {
        if let Some(key) = extract_key(text) {
            debug!(key = %key, %source, "Key found");
            resolved.key = Some(SourcedValue::new(key, source));
        }
    }
}

async fn apply_file_tags(resolved: &mut ResolvedMetadata, source: &dyn EmbeddedTagSource, file: &Path) {
    let tags = match source.read_tags(file).await {
        Ok(tags) => tags,
        Err(e) => {
            warn!(file = %file.display(), error = %e, "Could not read embedded tags");
            return;
        }
    };

    if resolved.bpm.is_none() {
        if let Some(bpm) = tags.bpm.map(|b| b.round()).filter(|b| *b > 0.0 && *b <= u32::MAX as f64) {
            resolved.bpm = Some(SourcedValue::new(bpm as u32, MetadataSource::FileTags));
        }
    }

    if resolved.key.is_none() {
        let key = tags
            .key
            .clone()
            .or_else(|| tags.comments.iter().find_map(|c| extract_bare_key(c)));
        if let Some(key) = key {
            resolved.key = Some(SourcedValue::new(key, MetadataSource::FileTags));
        }
    }
}
