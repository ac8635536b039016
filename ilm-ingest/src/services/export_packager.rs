//! Export of already-acquired tracks
//!
//! One id: the audio file is copied to the export directory as
//! `"{title} - {artist}.mp3"`. Several ids: the files are packed into a
//! deflate (level 9) zip named `<prefix>(<n>).zip` with the first unused `n`.
//! Tracks whose file no longer exists are skipped when archiving.

use crate::config::ExportConfig;
use crate::error::{IngestError, IngestResult};
use crate::utils::temp_artifact::{sibling_with_suffix, TempArtifact};
use ilm_common::{Error as CommonError, ExportOutcome, TrackRecord};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use zip::write::FileOptions;
use zip::CompressionMethod;

/// Characters not allowed in exported file names
static UNSAFE_FILE_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[<>:"/\\|?*]"#).expect("valid file name regex"));

/// `"{title} - {artist}.mp3"` with unsafe characters replaced by `_`
pub fn export_file_name(record: &TrackRecord) -> String {
    let name = format!("{} - {}.mp3", record.title, record.artist);
    UNSAFE_FILE_CHARS.replace_all(&name, "_").into_owned()
}

/// First `<prefix>(n).zip` in `dir` that does not exist, for n in 1..=max_probes
pub fn next_archive_path(dir: &Path, prefix: &str, max_probes: u32) -> Option<PathBuf> {
    (1..=max_probes)
        .map(|n| dir.join(format!("{}({}).zip", prefix, n)))
        .find(|path| !path.exists())
}

/// Copies or archives tracks into the export directory
#[derive(Debug, Clone)]
pub struct ExportPackager {
    export_dir: PathBuf,
    config: ExportConfig,
}

impl ExportPackager {
    pub fn new(export_dir: impl Into<PathBuf>, config: ExportConfig) -> Self {
        Self {
            export_dir: export_dir.into(),
            config,
        }
    }

    /// Export the tracks named by `ids`, looked up in `records`
    pub async fn export(&self, ids: &[i64], records: &[TrackRecord]) -> IngestResult<ExportOutcome> {
        match ids {
            [] => Err(CommonError::InvalidInput("no tracks selected for export".to_string()).into()),
            [id] => self.export_single(*id, records).await,
            _ => self.export_archive(ids, records).await,
        }
    }

    async fn export_single(&self, id: i64, records: &[TrackRecord]) -> IngestResult<ExportOutcome> {
        let record = records
            .iter()
            .find(|r| r.id == id)
            .filter(|r| !r.file_path.as_os_str().is_empty())
            .ok_or_else(|| CommonError::NotFound(format!("track file for id {}", id)))?;

        tokio::fs::create_dir_all(&self.export_dir)
            .await
            .map_err(|e| export_failure("create export directory", &self.export_dir, e))?;

        let dest = self.export_dir.join(export_file_name(record));
        tokio::fs::copy(&record.file_path, &dest)
            .await
            .map_err(|e| export_failure("copy", &record.file_path, e))?;

        info!(id, file = %dest.display(), "Track exported");
        Ok(ExportOutcome {
            success: true,
            path: dest,
        })
    }

    async fn export_archive(&self, ids: &[i64], records: &[TrackRecord]) -> IngestResult<ExportOutcome> {
        let entries = archive_entries(ids, records);
        if entries.is_empty() {
            warn!(requested = ids.len(), "None of the selected tracks have a file; archive will be empty");
        }

        tokio::fs::create_dir_all(&self.export_dir)
            .await
            .map_err(|e| export_failure("create export directory", &self.export_dir, e))?;

        let zip_path = next_archive_path(
            &self.export_dir,
            &self.config.archive_prefix,
            self.config.max_archive_probes,
        )
        .ok_or_else(|| {
            IngestError::ExportIoFailure(format!(
                "no free archive name in {} after {} attempts",
                self.export_dir.display(),
                self.config.max_archive_probes
            ))
        })?;

        let target = zip_path.clone();
        let count = entries.len();
        tokio::task::spawn_blocking(move || write_archive(&target, &entries))
            .await
            .map_err(|e| IngestError::ExportIoFailure(format!("archive task failed: {}", e)))??;

        info!(
            requested = ids.len(),
            entries = count,
            file = %zip_path.display(),
            "Archive exported"
        );
        Ok(ExportOutcome {
            success: true,
            path: zip_path,
        })
    }
}

/// `(source file, entry name)` for every requested track whose file exists
fn archive_entries(ids: &[i64], records: &[TrackRecord]) -> Vec<(PathBuf, String)> {
    let mut used = HashSet::new();
    let mut entries = Vec::new();

    for id in ids {
        let Some(record) = records.iter().find(|r| r.id == *id) else {
            warn!(id, "Track not in library, skipping");
            continue;
        };
        if !record.file_exists() {
            warn!(id, file = %record.file_path.display(), "Track file missing, skipping");
            continue;
        }
        entries.push((record.file_path.clone(), unique_name(export_file_name(record), &mut used)));
    }

    entries
}

/// `name`, or `name` with ` (2)`, ` (3)`... before the extension if already used
fn unique_name(name: String, used: &mut HashSet<String>) -> String {
    if used.insert(name.clone()) {
        return name;
    }
    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) => (stem.to_string(), format!(".{}", ext)),
        None => (name.clone(), String::new()),
    };
    let mut n = 2;
    loop {
        let candidate = format!("{} ({}){}", stem, n, ext);
        if used.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

/// Write the zip to a `.part` file, then move it into place
fn write_archive(target: &Path, entries: &[(PathBuf, String)]) -> IngestResult<()> {
    let staging = TempArtifact::new(sibling_with_suffix(target, ".part"));
    let file = File::create(staging.path()).map_err(|e| export_failure("create", staging.path(), e))?;

    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(9));

    let mut zip = zip::ZipWriter::new(file);
    for (source, name) in entries {
        zip.start_file(name.as_str(), options)
            .map_err(|e| IngestError::ExportIoFailure(format!("{}: {}", name, e)))?;
        let mut input = File::open(source).map_err(|e| export_failure("open", source, e))?;
        io::copy(&mut input, &mut zip).map_err(|e| export_failure("archive", source, e))?;
    }
    zip.finish()
        .map_err(|e| IngestError::ExportIoFailure(format!("finalize archive: {}", e)))?;

    staging
        .persist(target)
        .map_err(|e| export_failure("rename", target, e))
}

fn export_failure(action: &str, path: &Path, err: io::Error) -> IngestError {
    IngestError::ExportIoFailure(format!("{} {}: {}", action, path.display(), err))
}
