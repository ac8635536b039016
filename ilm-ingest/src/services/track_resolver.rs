//! Track resolver
//!
//! Top-level acquisition for one URL:
//! 1. Query remote metadata (`yt-dlp --dump-json --no-download`)
//! 2. Snapshot the tracks directory
//! 3. Download audio as MP3; if the failure mentions the transcoder, retry
//!    once for the best raw audio stream
//! 4. Locate the produced file (`DownloadJob::locate`)
//! 5. Enrich: BPM/key chain, artwork fetch + embed, tag write
//!
//! Steps 1-4 are fatal on failure. Every enrichment failure is logged and
//! leaves the corresponding field unset.
//!
//! # Concurrency
//! File discovery falls back to a before/after directory diff, which is
//! only reliable when one acquisition runs per output directory at a time.

use crate::config::{DownloadConfig, StorageLayout, ToolSet};
use crate::error::{IngestError, IngestResult};
use crate::services::artwork_fetcher::ArtworkFetcher;
use crate::services::metadata_chain::MetadataChain;
use crate::services::tag_writer::TagWriter;
use crate::types::{MetadataBundle, RemoteTrackInfo};
use crate::utils::{run_with_retry, CommandRunner, ProcessError, ProcessSpec};
use ilm_common::models::{TrackIdGenerator, TrackRecord};
use reqwest::Url;
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, error, info, warn};

/// Extensions accepted as downloaded audio, in lookup order
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "m4a", "opus", "ogg", "webm", "flac", "wav", "aac", "mka"];

/// `file://` URL for a local path, percent-encoded
///
/// Relative paths are resolved against the working directory first.
pub fn file_url(path: &Path) -> String {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };
    Url::from_file_path(&absolute)
        .map(String::from)
        .unwrap_or_else(|_| absolute.display().to_string())
}

/// Whether `name` ends in a recognized audio extension
pub fn is_audio_file_name(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| AUDIO_EXTENSIONS.iter().any(|a| ext.eq_ignore_ascii_case(a)))
        .unwrap_or(false)
}

/// File names in `dir` (empty if the directory does not exist)
pub fn snapshot_dir(dir: &Path) -> io::Result<HashSet<String>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(HashSet::new()),
        Err(e) => return Err(e),
    };

    let mut names = HashSet::new();
    for entry in entries {
        let entry = entry?;
        names.insert(entry.file_name().to_string_lossy().to_string());
    }
    Ok(names)
}

/// One audio download and the bookkeeping needed to find its output
#[derive(Debug, Clone)]
pub struct DownloadJob {
    pub url: String,
    pub remote_id: String,
    pub output_dir: PathBuf,
    /// Directory contents immediately before the downloader ran
    pub before: HashSet<String>,
    /// Set once `locate` succeeds
    pub resolved: Option<PathBuf>,
}

impl DownloadJob {
    /// Create the job and take the "before" snapshot
    pub fn start(url: &str, remote_id: &str, output_dir: &Path) -> io::Result<Self> {
        Ok(Self {
            url: url.to_string(),
            remote_id: remote_id.to_string(),
            output_dir: output_dir.to_path_buf(),
            before: snapshot_dir(output_dir)?,
            resolved: None,
        })
    }

    /// Downloader output template (`<dir>/{id}.%(ext)s`)
    pub fn output_template(&self) -> PathBuf {
        self.output_dir.join(format!("{}.%(ext)s", self.remote_id))
    }

    /// Find the file this job produced
    ///
    /// Order: `{id}.<ext>` by name; a new audio file in after∖before; an
    /// audio file whose name starts with the id; the newest audio file
    /// modified within `recency_window`.
    pub fn locate(&mut self, recency_window: Duration) -> IngestResult<PathBuf> {
        let after = snapshot_dir(&self.output_dir)?;

        let found = self
            .deterministic_name(&after)
            .or_else(|| self.new_since_snapshot(&after))
            .or_else(|| self.prefixed_by_id(&after))
            .or_else(|| self.most_recent(&after, recency_window));

        match found {
            Some(name) => {
                let path = self.output_dir.join(name);
                debug!(file = %path.display(), "Located downloaded file");
                self.resolved = Some(path.clone());
                Ok(path)
            }
            None => {
                let mut listing: Vec<String> = after.into_iter().collect();
                listing.sort();
                Err(IngestError::DownloadedFileNotFound {
                    dir: self.output_dir.clone(),
                    listing,
                })
            }
        }
    }

    fn deterministic_name(&self, after: &HashSet<String>) -> Option<String> {
        AUDIO_EXTENSIONS
            .iter()
            .map(|ext| format!("{}.{}", self.remote_id, ext))
            .find(|name| after.contains(name))
    }

    fn new_since_snapshot(&self, after: &HashSet<String>) -> Option<String> {
        let mut fresh: Vec<&String> = after
            .iter()
            .filter(|name| !self.before.contains(*name) && is_audio_file_name(name))
            .collect();
        fresh.sort();
        fresh.first().map(|name| name.to_string())
    }

    fn prefixed_by_id(&self, after: &HashSet<String>) -> Option<String> {
        if self.remote_id.is_empty() {
            return None;
        }
        let mut matches: Vec<&String> = after
            .iter()
            .filter(|name| name.starts_with(&self.remote_id) && is_audio_file_name(name))
            .collect();
        matches.sort();
        matches.first().map(|name| name.to_string())
    }

    fn most_recent(&self, after: &HashSet<String>, window: Duration) -> Option<String> {
        let now = SystemTime::now();
        after
            .iter()
            .filter(|name| is_audio_file_name(name))
            .filter_map(|name| {
                let modified = std::fs::metadata(self.output_dir.join(name))
                    .and_then(|m| m.modified())
                    .ok()?;
                Some((name, modified))
            })
            .filter(|(_, modified)| {
                now.duration_since(*modified)
                    .map(|age| age < window)
                    .unwrap_or(true)
            })
            .max_by_key(|(_, modified)| *modified)
            .map(|(name, _)| name.clone())
    }
}

/// Orchestrates acquisition and enrichment of a single track
pub struct TrackResolver {
    runner: Arc<dyn CommandRunner>,
    tools: ToolSet,
    config: DownloadConfig,
    layout: StorageLayout,
    chain: MetadataChain,
    artwork: ArtworkFetcher,
    writer: TagWriter,
    ids: TrackIdGenerator,
}

impl TrackResolver {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        tools: ToolSet,
        config: DownloadConfig,
        layout: StorageLayout,
        chain: MetadataChain,
        artwork: ArtworkFetcher,
    ) -> Self {
        let writer = TagWriter::new(runner.clone(), tools.ffmpeg.clone());
        Self {
            runner,
            tools,
            config,
            layout,
            chain,
            artwork,
            writer,
            ids: TrackIdGenerator::new(),
        }
    }

    /// Acquire `url` and return the finished record
    pub async fn resolve(&self, url: &str) -> IngestResult<TrackRecord> {
        let started = Instant::now();
        info!(url = %url, "Adding track");

        self.layout.ensure()?;

        let info = self.query_metadata(url).await?;
        let file_path = self.download_audio(url, &info).await?;
        let file_path = absolute_path(file_path);

        let metadata = self.chain.resolve(&info, &file_path).await;
        let artwork_path = self.fetch_and_embed_artwork(&info, &file_path).await;

        let bundle = MetadataBundle {
            title: info.display_title(),
            artist: info.display_artist(),
            bpm: metadata.bpm_value(),
            key: metadata.key_value(),
            artwork_path: artwork_path.clone(),
        };
        if let Err(e) = self.writer.write_metadata(&file_path, &bundle).await {
            warn!(file = %file_path.display(), error = %e, "Metadata not written");
        }

        let record = TrackRecord {
            id: self.ids.next_id(),
            title: bundle.title,
            artist: bundle.artist,
            duration: info.duration_secs(),
            url: file_url(&file_path),
            file_path,
            bpm: bundle.bpm,
            key: bundle.key,
            artwork_path,
        };

        info!(
            id = record.id,
            title = %record.title,
            bpm = ?record.bpm,
            key = ?record.key,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Track added"
        );

        Ok(record)
    }

    /// Step 1: remote metadata, no audio transfer
    pub async fn query_metadata(&self, url: &str) -> IngestResult<RemoteTrackInfo> {
        let spec = ProcessSpec::new(&self.tools.yt_dlp)
            .args(["--dump-json", "--no-download", url])
            .timeout(self.config.metadata_timeout())
            .max_output_bytes(self.config.max_output_bytes);

        let output = run_with_retry(self.runner.as_ref(), &spec, self.config.retry_attempts)
            .await
            .map_err(|e| {
                error!(url = %url, error = %e, "Metadata query failed");
                IngestError::metadata_query(&e)
            })?;

        let info = RemoteTrackInfo::from_json(&output.stdout).map_err(|e| {
            error!(url = %url, error = %e, "Metadata output is not valid JSON");
            IngestError::MetadataQueryFailure {
                reason: format!("invalid metadata JSON: {}", e),
                missing_tool: None,
            }
        })?;

        if info.id.trim().is_empty() {
            return Err(IngestError::MetadataQueryFailure {
                reason: "metadata has no track id".to_string(),
                missing_tool: None,
            });
        }

        debug!(id = %info.id, title = ?info.title, "Remote metadata received");
        Ok(info)
    }

    /// Steps 2-4: download and locate the audio file
    pub async fn download_audio(&self, url: &str, info: &RemoteTrackInfo) -> IngestResult<PathBuf> {
        let mut job = DownloadJob::start(url, &info.id, &self.layout.tracks_dir)?;
        let template = job.output_template();

        let primary = self
            .download_spec()
            .args(["-x", "--audio-format", "mp3", "--audio-quality", "0", "--prefer-ffmpeg"])
            .arg("-o")
            .arg(template.as_os_str())
            .arg(url);

        if let Err(err) = self.run_download(&primary).await {
            if !mentions_transcoder(&err) {
                error!(url = %url, error = %err, "Audio download failed");
                return Err(IngestError::audio_download(&err, &self.transcoder_name()));
            }

            warn!(url = %url, error = %err, "Transcoder unavailable, downloading best raw audio stream");
            let raw = self
                .download_spec()
                .args(["-x", "-f", "bestaudio"])
                .arg("-o")
                .arg(template.as_os_str())
                .arg(url);

            self.run_download(&raw).await.map_err(|e| {
                error!(url = %url, error = %e, "Raw audio download failed");
                IngestError::audio_download(&e, &self.transcoder_name())
            })?;
        }

        tokio::time::sleep(self.config.settle_delay()).await;

        job.locate(self.config.recency_window()).map_err(|e| {
            error!(url = %job.url, error = %e, "Downloaded file not found");
            e
        })
    }

    /// Step 5b: artwork to `<artwork_dir>/<remote id>.jpg`, then embed
    async fn fetch_and_embed_artwork(&self, info: &RemoteTrackInfo, file: &Path) -> Option<PathBuf> {
        let thumbnail = info.thumbnail_url()?;
        let target = self.layout.artwork_dir.join(format!("{}.jpg", info.id));

        if let Err(e) = self.artwork.fetch(thumbnail, &target).await {
            warn!(url = %thumbnail, error = %e, "Artwork not downloaded");
            return None;
        }

        if let Err(e) = self.writer.embed_artwork(file, &target).await {
            warn!(file = %file.display(), error = %e, "Artwork not embedded");
        }

        Some(target)
    }

    fn download_spec(&self) -> ProcessSpec {
        let spec = ProcessSpec::new(&self.tools.yt_dlp)
            .timeout(self.config.download_timeout())
            .max_output_bytes(self.config.max_output_bytes);

        // A resolved transcoder path is passed on; a bare name is left to PATH lookup
        if self.tools.ffmpeg.is_absolute() {
            if let Some(dir) = self.tools.ffmpeg.parent() {
                return spec.arg("--ffmpeg-location").arg(dir.as_os_str());
            }
        }
        spec
    }

    async fn run_download(&self, spec: &ProcessSpec) -> Result<(), ProcessError> {
        run_with_retry(self.runner.as_ref(), spec, self.config.retry_attempts)
            .await
            .map(|_| ())
    }

    fn transcoder_name(&self) -> String {
        self.tools
            .ffmpeg
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "ffmpeg".to_string())
    }
}

fn absolute_path(path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        return path;
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(_) => path,
    }
}

fn mentions_transcoder(err: &ProcessError) -> bool {
    err.mentions("ffmpeg") || err.mentions("ffprobe")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(dir: &Path, name: &str) {
        std::fs::write(dir.join(name), b"x").unwrap();
    }

    #[test]
    fn test_file_url_plain_path() {
        let path = std::env::temp_dir().join("abc.mp3");
        let url = file_url(&path);
        assert!(url.starts_with("file:///"));
        assert!(url.ends_with("/abc.mp3"));
    }

    #[test]
    fn test_file_url_reserved_characters() {
        let path = std::env::temp_dir()
            .join("Application Support")
            .join("a#1%20 ?.mp3");
        let url = file_url(&path);

        assert!(!url.contains(' '));
        let parsed = Url::parse(&url).unwrap();
        assert_eq!(parsed.fragment(), None);
        assert_eq!(parsed.query(), None);
        assert_eq!(parsed.to_file_path().unwrap(), path);
    }

    #[test]
    fn test_audio_extension_recognition() {
        assert!(is_audio_file_name("abc.mp3"));
        assert!(is_audio_file_name("abc.OPUS"));
        assert!(!is_audio_file_name("abc.mp3.part"));
        assert!(!is_audio_file_name("abc.jpg"));
    }

    #[test]
    fn test_deterministic_name_first() {
        let dir = TempDir::new().unwrap();
        let mut job = DownloadJob::start("u", "abc", dir.path()).unwrap();
        touch(dir.path(), "zzz.mp3");
        touch(dir.path(), "abc.m4a");

        let path = job.locate(Duration::from_secs(30)).unwrap();
        assert_eq!(path, dir.path().join("abc.m4a"));
        assert_eq!(job.resolved, Some(path));
    }

    #[test]
    fn test_new_file_from_diff() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "old.mp3");
        let mut job = DownloadJob::start("u", "abc", dir.path()).unwrap();
        touch(dir.path(), "Night Drive.opus");
        touch(dir.path(), "notes.txt");

        let path = job.locate(Duration::from_secs(30)).unwrap();
        assert_eq!(path, dir.path().join("Night Drive.opus"));
    }

    #[test]
    fn test_id_prefix_when_nothing_new() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "abc-remastered.flac");
        touch(dir.path(), "other.mp3");
        let mut job = DownloadJob::start("u", "abc", dir.path()).unwrap();

        let path = job.locate(Duration::from_secs(30)).unwrap();
        assert_eq!(path, dir.path().join("abc-remastered.flac"));
    }

    #[test]
    fn test_recent_file_fallback() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "other.mp3");
        let mut job = DownloadJob::start("u", "abc", dir.path()).unwrap();

        let path = job.locate(Duration::from_secs(30)).unwrap();
        assert_eq!(path, dir.path().join("other.mp3"));
    }

    #[test]
    fn test_not_found_lists_directory() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "abc.webm.part");
        let mut job = DownloadJob::start("u", "abc", dir.path()).unwrap();

        match job.locate(Duration::from_secs(30)) {
            Err(IngestError::DownloadedFileNotFound { listing, .. }) => {
                assert_eq!(listing, vec!["abc.webm.part".to_string()]);
            }
            other => panic!("expected DownloadedFileNotFound, got {:?}", other),
        }
        assert!(job.resolved.is_none());
    }

    #[test]
    fn test_output_template() {
        let job = DownloadJob::start("u", "abc", Path::new("/nonexistent/tracks")).unwrap();
        assert!(job.before.is_empty());
        assert_eq!(
            job.output_template(),
            PathBuf::from("/nonexistent/tracks/abc.%(ext)s")
        );
    }
}
