//! Artwork and metadata writer
//!
//! Two strategies, tried in order for the file's container format:
//! - `Remux`: ffmpeg stream copy into `<file>.tmp` with `-metadata` pairs and
//!   the artwork as an attached picture, renamed over the input file on success
//! - `DirectTagEdit`: ID3v2 edit in place with the `id3` crate (MP3 only)
//!
//! When every strategy fails an MP3 escalates the error; other formats are
//! left unchanged and report `WriteOutcome::Skipped`.

use crate::error::{IngestError, IngestResult};
use crate::types::MetadataBundle;
use crate::utils::temp_artifact::{sibling_with_suffix, TempArtifact};
use crate::utils::{CommandRunner, ProcessSpec};
use id3::TagLike;
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Timeout for a single remux
const REMUX_TIMEOUT: Duration = Duration::from_secs(120);

/// Audio container, derived from the file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerFormat {
    Mp3,
    M4a,
    Flac,
    Ogg,
    Opus,
    Webm,
    Wav,
    Aac,
    Mka,
}

impl ContainerFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        let format = match ext.as_str() {
            "mp3" => ContainerFormat::Mp3,
            "m4a" => ContainerFormat::M4a,
            "flac" => ContainerFormat::Flac,
            "ogg" => ContainerFormat::Ogg,
            "opus" => ContainerFormat::Opus,
            "webm" => ContainerFormat::Webm,
            "wav" => ContainerFormat::Wav,
            "aac" => ContainerFormat::Aac,
            "mka" => ContainerFormat::Mka,
            _ => return None,
        };
        Some(format)
    }

    /// ffmpeg muxer name (`-f`), needed because the staging file ends in `.tmp`
    pub fn muxer(self) -> &'static str {
        match self {
            ContainerFormat::Mp3 => "mp3",
            ContainerFormat::M4a => "ipod",
            ContainerFormat::Flac => "flac",
            ContainerFormat::Ogg | ContainerFormat::Opus => "ogg",
            ContainerFormat::Webm => "webm",
            ContainerFormat::Wav => "wav",
            ContainerFormat::Aac => "adts",
            ContainerFormat::Mka => "matroska",
        }
    }

    /// Whether the muxer can carry a cover image as an attached picture
    pub fn supports_attached_picture(self) -> bool {
        matches!(
            self,
            ContainerFormat::Mp3 | ContainerFormat::M4a | ContainerFormat::Flac
        )
    }

    /// Metadata key ffmpeg maps to the format's tempo field
    pub fn bpm_key(self) -> &'static str {
        match self {
            ContainerFormat::Mp3 => "TBPM",
            _ => "bpm",
        }
    }

    /// Strategies to try, in order
    pub fn strategies(self) -> &'static [WriteStrategy] {
        match self {
            ContainerFormat::Mp3 => &[WriteStrategy::Remux, WriteStrategy::DirectTagEdit],
            _ => &[WriteStrategy::Remux],
        }
    }
}

/// How tags reach the file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStrategy {
    Remux,
    DirectTagEdit,
}

impl fmt::Display for WriteStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteStrategy::Remux => f.write_str("remux"),
            WriteStrategy::DirectTagEdit => f.write_str("direct tag edit"),
        }
    }
}

/// Result of a write request that did not escalate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written(WriteStrategy),
    /// File left unchanged
    Skipped,
}

/// What is being written
#[derive(Debug, Clone, Copy)]
enum Payload<'a> {
    Metadata(&'a MetadataBundle),
    Artwork(&'a Path),
}

impl Payload<'_> {
    fn artwork(&self) -> Option<&Path> {
        let path = match self {
            Payload::Metadata(bundle) => bundle.artwork_path.as_deref(),
            Payload::Artwork(path) => Some(*path),
        };
        path.filter(|p| p.is_file())
    }

    fn failure(&self, reason: String) -> IngestError {
        match self {
            Payload::Metadata(_) => IngestError::MetadataWriteFailure(reason),
            Payload::Artwork(_) => IngestError::ArtworkEmbedFailure(reason),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Payload::Metadata(_) => "metadata",
            Payload::Artwork(_) => "artwork",
        }
    }
}

/// Writes tags and cover art into downloaded audio files
pub struct TagWriter {
    runner: Arc<dyn CommandRunner>,
    ffmpeg: PathBuf,
    timeout: Duration,
}

impl TagWriter {
    pub fn new(runner: Arc<dyn CommandRunner>, ffmpeg: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            ffmpeg: ffmpeg.into(),
            timeout: REMUX_TIMEOUT,
        }
    }

    /// Write title, artist, BPM, key and (optionally) artwork into `path`
    pub async fn write_metadata(
        &self,
        path: &Path,
        bundle: &MetadataBundle,
    ) -> IngestResult<WriteOutcome> {
        self.write(path, Payload::Metadata(bundle)).await
    }

    /// Attach `artwork` as the front cover of `path`
    pub async fn embed_artwork(&self, path: &Path, artwork: &Path) -> IngestResult<WriteOutcome> {
        if !artwork.is_file() {
            debug!(artwork = %artwork.display(), "Artwork file not found, skipping embed");
            return Ok(WriteOutcome::Skipped);
        }
        self.write(path, Payload::Artwork(artwork)).await
    }

    async fn write(&self, path: &Path, payload: Payload<'_>) -> IngestResult<WriteOutcome> {
        let Some(format) = ContainerFormat::from_path(path) else {
            warn!(file = %path.display(), what = payload.label(), "Unrecognized container, tags not written");
            return Ok(WriteOutcome::Skipped);
        };

        if matches!(payload, Payload::Artwork(_)) && !format.supports_attached_picture() {
            debug!(file = %path.display(), ?format, "Container cannot carry cover art");
            return Ok(WriteOutcome::Skipped);
        }

        let mut failures = Vec::new();
        for &strategy in format.strategies() {
            let attempt = match strategy {
                WriteStrategy::Remux => self.remux(path, format, payload).await,
                WriteStrategy::DirectTagEdit => direct_tag_edit(path, payload).await,
            };
            match attempt {
                Ok(()) => {
                    info!(
                        file = %path.display(),
                        what = payload.label(),
                        %strategy,
                        "Tags written"
                    );
                    return Ok(WriteOutcome::Written(strategy));
                }
                Err(e) => {
                    warn!(
                        file = %path.display(),
                        what = payload.label(),
                        %strategy,
                        error = %e,
                        "Tag write attempt failed"
                    );
                    failures.push(format!("{}: {}", strategy, e));
                }
            }
        }

        if format == ContainerFormat::Mp3 {
            return Err(payload.failure(failures.join("; ")));
        }

        warn!(
            file = %path.display(),
            what = payload.label(),
            "Leaving file unchanged"
        );
        Ok(WriteOutcome::Skipped)
    }

    async fn remux(
        &self,
        path: &Path,
        format: ContainerFormat,
        payload: Payload<'_>,
    ) -> IngestResult<()> {
        let staging = TempArtifact::new(sibling_with_suffix(path, ".tmp"));
        let args = remux_args(path, format, payload, staging.path());

        let spec = ProcessSpec::new(&self.ffmpeg)
            .args(args)
            .timeout(self.timeout);
        self.runner.run(&spec).await?;

        if !staging.path().is_file() {
            return Err(payload.failure("remux produced no output file".to_string()));
        }
        staging.persist(path)?;
        Ok(())
    }
}

/// ffmpeg arguments for a remux of `input` into `staging`
fn remux_args(
    input: &Path,
    format: ContainerFormat,
    payload: Payload<'_>,
    staging: &Path,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["-i".into(), input.into()];

    let artwork = payload.artwork().filter(|_| format.supports_attached_picture());
    if let Some(art) = artwork {
        args.push("-i".into());
        args.push(art.into());
        args.extend(
            ["-map", "0:a", "-map", "1", "-c", "copy", "-c:v", "mjpeg", "-disposition:v", "attached_pic"]
                .map(OsString::from),
        );
    } else {
        args.extend(["-c", "copy"].map(OsString::from));
    }

    if let Payload::Metadata(bundle) = payload {
        let mut metadata = |pair: String| {
            args.push("-metadata".into());
            args.push(pair.into());
        };
        metadata(format!("title={}", bundle.title));
        metadata(format!("artist={}", bundle.artist));
        if let Some(bpm) = bundle.bpm {
            metadata(format!("{}={}", format.bpm_key(), bpm));
        }
        if let Some(key) = &bundle.key {
            metadata(format!("initialkey={}", key));
            metadata(format!("comment=Key: {}", key));
        }
    }

    args.extend(["-f", format.muxer(), "-y"].map(OsString::from));
    args.push(staging.into());
    args
}

async fn direct_tag_edit(path: &Path, payload: Payload<'_>) -> IngestResult<()> {
    let path = path.to_path_buf();
    let artwork = payload.artwork().map(Path::to_path_buf);
    let metadata = match payload {
        Payload::Metadata(bundle) => Some(bundle.clone()),
        Payload::Artwork(_) => None,
    };

    let result = tokio::task::spawn_blocking(move || -> Result<(), String> {
        let cover = match &artwork {
            Some(art) => Some(std::fs::read(art).map_err(|e| e.to_string())?),
            None => None,
        };

        let mut tag = match &metadata {
            // Metadata writes replace the whole tag
            Some(bundle) => {
                let mut tag = id3::Tag::new();
                tag.set_title(bundle.title.as_str());
                tag.set_artist(bundle.artist.as_str());
                if let Some(bpm) = bundle.bpm {
                    tag.set_text("TBPM", bpm.to_string());
                }
                if let Some(key) = &bundle.key {
                    tag.set_text("TKEY", key.as_str());
                }
                tag
            }
            // Artwork-only writes keep existing frames
            None => read_id3_or_empty(&path)?,
        };

        if let Some(data) = cover {
            tag.remove_picture_by_type(id3::frame::PictureType::CoverFront);
            tag.add_frame(id3::frame::Picture {
                mime_type: image_mime_type(&data).to_string(),
                picture_type: id3::frame::PictureType::CoverFront,
                description: "Cover".to_string(),
                data,
            });
        }

        tag.write_to_path(&path, id3::Version::Id3v24)
            .map_err(|e| e.to_string())
    })
    .await
    .map_err(|e| payload.failure(format!("tag edit task failed: {}", e)))?;

    result.map_err(|reason| payload.failure(reason))
}

fn read_id3_or_empty(path: &Path) -> Result<id3::Tag, String> {
    match id3::Tag::read_from_path(path) {
        Ok(tag) => Ok(tag),
        Err(id3::Error {
            kind: id3::ErrorKind::NoTag,
            ..
        }) => Ok(id3::Tag::new()),
        Err(e) => Err(e.to_string()),
    }
}

/// MIME type of an image, by magic number (PNG, else JPEG)
pub fn image_mime_type(data: &[u8]) -> &'static str {
    if data.starts_with(&[0x89, 0x50, 0x4E, 0x47]) {
        "image/png"
    } else {
        "image/jpeg"
    }
}
