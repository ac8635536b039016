//! Records exchanged between the ingest pipeline and its host

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};

/// Title used when the remote source provides none
pub const UNKNOWN_TITLE: &str = "Unknown";

/// Artist used when the remote source provides neither uploader nor channel
pub const UNKNOWN_ARTIST: &str = "Unknown Artist";

/// A finished, locally stored track
///
/// Complete once `file_path` refers to an existing audio file. `bpm`, `key`
/// and `artwork_path` are optional enrichments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackRecord {
    /// Process-unique id (creation timestamp in milliseconds)
    pub id: i64,
    pub title: String,
    pub artist: String,
    /// Duration in seconds as reported by the remote source
    pub duration: f64,
    /// `file://` URL of `file_path`
    pub url: String,
    /// Absolute path of the local audio file
    pub file_path: PathBuf,
    pub bpm: Option<u32>,
    pub key: Option<String>,
    /// Locally cached cover image
    pub artwork_path: Option<PathBuf>,
}

impl TrackRecord {
    /// Whether the audio file this record points at still exists
    pub fn file_exists(&self) -> bool {
        !self.file_path.as_os_str().is_empty() && self.file_path.is_file()
    }
}

/// Result of an export request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportOutcome {
    pub success: bool,
    pub path: PathBuf,
}

/// Monotonic millisecond-timestamp id source
///
/// Two records created within the same millisecond still get distinct ids.
#[derive(Debug, Default)]
pub struct TrackIdGenerator {
    last: AtomicI64,
}

impl TrackIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next id: the current time in ms, or one past the previous id if the clock has not advanced
    pub fn next_id(&self) -> i64 {
        let now = Utc::now().timestamp_millis();
        let mut prev = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = now.max(prev + 1);
            match self
                .last
                .compare_exchange_weak(prev, candidate, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return candidate,
                Err(actual) => prev = actual,
            }
        }
    }
}
