//! Export Packager Tests
//!
//! Single-track copy and multi-track zip archives in the export directory.

mod helpers;

use helpers::{dir_listing, test_config, test_layout, ScriptedRunner};
use ilm_common::TrackRecord;
use ilm_ingest::config::ExportConfig;
use ilm_ingest::services::{file_url, ExportPackager};
use ilm_ingest::{IngestError, IngestService};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

fn track(id: i64, title: &str, artist: &str, file: PathBuf) -> TrackRecord {
    TrackRecord {
        id,
        title: title.to_string(),
        artist: artist.to_string(),
        duration: 180.0,
        url: file_url(&file),
        file_path: file,
        bpm: Some(120),
        key: None,
        artwork_path: None,
    }
}

fn audio(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}

fn entry_names(zip_path: &Path) -> Vec<String> {
    let file = std::fs::File::open(zip_path).unwrap();
    let archive = zip::ZipArchive::new(file).unwrap();
    let mut names: Vec<String> = archive.file_names().map(str::to_string).collect();
    names.sort();
    names
}

/// TC-EXP-001: One id copies the file under its display name
#[tokio::test]
async fn tc_exp_001_single_copy() {
    let root = TempDir::new().unwrap();
    let layout = test_layout(root.path());
    let file = audio(&layout.tracks_dir, "abc.mp3", b"audio-bytes");
    let records = vec![track(7, "Night/Drive", "DJ K", file.clone())];
    let service =
        IngestService::with_runner(&test_config(), layout.clone(), Arc::new(ScriptedRunner::new()))
            .unwrap();

    let outcome = service.export_tracks(&[7], &records).await.unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.path, layout.export_dir.join("Night_Drive - DJ K.mp3"));
    assert_eq!(std::fs::read(&outcome.path).unwrap(), b"audio-bytes");
    // Source left in place
    assert!(file.is_file());
}

/// TC-EXP-002: Several ids produce an archive, skipping missing files
#[tokio::test]
async fn tc_exp_002_archive_skips_missing() {
    let tracks = TempDir::new().unwrap();
    let exports = TempDir::new().unwrap();
    let records = vec![
        track(1, "One", "A", audio(tracks.path(), "one.mp3", b"first")),
        track(2, "Two", "B", tracks.path().join("deleted.mp3")),
        track(3, "Three", "C", audio(tracks.path(), "three.m4a", b"third")),
    ];
    let packager = ExportPackager::new(exports.path(), ExportConfig::default());

    let outcome = packager.export(&[1, 2, 3], &records).await.unwrap();

    assert_eq!(outcome.path, exports.path().join("ILOVEMUSIC(1).zip"));
    assert_eq!(entry_names(&outcome.path), vec!["One - A.mp3", "Three - C.mp3"]);

    let mut archive = zip::ZipArchive::new(std::fs::File::open(&outcome.path).unwrap()).unwrap();
    let mut entry = archive.by_name("Three - C.mp3").unwrap();
    assert_eq!(entry.compression(), zip::CompressionMethod::Deflated);
    let mut contents = Vec::new();
    entry.read_to_end(&mut contents).unwrap();
    assert_eq!(contents, b"third");

    // No staging file left next to the archive
    assert_eq!(dir_listing(exports.path()), vec!["ILOVEMUSIC(1).zip"]);
}

/// TC-EXP-003: Archive name takes the first unused sequence number
#[tokio::test]
async fn tc_exp_003_archive_numbering() {
    let tracks = TempDir::new().unwrap();
    let exports = TempDir::new().unwrap();
    for n in 1..=3 {
        std::fs::write(exports.path().join(format!("ILOVEMUSIC({}).zip", n)), b"old").unwrap();
    }
    let records = vec![
        track(1, "One", "A", audio(tracks.path(), "one.mp3", b"first")),
        track(2, "Two", "B", audio(tracks.path(), "two.mp3", b"second")),
    ];
    let packager = ExportPackager::new(exports.path(), ExportConfig::default());

    let outcome = packager.export(&[1, 2], &records).await.unwrap();

    assert_eq!(outcome.path, exports.path().join("ILOVEMUSIC(4).zip"));
    assert_eq!(
        std::fs::read(exports.path().join("ILOVEMUSIC(1).zip")).unwrap(),
        b"old"
    );
}

/// TC-EXP-004: Tracks with the same display name get distinct entries
#[tokio::test]
async fn tc_exp_004_duplicate_names() {
    let tracks = TempDir::new().unwrap();
    let exports = TempDir::new().unwrap();
    let records = vec![
        track(1, "Intro", "Unknown Artist", audio(tracks.path(), "a.mp3", b"a")),
        track(2, "Intro", "Unknown Artist", audio(tracks.path(), "b.mp3", b"b")),
    ];
    let packager = ExportPackager::new(exports.path(), ExportConfig::default());

    let outcome = packager.export(&[1, 2], &records).await.unwrap();

    assert_eq!(
        entry_names(&outcome.path),
        vec!["Intro - Unknown Artist (2).mp3", "Intro - Unknown Artist.mp3"]
    );
}

/// TC-EXP-005: Exhausted archive names fail instead of overwriting
#[tokio::test]
async fn tc_exp_005_archive_names_exhausted() {
    let tracks = TempDir::new().unwrap();
    let exports = TempDir::new().unwrap();
    for n in 1..=2 {
        std::fs::write(exports.path().join(format!("MIX({}).zip", n)), b"old").unwrap();
    }
    let records = vec![
        track(1, "One", "A", audio(tracks.path(), "one.mp3", b"first")),
        track(2, "Two", "B", audio(tracks.path(), "two.mp3", b"second")),
    ];
    let config = ExportConfig {
        archive_prefix: "MIX".to_string(),
        max_archive_probes: 2,
    };
    let packager = ExportPackager::new(exports.path(), config);

    let result = packager.export(&[1, 2], &records).await;

    assert!(matches!(result, Err(IngestError::ExportIoFailure(_))));
    assert_eq!(dir_listing(exports.path()), vec!["MIX(1).zip", "MIX(2).zip"]);
}

/// TC-EXP-006: Single export of a vanished file is an IO failure
#[tokio::test]
async fn tc_exp_006_single_missing_file() {
    let tracks = TempDir::new().unwrap();
    let exports = TempDir::new().unwrap();
    let records = vec![track(1, "Gone", "A", tracks.path().join("gone.mp3"))];
    let packager = ExportPackager::new(exports.path().join("nested"), ExportConfig::default());

    let result = packager.export(&[1], &records).await;

    assert!(matches!(result, Err(IngestError::ExportIoFailure(_))));
    assert!(dir_listing(&exports.path().join("nested")).is_empty());
}
