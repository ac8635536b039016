//! Test Helper Utilities
//!
//! Shared utilities for testing ilm-ingest

#![allow(dead_code)]

pub mod http_fixture;
pub mod scripted_runner;

pub use http_fixture::{CannedHttpServer, CannedResponse};
pub use scripted_runner::{
    arg_after, copy_input_to_output, fail, ok, write_download, write_wav_output, ScriptedRunner,
};

use ilm_ingest::config::{IngestConfig, StorageLayout, ToolsConfig};
use std::path::{Path, PathBuf};

/// Config with bare tool names, no settle delay and no system proxy
pub fn test_config() -> IngestConfig {
    let mut config = IngestConfig {
        tools: ToolsConfig {
            yt_dlp: Some(PathBuf::from("yt-dlp")),
            ffmpeg: Some(PathBuf::from("ffmpeg")),
            aubio: Some(PathBuf::from("aubio")),
        },
        ..Default::default()
    };
    config.download.settle_delay_ms = 0;
    config.download.retry_attempts = 0;
    config.artwork.use_system_proxy = false;
    config
}

/// `tracks/`, `artwork/` and `exports/` under `root`
pub fn test_layout(root: &Path) -> StorageLayout {
    let layout = StorageLayout::under(root, root.join("exports"));
    layout.ensure().unwrap();
    layout
}

/// Names of the entries directly inside `dir`, sorted
pub fn dir_listing(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().to_string())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}
