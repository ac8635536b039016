//! Configuration for ilm-ingest
//!
//! Resolution priority: CLI argument → environment → TOML file → compiled defaults.
//! A missing TOML file is not an error.

use crate::error::{IngestError, IngestResult};
use ilm_common::config::{
    default_config_path, default_export_dir, load_toml_config, resolve_root_folder, LoggingConfig,
    ROOT_FOLDER_ENV,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Environment variable naming an explicit config file
pub const CONFIG_PATH_ENV: &str = "ILM_CONFIG";

/// Module name used for the default config file (`ingest.toml`)
pub const MODULE_NAME: &str = "ingest";

/// Install locations checked for the transcoder and tempo tool
const COMMON_TOOL_DIRS: &[&str] = &["/opt/homebrew/bin", "/usr/local/bin", "/usr/bin"];

/// Top-level ingest configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Data folder holding `tracks/` and `artwork/`
    pub root_folder: Option<PathBuf>,
    /// Where exports are written (default: the user's Downloads folder)
    pub export_dir: Option<PathBuf>,
    pub tools: ToolsConfig,
    pub analysis: AnalysisConfig,
    pub download: DownloadConfig,
    pub artwork: ArtworkConfig,
    pub export: ExportConfig,
    pub logging: LoggingConfig,
}

/// Explicit external tool locations
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub yt_dlp: Option<PathBuf>,
    pub ffmpeg: Option<PathBuf>,
    pub aubio: Option<PathBuf>,
}

/// Tempo analysis settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub conversion_timeout_secs: u64,
    pub analysis_timeout_secs: u64,
    pub max_output_bytes: usize,
    /// Lowest BPM accepted from signal analysis
    pub min_bpm: f64,
    /// Highest BPM accepted from signal analysis
    pub max_bpm: f64,
    /// Double sub-window estimates (beat trackers often report half-time)
    pub half_time_correction: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            conversion_timeout_secs: 60,
            analysis_timeout_secs: 120,
            max_output_bytes: 10 * 1024 * 1024,
            min_bpm: 60.0,
            max_bpm: 200.0,
            half_time_correction: true,
        }
    }
}

/// Remote metadata query and download settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    pub metadata_timeout_secs: u64,
    pub download_timeout_secs: u64,
    pub max_output_bytes: usize,
    /// Wait after the downloader exits before listing the output directory
    pub settle_delay_ms: u64,
    /// Last-resort discovery accepts files modified this recently
    pub recency_window_secs: u64,
    /// Retries for transient downloader failures (timeouts)
    pub retry_attempts: u32,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            metadata_timeout_secs: 120,
            download_timeout_secs: 900,
            max_output_bytes: 32 * 1024 * 1024,
            settle_delay_ms: 500,
            recency_window_secs: 30,
            retry_attempts: 1,
        }
    }
}

/// Artwork download settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtworkConfig {
    pub max_redirects: usize,
    pub request_timeout_secs: u64,
    /// Honor HTTP(S)_PROXY from the environment
    pub use_system_proxy: bool,
}

impl Default for ArtworkConfig {
    fn default() -> Self {
        Self {
            max_redirects: 5,
            request_timeout_secs: 30,
            use_system_proxy: true,
        }
    }
}

/// Export settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Batch archives are named `<prefix>(<n>).zip`
    pub archive_prefix: String,
    pub max_archive_probes: u32,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            archive_prefix: "ILOVEMUSIC".to_string(),
            max_archive_probes: 999,
        }
    }
}

/// Resolved tool paths
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolSet {
    pub yt_dlp: PathBuf,
    pub ffmpeg: PathBuf,
    pub aubio: PathBuf,
}

/// Resolved on-disk layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLayout {
    pub root: PathBuf,
    pub tracks_dir: PathBuf,
    pub artwork_dir: PathBuf,
    pub export_dir: PathBuf,
}

impl StorageLayout {
    pub fn under(root: impl Into<PathBuf>, export_dir: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            tracks_dir: root.join("tracks"),
            artwork_dir: root.join("artwork"),
            export_dir: export_dir.into(),
            root,
        }
    }

    /// Create `tracks/` and `artwork/` if missing
    pub fn ensure(&self) -> IngestResult<()> {
        ilm_common::config::ensure_directory(&self.tracks_dir)?;
        ilm_common::config::ensure_directory(&self.artwork_dir)?;
        Ok(())
    }
}

impl IngestConfig {
    /// Load from `explicit` path, else `$ILM_CONFIG`, else the platform default
    pub fn load(explicit: Option<&Path>) -> IngestResult<Self> {
        let path = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from))
            .or_else(|| default_config_path(MODULE_NAME));

        match path {
            Some(path) => {
                let config: IngestConfig = load_toml_config(&path)?;
                config.validate()?;
                Ok(config)
            }
            None => Ok(Self::default()),
        }
    }

    /// Reject settings the pipeline cannot work with
    pub fn validate(&self) -> IngestResult<()> {
        let a = &self.analysis;
        if !(a.min_bpm > 0.0 && a.min_bpm < a.max_bpm) {
            return Err(IngestError::Config(format!(
                "analysis.min_bpm ({}) must be positive and below analysis.max_bpm ({})",
                a.min_bpm, a.max_bpm
            )));
        }
        if self.export.archive_prefix.trim().is_empty() {
            return Err(IngestError::Config(
                "export.archive_prefix must not be empty".to_string(),
            ));
        }
        if self.export.max_archive_probes == 0 {
            return Err(IngestError::Config(
                "export.max_archive_probes must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Storage layout, with `cli_root` taking priority over env and TOML
    pub fn layout(&self, cli_root: Option<&Path>) -> StorageLayout {
        let root = resolve_root_folder(cli_root, ROOT_FOLDER_ENV, self.root_folder.as_deref());
        let export_dir = self.export_dir.clone().unwrap_or_else(default_export_dir);
        StorageLayout::under(root, export_dir)
    }
}

impl ToolsConfig {
    /// Resolve every tool to a concrete path or bare command name
    pub fn resolve(&self) -> ToolSet {
        let bundled = bundled_bin_dir();
        ToolSet {
            yt_dlp: locate_tool(self.yt_dlp.as_deref(), "yt-dlp", bundled.as_deref(), &[]),
            ffmpeg: locate_tool(
                self.ffmpeg.as_deref(),
                "ffmpeg",
                bundled.as_deref(),
                COMMON_TOOL_DIRS,
            ),
            aubio: locate_tool(
                self.aubio.as_deref(),
                "aubio",
                bundled.as_deref(),
                COMMON_TOOL_DIRS,
            ),
        }
    }
}

impl AnalysisConfig {
    pub fn conversion_timeout(&self) -> Duration {
        Duration::from_secs(self.conversion_timeout_secs)
    }

    pub fn analysis_timeout(&self) -> Duration {
        Duration::from_secs(self.analysis_timeout_secs)
    }
}

impl DownloadConfig {
    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_secs(self.metadata_timeout_secs)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn recency_window(&self) -> Duration {
        Duration::from_secs(self.recency_window_secs)
    }
}

/// `bin/` next to the running executable, where packaged builds ship tools
fn bundled_bin_dir() -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    let dir = exe.parent()?.join("bin");
    dir.is_dir().then_some(dir)
}

/// Explicit path → bundled `bin/` → common install dirs → bare name on PATH
fn locate_tool(
    explicit: Option<&Path>,
    name: &str,
    bundled: Option<&Path>,
    common_dirs: &[&str],
) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }

    let file_name = format!("{}{}", name, std::env::consts::EXE_SUFFIX);

    if let Some(dir) = bundled {
        let candidate = dir.join(&file_name);
        if candidate.is_file() {
            debug!(tool = name, path = %candidate.display(), "Using bundled tool");
            return candidate;
        }
    }

    for dir in common_dirs {
        let candidate = Path::new(dir).join(&file_name);
        if candidate.is_file() {
            debug!(tool = name, path = %candidate.display(), "Using installed tool");
            return candidate;
        }
    }

    PathBuf::from(file_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_match_pipeline_constants() {
        let config = IngestConfig::default();
        assert_eq!(config.analysis.conversion_timeout(), Duration::from_secs(60));
        assert_eq!(config.analysis.analysis_timeout(), Duration::from_secs(120));
        assert_eq!(config.analysis.min_bpm, 60.0);
        assert_eq!(config.analysis.max_bpm, 200.0);
        assert_eq!(config.artwork.max_redirects, 5);
        assert_eq!(config.export.archive_prefix, "ILOVEMUSIC");
        assert_eq!(config.download.settle_delay(), Duration::from_millis(500));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_explicit_tool_path_wins() {
        let tools = ToolsConfig {
            ffmpeg: Some(PathBuf::from("/custom/ffmpeg")),
            ..Default::default()
        };
        assert_eq!(tools.resolve().ffmpeg, PathBuf::from("/custom/ffmpeg"));
    }

    #[test]
    fn test_bundled_dir_checked_before_path() {
        let dir = TempDir::new().unwrap();
        let file_name = format!("aubio{}", std::env::consts::EXE_SUFFIX);
        std::fs::write(dir.path().join(&file_name), b"").unwrap();

        let found = locate_tool(None, "aubio", Some(dir.path()), &[]);
        assert_eq!(found, dir.path().join(file_name));
    }

    #[test]
    fn test_unresolved_tool_is_bare_name() {
        let found = locate_tool(None, "ilm-no-such-tool", None, &["/nonexistent"]);
        assert_eq!(
            found,
            PathBuf::from(format!("ilm-no-such-tool{}", std::env::consts::EXE_SUFFIX))
        );
    }

    #[test]
    fn test_invalid_tempo_window_rejected() {
        let mut config = IngestConfig::default();
        config.analysis.min_bpm = 220.0;
        assert!(matches!(config.validate(), Err(IngestError::Config(_))));
    }

    #[test]
    fn test_load_from_toml_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ingest.toml");
        std::fs::write(
            &path,
            "root_folder = \"/data/ilm\"\n\n[artwork]\nmax_redirects = 3\n\n[export]\narchive_prefix = \"MYMIX\"\n",
        )
        .unwrap();

        let config = IngestConfig::load(Some(&path)).unwrap();
        assert_eq!(config.root_folder, Some(PathBuf::from("/data/ilm")));
        assert_eq!(config.artwork.max_redirects, 3);
        assert_eq!(config.artwork.request_timeout_secs, 30);
        assert_eq!(config.export.archive_prefix, "MYMIX");
    }

    #[test]
    #[serial_test::serial]
    fn test_config_path_from_env() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "[download]\nsettle_delay_ms = 0\n").unwrap();

        std::env::set_var(CONFIG_PATH_ENV, &path);
        let config = IngestConfig::load(None);
        std::env::remove_var(CONFIG_PATH_ENV);

        assert_eq!(config.unwrap().download.settle_delay_ms, 0);
    }

    #[test]
    #[serial_test::serial]
    fn test_cli_root_beats_env_and_toml() {
        std::env::set_var(ROOT_FOLDER_ENV, "/tmp/ilm-env-root");
        let config = IngestConfig {
            root_folder: Some(PathBuf::from("/tmp/ilm-toml-root")),
            ..Default::default()
        };

        let from_cli = config.layout(Some(Path::new("/tmp/ilm-cli-root")));
        let from_env = config.layout(None);
        std::env::remove_var(ROOT_FOLDER_ENV);

        assert_eq!(from_cli.tracks_dir, PathBuf::from("/tmp/ilm-cli-root/tracks"));
        assert_eq!(from_env.root, PathBuf::from("/tmp/ilm-env-root"));
    }

    #[test]
    fn test_default_config_serializes_as_sample_file() {
        let text = toml::to_string_pretty(&IngestConfig::default()).unwrap();
        assert!(text.contains("[analysis]"));
        assert!(text.contains("archive_prefix = \"ILOVEMUSIC\""));

        let parsed: IngestConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.export.max_archive_probes, 999);
    }

    #[test]
    fn test_layout_under_root() {
        let layout = StorageLayout::under("/data/ilm", "/home/u/Downloads");
        assert_eq!(layout.tracks_dir, PathBuf::from("/data/ilm/tracks"));
        assert_eq!(layout.artwork_dir, PathBuf::from("/data/ilm/artwork"));
    }
}
