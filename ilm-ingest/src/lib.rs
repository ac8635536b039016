//! ilm-ingest library interface
//!
//! Track ingest pipeline: resolves a remote track URL into a locally stored,
//! tagged audio file, and exports finished tracks.
//!
//! Hosts drive the pipeline through [`IngestService`]:
//! - [`IngestService::add_track`] → `TrackRecord`
//! - [`IngestService::export_tracks`] → `ExportOutcome`

pub mod config;
pub mod error;
pub mod extractors;
pub mod services;
pub mod types;
pub mod utils;

pub use crate::config::{IngestConfig, StorageLayout, ToolSet};
pub use crate::error::{IngestError, IngestResult};

use crate::extractors::LoftyTagReader;
use crate::services::{ArtworkFetcher, ExportPackager, MetadataChain, TempoAnalyzer, TrackResolver};
use crate::utils::{CommandRunner, TokioCommandRunner};
use ilm_common::{ExportOutcome, TrackRecord};
use std::sync::Arc;
use tracing::info;

/// Build identification stamped by `build.rs`
pub mod build_info {
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");
    pub const GIT_HASH: &str = env!("ILM_GIT_HASH");
    pub const BUILD_TIMESTAMP: &str = env!("ILM_BUILD_TIMESTAMP");
    pub const BUILD_PROFILE: &str = env!("ILM_BUILD_PROFILE");
}

/// Host-facing entry point to the pipeline
///
/// Acquisitions sharing one tracks directory must not run concurrently;
/// see `services::track_resolver`.
pub struct IngestService {
    resolver: TrackResolver,
    packager: ExportPackager,
    layout: StorageLayout,
}

impl IngestService {
    /// Service running external tools with `tokio::process`
    pub fn new(config: &IngestConfig, layout: StorageLayout) -> IngestResult<Self> {
        Self::with_runner(config, layout, Arc::new(TokioCommandRunner::new()))
    }

    /// Service running external tools through `runner`
    pub fn with_runner(
        config: &IngestConfig,
        layout: StorageLayout,
        runner: Arc<dyn CommandRunner>,
    ) -> IngestResult<Self> {
        config.validate()?;
        let tools = config.tools.resolve();
        info!(
            yt_dlp = %tools.yt_dlp.display(),
            ffmpeg = %tools.ffmpeg.display(),
            aubio = %tools.aubio.display(),
            "External tools resolved"
        );

        let tempo = TempoAnalyzer::new(
            runner.clone(),
            tools.ffmpeg.clone(),
            tools.aubio.clone(),
            config.analysis.clone(),
        );
        let chain = MetadataChain::new()
            .with_tag_source(Arc::new(LoftyTagReader::new()))
            .with_tempo_estimator(Arc::new(tempo));

        let resolver = TrackResolver::new(
            runner,
            tools,
            config.download.clone(),
            layout.clone(),
            chain,
            ArtworkFetcher::new(&config.artwork)?,
        );
        let packager = ExportPackager::new(layout.export_dir.clone(), config.export.clone());

        Ok(Self {
            resolver,
            packager,
            layout,
        })
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    /// Download, enrich and tag the track at `url`
    pub async fn add_track(&self, url: &str) -> IngestResult<TrackRecord> {
        self.resolver.resolve(url).await
    }

    /// Copy one track or archive several into the export directory
    pub async fn export_tracks(
        &self,
        ids: &[i64],
        records: &[TrackRecord],
    ) -> IngestResult<ExportOutcome> {
        self.packager.export(ids, records).await
    }
}
