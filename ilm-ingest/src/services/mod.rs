//! Pipeline services
//!
//! Control flow for `add_track`: `track_resolver` downloads, then calls
//! `metadata_chain` (which may call `tempo_analyzer`), `artwork_fetcher` and
//! `tag_writer`. `export_packager` runs independently over finished records.

pub mod artwork_fetcher;
pub mod export_packager;
pub mod metadata_chain;
pub mod tag_writer;
pub mod tempo_analyzer;
pub mod track_resolver;

pub use artwork_fetcher::ArtworkFetcher;
pub use export_packager::ExportPackager;
pub use metadata_chain::MetadataChain;
pub use tag_writer::{ContainerFormat, TagWriter, WriteOutcome, WriteStrategy};
pub use tempo_analyzer::{TempoAnalyzer, TempoWindow};
pub use track_resolver::{file_url, DownloadJob, TrackResolver};
