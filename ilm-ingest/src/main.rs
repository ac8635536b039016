//! ilm-ingest - track ingest command line
//!
//! Stands in for the host process: `add` acquires one track and prints its
//! `TrackRecord` as JSON, `export` copies or archives tracks from a JSON
//! record list and prints the `ExportOutcome`.
//!
//! Logs go to stderr so stdout stays machine-readable.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ilm_common::TrackRecord;
use ilm_ingest::build_info;
use ilm_ingest::{IngestConfig, IngestService};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Command-line arguments for ilm-ingest
#[derive(Parser, Debug)]
#[command(name = "ilm-ingest")]
#[command(about = "Download, analyze and tag tracks for DJ software")]
#[command(version)]
struct Args {
    /// Data folder holding tracks/ and artwork/ (overrides ILM_ROOT_FOLDER and the config file)
    #[arg(short, long)]
    root_folder: Option<PathBuf>,

    /// Config file (default: ILM_CONFIG, then <config dir>/ilovemusic/ingest.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Acquire a track and print its record
    Add {
        /// Track page URL
        url: String,
    },
    /// Export tracks from a saved record list
    Export {
        /// JSON file containing an array of track records
        #[arg(long)]
        records: PathBuf,

        /// Ids of the tracks to export
        #[arg(long, num_args = 1.., required = true)]
        ids: Vec<i64>,

        /// Export directory (default: config export_dir, then Downloads)
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = IngestConfig::load(args.config.as_deref())
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone())),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!(
        "Starting ilm-ingest v{} ({} {} {})",
        build_info::VERSION,
        build_info::GIT_HASH,
        build_info::BUILD_PROFILE,
        build_info::BUILD_TIMESTAMP
    );

    let mut layout = config.layout(args.root_folder.as_deref());
    if let Command::Export { out: Some(out), .. } = &args.command {
        layout.export_dir = out.clone();
    }
    info!("Root folder: {}", layout.root.display());

    let service = IngestService::new(&config, layout)
        .map_err(|e| anyhow::anyhow!("Failed to initialize pipeline: {}", e))?;

    match args.command {
        Command::Add { url } => {
            let record = service.add_track(&url).await.map_err(|e| {
                error!(error = %e, "Add failed");
                anyhow::anyhow!(e.user_message())
            })?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Command::Export { records, ids, .. } => {
            let text = std::fs::read_to_string(&records)
                .with_context(|| format!("Failed to read {}", records.display()))?;
            let library: Vec<TrackRecord> = serde_json::from_str(&text)
                .with_context(|| format!("Invalid track records in {}", records.display()))?;

            let outcome = service.export_tracks(&ids, &library).await.map_err(|e| {
                error!(error = %e, "Export failed");
                anyhow::anyhow!(e.user_message())
            })?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
    }

    Ok(())
}
