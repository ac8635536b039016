//! Artwork download over HTTP(S)
//!
//! Redirects are followed by hand so relative `Location` headers resolve
//! against the current URL and the hop count stays bounded. The body is
//! streamed to a `.part` file that is renamed into place only after the
//! transfer completes; any failure leaves no file behind.

use crate::config::ArtworkConfig;
use crate::error::{IngestError, IngestResult};
use crate::utils::temp_artifact::{sibling_with_suffix, TempArtifact};
use reqwest::header::LOCATION;
use reqwest::{Client, Url};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// User agent sent with artwork requests
const USER_AGENT: &str = concat!("ilm-ingest/", env!("CARGO_PKG_VERSION"));

/// Downloads cover images
#[derive(Debug, Clone)]
pub struct ArtworkFetcher {
    http_client: Client,
    max_redirects: usize,
}

impl ArtworkFetcher {
    pub fn new(config: &ArtworkConfig) -> IngestResult<Self> {
        let mut builder = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(USER_AGENT);
        if !config.use_system_proxy {
            builder = builder.no_proxy();
        }

        let http_client = builder
            .build()
            .map_err(|e| IngestError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            max_redirects: config.max_redirects,
        })
    }

    /// Download `url` to `target`, replacing any existing file
    pub async fn fetch(&self, url: &str, target: &Path) -> IngestResult<()> {
        let mut current = Url::parse(url)
            .map_err(|e| IngestError::ArtworkDownloadFailure(format!("invalid URL {}: {}", url, e)))?;

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let staging = TempArtifact::new(sibling_with_suffix(target, ".part"));
        let mut redirects = 0usize;

        loop {
            debug!(url = %current, redirects, "Requesting artwork");

            let response = self
                .http_client
                .get(current.clone())
                .send()
                .await
                .map_err(|e| IngestError::ArtworkDownloadFailure(format!("request failed: {}", e)))?;

            let status = response.status();

            if status.is_redirection() {
                if redirects >= self.max_redirects {
                    return Err(IngestError::ArtworkDownloadFailure(format!(
                        "too many redirects (limit {})",
                        self.max_redirects
                    )));
                }
                let location = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| {
                        IngestError::ArtworkDownloadFailure(format!(
                            "HTTP {} without a Location header",
                            status.as_u16()
                        ))
                    })?;
                current = current.join(location).map_err(|e| {
                    IngestError::ArtworkDownloadFailure(format!(
                        "invalid redirect location {}: {}",
                        location, e
                    ))
                })?;
                redirects += 1;
                continue;
            }

            if !status.is_success() {
                return Err(IngestError::ArtworkDownloadFailure(format!(
                    "HTTP {}",
                    status.as_u16()
                )));
            }

            let bytes = stream_to_file(response, staging.path()).await?;
            staging.persist(target)?;

            info!(
                url = %current,
                file = %target.display(),
                bytes,
                redirects,
                "Artwork downloaded"
            );
            return Ok(());
        }
    }
}

async fn stream_to_file(mut response: reqwest::Response, path: &Path) -> IngestResult<u64> {
    let mut file = tokio::fs::File::create(path).await?;
    let mut written = 0u64;

    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| IngestError::ArtworkDownloadFailure(format!("transfer failed: {}", e)))?
    {
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }

    file.flush().await?;
    Ok(written)
}
