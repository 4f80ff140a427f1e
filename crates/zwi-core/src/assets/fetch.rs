//! Network side of the asset cache.
//!
//! The cache only talks to an [`AssetFetcher`]; [`HttpFetcher`] is the
//! production implementation over `reqwest`.

use std::path::Path;

use async_trait::async_trait;
use reqwest::{header, Client};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::config::AssetCacheConfig;
use crate::error::FetchError;

/// Retrieves a remote asset into a local file.
#[async_trait]
pub trait AssetFetcher: Send + Sync {
    /// Stream `url` into `destination`, creating or truncating it.
    /// Returns the number of bytes written.
    ///
    /// On error `destination` may hold a partial body; the caller removes it.
    async fn fetch(&self, url: &str, destination: &Path) -> Result<u64, FetchError>;
}

/// Plain HTTP(S) GET fetcher.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone, Debug)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(config: &AssetCacheConfig) -> Result<Self, FetchError> {
        if config.accept_invalid_certs {
            warn!("TLS certificate verification is disabled for asset downloads");
        }

        let client = Client::builder()
            .timeout(config.request_timeout())
            .user_agent(config.user_agent.as_str())
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()
            .map_err(|e| FetchError::Client(e.to_string()))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl AssetFetcher for HttpFetcher {
    async fn fetch(&self, url: &str, destination: &Path) -> Result<u64, FetchError> {
        debug!(url = %url, "Fetching asset");

        let mut response = self
            .client
            .get(url)
            .header(header::ACCEPT, "image/*")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::from_status(status));
        }

        let mut file = File::create(destination).await?;
        let mut written = 0u64;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        file.sync_all().await?;

        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(dir: &Path) -> AssetCacheConfig {
        let mut config = AssetCacheConfig::with_dir(dir);
        config.request_timeout_secs = 5;
        config
    }

    #[test]
    fn test_builds_with_verified_and_relaxed_tls() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        assert!(HttpFetcher::new(&config).is_ok());

        config.accept_invalid_certs = true;
        assert!(HttpFetcher::new(&config).is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_host_is_network_error() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = HttpFetcher::new(&test_config(dir.path())).unwrap();
        let destination = dir.path().join("a.jpg");

        // Port 1 on loopback refuses connections.
        let result = fetcher
            .fetch("http://127.0.0.1:1/a.jpg", &destination)
            .await;

        assert!(matches!(result, Err(FetchError::Network(_))));
        assert!(!destination.exists());
    }
}
