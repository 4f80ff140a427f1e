//! In-process fetcher double for cache tests.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Semaphore;

use super::cache::{AssetCache, CacheStats};
use super::fetch::AssetFetcher;
use crate::config::AssetCacheConfig;
use crate::error::FetchError;

/// Writes `image:<url>` for every URL, records each call, and can be told to
/// fail certain URLs or to hold every fetch until a permit is released.
#[derive(Default)]
pub(crate) struct StubFetcher {
    calls: Mutex<Vec<String>>,
    call_times: Mutex<Vec<Instant>>,
    failing: Mutex<HashSet<String>>,
    gate: Option<Arc<Semaphore>>,
}

impl StubFetcher {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every fetch waits for one permit on `gate`.
    pub(crate) fn gated(gate: Arc<Semaphore>) -> Arc<Self> {
        Arc::new(Self {
            gate: Some(gate),
            ..Self::default()
        })
    }

    pub(crate) fn fail_on(&self, url: &str) {
        self.failing.lock().unwrap().insert(url.to_string());
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn call_times(&self) -> Vec<Instant> {
        self.call_times.lock().unwrap().clone()
    }

    pub(crate) fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl AssetFetcher for StubFetcher {
    async fn fetch(&self, url: &str, destination: &Path) -> Result<u64, FetchError> {
        self.calls.lock().unwrap().push(url.to_string());
        self.call_times.lock().unwrap().push(Instant::now());

        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate closed").forget();
        }

        let body = format!("image:{}", url);
        if self.failing.lock().unwrap().contains(url) {
            // Leave a partial body behind, like a dropped connection would.
            tokio::fs::write(destination, &body.as_bytes()[..3]).await?;
            return Err(FetchError::from_status(reqwest::StatusCode::BAD_GATEWAY));
        }

        tokio::fs::write(destination, body.as_bytes()).await?;
        Ok(body.len() as u64)
    }
}

pub(crate) fn test_config(dir: &Path) -> AssetCacheConfig {
    let mut config = AssetCacheConfig::with_dir(dir);
    config.throttle_ms = 0;
    config.max_backoff_ms = 0;
    config.stop_timeout_ms = 2000;
    config
}

/// Poll `stats` until `done` holds, panicking after a few seconds.
pub(crate) async fn wait_until<T, F>(cache: &AssetCache<T>, mut done: F)
where
    T: Send + 'static,
    F: FnMut(&CacheStats) -> bool,
{
    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if done(&cache.stats()) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "condition not reached: {:?}", cache.stats());
}
