//! Asset cache configuration.
//!
//! The configuration is a small JSON document. Every field has a default so a
//! missing file, or a file that only sets `cache_dir`, is valid.
//!
//! The default cache directory is `~/.cache/zwi/image-cache` (or the platform
//! equivalent reported by `dirs::cache_dir`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AssetError;

/// Application name used for cache directory paths
const APP_NAME: &str = "zwi";

/// Sub-directory holding downloaded profile images
const IMAGE_CACHE_DIR: &str = "image-cache";

/// HTTP request timeout in seconds.
/// Profile images are small; 30s only matters on a stalled connection.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// How long `stop` waits for the worker before giving up.
const DEFAULT_STOP_TIMEOUT_MS: u64 = 5000;

/// Pause between worker iterations so an unreachable host is not hammered.
const DEFAULT_THROTTLE_MS: u64 = 1;

/// Upper bound for the failure backoff.
const DEFAULT_MAX_BACKOFF_MS: u64 = 1000;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AssetCacheConfig {
    /// Flat directory holding one file per asset key.
    pub cache_dir: PathBuf,
    /// Skip TLS certificate and hostname verification. Off unless asked for.
    pub accept_invalid_certs: bool,
    pub request_timeout_secs: u64,
    pub stop_timeout_ms: u64,
    pub throttle_ms: u64,
    pub max_backoff_ms: u64,
    pub user_agent: String,
}

impl Default for AssetCacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            accept_invalid_certs: false,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            stop_timeout_ms: DEFAULT_STOP_TIMEOUT_MS,
            throttle_ms: DEFAULT_THROTTLE_MS,
            max_backoff_ms: DEFAULT_MAX_BACKOFF_MS,
            user_agent: format!("zwi/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl AssetCacheConfig {
    /// Default settings rooted at an explicit directory.
    pub fn with_dir(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            ..Self::default()
        }
    }

    /// Load from a JSON file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, AssetError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| AssetError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), AssetError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents =
            serde_json::to_string_pretty(self).map_err(|e| AssetError::Config(e.to_string()))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), AssetError> {
        if self.cache_dir.as_os_str().is_empty() {
            return Err(AssetError::Config("cache_dir must not be empty".to_string()));
        }
        if self.request_timeout_secs == 0 {
            return Err(AssetError::Config(
                "request_timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn throttle(&self) -> Duration {
        Duration::from_millis(self.throttle_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

/// Platform cache directory for profile images, or `./image-cache` when the
/// platform has none.
pub fn default_cache_dir() -> PathBuf {
    match dirs::cache_dir() {
        Some(dir) => dir.join(APP_NAME).join(IMAGE_CACHE_DIR),
        None => PathBuf::from(IMAGE_CACHE_DIR),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AssetCacheConfig::load(&dir.path().join("nope.json")).unwrap();
        assert_eq!(config, AssetCacheConfig::default());
        assert!(!config.accept_invalid_certs);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("assets.json");
        std::fs::write(&path, r#"{"cache_dir": "/tmp/zwi-images", "accept_invalid_certs": true}"#)
            .unwrap();

        let config = AssetCacheConfig::load(&path).unwrap();
        assert_eq!(config.cache_dir, PathBuf::from("/tmp/zwi-images"));
        assert!(config.accept_invalid_certs);
        assert_eq!(config.request_timeout_secs, DEFAULT_REQUEST_TIMEOUT_SECS);
        assert_eq!(config.stop_timeout(), Duration::from_millis(DEFAULT_STOP_TIMEOUT_MS));
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("assets.json");
        let mut config = AssetCacheConfig::with_dir(dir.path().join("images"));
        config.throttle_ms = 0;
        config.save(&path).unwrap();

        assert_eq!(AssetCacheConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_rejects_zero_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("assets.json");
        std::fs::write(&path, r#"{"request_timeout_secs": 0}"#).unwrap();

        assert!(matches!(
            AssetCacheConfig::load(&path),
            Err(AssetError::Config(_))
        ));
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("assets.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(matches!(
            AssetCacheConfig::load(&path),
            Err(AssetError::Config(_))
        ));
    }
}
