use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while fetching a single asset.
///
/// These never reach the consumer: the fetch worker logs them and clears the
/// table entry so the next `load` retries.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Unexpected status: {0}")]
    Status(reqwest::StatusCode),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to build HTTP client: {0}")]
    Client(String),
}

impl FetchError {
    /// Map a non-success response status to an error.
    pub fn from_status(status: reqwest::StatusCode) -> Self {
        FetchError::Status(status)
    }
}

/// Errors surfaced by the cache's own lifecycle operations.
#[derive(Error, Debug)]
pub enum AssetError {
    #[error("Could not prepare cache directory {path}: {source}")]
    CacheDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No tokio runtime available to run the fetch worker")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_error_message() {
        let err = FetchError::from_status(reqwest::StatusCode::NOT_FOUND);
        assert!(matches!(err, FetchError::Status(status) if status == reqwest::StatusCode::NOT_FOUND));
        assert_eq!(err.to_string(), "Unexpected status: 404 Not Found");
    }

    #[test]
    fn test_io_error_converts() {
        let err = FetchError::from(std::io::Error::new(std::io::ErrorKind::Other, "disk full"));
        assert!(matches!(err, FetchError::Io(_)));
        assert_eq!(err.to_string(), "I/O error: disk full");
    }
}
