//! Core library for zwi.
//!
//! Holds the asset cache used to mirror profile images locally, along with
//! its configuration and error types. Front ends drive it from their own
//! event loop.

pub mod assets;
pub mod config;
pub mod error;

pub use assets::{AssetCache, CompletionRecord, Lookup, StopOutcome};
pub use config::AssetCacheConfig;
pub use error::{AssetError, FetchError};
