//! Disk-backed cache for remote profile images.
//!
//! This module provides the `AssetCache`: a consumer asks for an image URL
//! with `load`, gets back a local path when the file is already on disk, and
//! otherwise a background worker downloads it. Finished downloads are handed
//! over through `drain`, which the consumer calls from its own tick.
//!
//! Parts:
//! - `key`: URL to file-name mapping
//! - `table`: per-key state (pending / ready)
//! - `worker`: the single lazily started fetch task
//! - `completion`: buffer between the worker and the consumer
//! - `fetch`: the network seam and its reqwest implementation

pub mod cache;
pub mod completion;
pub mod fetch;
pub mod key;
pub mod table;
mod worker;

#[cfg(test)]
mod testing;

pub use cache::{AssetCache, CacheStats, Lookup, StopOutcome};
pub use completion::CompletionRecord;
pub use fetch::{AssetFetcher, HttpFetcher};
pub use key::derive_key;
pub use table::CacheState;
