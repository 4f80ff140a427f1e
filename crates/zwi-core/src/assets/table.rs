use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// State of a single asset key.
///
/// A key that is not in the table is absent. Failed fetches remove the key
/// instead of recording a failure, so every failure is retryable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheState {
    /// A request is queued or being fetched.
    Pending,
    /// The file is on disk at this path.
    Ready(PathBuf),
}

/// In-memory map from asset key to state.
///
/// Not synchronised on its own; the cache keeps it behind the same mutex as
/// the work queue.
#[derive(Debug, Default)]
pub struct CacheTable {
    entries: HashMap<String, CacheState>,
}

impl CacheTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&CacheState> {
        self.entries.get(key)
    }

    pub fn ready_path(&self, key: &str) -> Option<&Path> {
        match self.entries.get(key) {
            Some(CacheState::Ready(path)) => Some(path),
            _ => None,
        }
    }

    pub fn is_pending(&self, key: &str) -> bool {
        matches!(self.entries.get(key), Some(CacheState::Pending))
    }

    pub fn mark_pending(&mut self, key: &str) {
        self.entries.insert(key.to_string(), CacheState::Pending);
    }

    pub fn mark_ready(&mut self, key: &str, path: PathBuf) {
        self.entries.insert(key.to_string(), CacheState::Ready(path));
    }

    pub fn remove(&mut self, key: &str) -> Option<CacheState> {
        self.entries.remove(key)
    }

    /// Drop every settled entry, keeping in-flight ones.
    pub fn retain_pending(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, state| *state == CacheState::Pending);
        before - self.entries.len()
    }

    pub fn pending_keys(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(|(_, state)| **state == CacheState::Pending)
            .map(|(key, _)| key.as_str())
    }

    pub fn count_ready(&self) -> usize {
        self.entries
            .values()
            .filter(|state| matches!(state, CacheState::Ready(_)))
            .count()
    }

    pub fn count_pending(&self) -> usize {
        self.entries
            .values()
            .filter(|state| **state == CacheState::Pending)
            .count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
