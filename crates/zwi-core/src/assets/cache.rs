use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::pin::pin;
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::completion::CompletionRecord;
use super::fetch::{AssetFetcher, HttpFetcher};
use super::key;
use super::table::CacheState;
use super::worker::{self, Inner, PendingRequest};
use crate::config::AssetCacheConfig;
use crate::error::AssetError;

/// Answer to [`AssetCache::load`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// The asset is on disk.
    Ready(PathBuf),
    /// A fetch is queued or in flight; show a placeholder.
    Pending,
    /// Nothing to load: empty, `"None"`, or not an http(s) URL.
    NoAsset,
}

impl Lookup {
    pub fn is_ready(&self) -> bool {
        matches!(self, Lookup::Ready(_))
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            Lookup::Ready(path) => Some(path),
            _ => None,
        }
    }
}

/// How [`AssetCache::stop`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// No worker was running.
    Idle,
    /// The worker finished the queue and exited.
    Stopped,
    /// The worker was still busy when the stop timeout elapsed. It keeps
    /// running and exits once the queue is empty.
    TimedOut,
}

/// Point-in-time counters, mostly for status lines and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub ready: usize,
    pub pending: usize,
    pub queued: usize,
    pub buffered: usize,
    pub worker_alive: bool,
    /// Consecutive failed fetches; drives the retry backoff.
    pub failure_streak: u32,
}

/// Disk-backed cache of remote assets, fetched in the background.
///
/// `load` and `drain` never block on the network. Completed fetches wait in a
/// buffer until the consumer calls `drain` from its own tick, so consumer
/// state is only ever touched on the consumer's thread.
///
/// `T` is the requester token carried from `load` to the matching
/// completion. Clones share the same cache.
pub struct AssetCache<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for AssetCache<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> AssetCache<T> {
    /// Create a cache that fetches over HTTP(S), running its worker on the
    /// current tokio runtime.
    pub fn new(config: AssetCacheConfig) -> Result<Self, AssetError> {
        let fetcher = HttpFetcher::new(&config)?;
        Self::with_fetcher(config, Arc::new(fetcher))
    }

    pub fn with_fetcher(
        config: AssetCacheConfig,
        fetcher: Arc<dyn AssetFetcher>,
    ) -> Result<Self, AssetError> {
        let runtime = Handle::try_current()?;
        Self::with_runtime(config, fetcher, runtime)
    }

    /// Create a cache whose worker is spawned on `runtime`. Use this when
    /// `load` is called from threads outside the runtime.
    pub fn with_runtime(
        config: AssetCacheConfig,
        fetcher: Arc<dyn AssetFetcher>,
        runtime: Handle,
    ) -> Result<Self, AssetError> {
        config.validate()?;
        std::fs::create_dir_all(&config.cache_dir).map_err(|source| AssetError::CacheDir {
            path: config.cache_dir.clone(),
            source,
        })?;
        info!(dir = %config.cache_dir.display(), "Asset cache ready");

        Ok(Self {
            inner: Arc::new(Inner::new(config, fetcher, runtime)),
        })
    }

    pub fn dir(&self) -> &Path {
        self.inner.dir()
    }

    /// Where `url` is (or would be) stored. No I/O.
    pub fn path_for(&self, url: &str) -> Option<PathBuf> {
        if key::is_sentinel(url) {
            return None;
        }
        key::key_path(self.dir(), key::derive_key(url))
    }

    /// Look up `url`, queueing a background fetch on a miss.
    ///
    /// A file already in the cache directory is adopted without a fetch. A
    /// key that is already pending is not queued again; the extra
    /// `requester` is dropped.
    pub fn load(&self, url: &str, requester: T) -> Lookup {
        if key::is_sentinel(url) || !key::is_fetchable(url) {
            return Lookup::NoAsset;
        }
        let key = key::derive_key(url);
        let Some(path) = key::key_path(self.dir(), key) else {
            return Lookup::NoAsset;
        };
        let on_disk = path.is_file();

        let spawn_worker = {
            let mut shared = self.inner.lock_shared();
            match shared.table.get(key) {
                Some(CacheState::Pending) => return Lookup::Pending,
                Some(CacheState::Ready(ready)) if on_disk => return Lookup::Ready(ready.clone()),
                Some(CacheState::Ready(_)) => {
                    debug!(key = %key, "Cached asset vanished from disk, fetching again");
                }
                None => {}
            }

            if on_disk {
                shared.table.mark_ready(key, path.clone());
                return Lookup::Ready(path);
            }

            shared.table.mark_pending(key);
            shared.queue.push_back(PendingRequest {
                key: key.to_string(),
                url: url.to_string(),
                requester,
            });
            debug!(key = %key, queued = shared.queue.len(), "Queued asset fetch");

            let spawn = !shared.worker_alive;
            shared.worker_alive = true;
            spawn
        };

        self.inner.work_ready.notify_one();
        if spawn_worker {
            self.inner.runtime.spawn(worker::run(Arc::clone(&self.inner)));
        }
        Lookup::Pending
    }

    /// Move buffered completions into the table, calling `on_each` for every
    /// one with no lock held. Returns how many were drained.
    ///
    /// If nothing is left to fetch afterwards, the worker is told to exit.
    pub fn drain<F>(&self, mut on_each: F) -> usize
    where
        F: FnMut(CompletionRecord<T>),
    {
        let mut drained = 0;
        while let Some(record) = self.inner.completions.pop() {
            self.inner
                .lock_shared()
                .table
                .mark_ready(&record.key, record.path.clone());
            on_each(record);
            drained += 1;
        }

        let idle = {
            let mut shared = self.inner.lock_shared();
            let idle = shared.worker_alive
                && !shared.terminate_requested
                && shared.queue.is_empty()
                && self.inner.completions.is_empty();
            if idle {
                shared.terminate_requested = true;
            }
            idle
        };
        if idle {
            debug!("No work left, asking fetch worker to exit");
            self.inner.work_ready.notify_one();
        }

        drained
    }

    /// Notifier fired whenever a completion is buffered. Safe to await from
    /// any task; the consumer still has to call `drain`.
    pub fn completions_ready(&self) -> Arc<Notify> {
        Arc::clone(&self.inner.completions_ready)
    }

    /// Let the worker finish everything queued, then wait for it to exit,
    /// bounded by the configured stop timeout.
    ///
    /// Completions produced before the worker exits stay buffered, so a
    /// final `drain` after `stop` still delivers them.
    pub async fn stop(&self) -> StopOutcome {
        let timeout = self.inner.config.stop_timeout();
        let deadline = Instant::now() + timeout;
        let mut signalled = false;

        // An exit notification may come from an earlier worker while a newer
        // one is already running, so re-check after every wake-up.
        loop {
            let mut exited = pin!(self.inner.worker_exited.notified());
            exited.as_mut().enable();

            {
                let mut shared = self.inner.lock_shared();
                if !shared.worker_alive {
                    return if signalled {
                        StopOutcome::Stopped
                    } else {
                        StopOutcome::Idle
                    };
                }
                shared.stopping = true;
            }
            self.inner.work_ready.notify_one();
            if !signalled {
                debug!("Waiting for fetch worker to exit");
                signalled = true;
            }

            if tokio::time::timeout_at(deadline, exited).await.is_err() {
                warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "Fetch worker still busy after stop timeout"
                );
                return StopOutcome::TimedOut;
            }
        }
    }

    /// Forget `url`'s key, optionally deleting its file. Returns whether the
    /// key was known.
    pub fn unload(&self, url: &str, delete_file: bool) -> Result<bool, AssetError> {
        if key::is_sentinel(url) {
            return Ok(false);
        }
        let key = key::derive_key(url);
        let known = self.inner.lock_shared().table.remove(key).is_some();

        if delete_file {
            if let Some(path) = key::key_path(self.dir(), key) {
                match std::fs::remove_file(&path) {
                    Ok(()) => debug!(key = %key, "Deleted cached asset"),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Ok(known)
    }

    /// Forget every settled key and delete the cached files. In-flight
    /// fetches are left alone and still complete. Returns the number of
    /// files deleted.
    pub fn reset(&self) -> Result<usize, AssetError> {
        let pending: HashSet<String> = {
            let mut shared = self.inner.lock_shared();
            shared.table.retain_pending();
            shared.table.pending_keys().map(str::to_string).collect()
        };

        let mut deleted = 0;
        for entry in std::fs::read_dir(self.dir())? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if key::is_partial_name(&name) || pending.contains(&name) {
                continue;
            }
            std::fs::remove_file(entry.path())?;
            deleted += 1;
        }

        info!(dir = %self.dir().display(), deleted, "Asset cache reset");
        Ok(deleted)
    }

    pub fn stats(&self) -> CacheStats {
        let shared = self.inner.lock_shared();
        CacheStats {
            ready: shared.table.count_ready(),
            pending: shared.table.count_pending(),
            queued: shared.queue.len(),
            buffered: self.inner.completions.len(),
            worker_alive: shared.worker_alive,
            failure_streak: shared.failure_streak,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
