//! The fetch worker.
//!
//! At most one worker task runs per cache. It is spawned by `load` on a miss
//! and exits on its own once it finds the queue empty after either `drain`
//! hinted that nothing is left to do or `stop` asked it to finish.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::completion::{CompletionBuffer, CompletionRecord};
use super::fetch::AssetFetcher;
use super::key;
use super::table::CacheTable;
use crate::config::AssetCacheConfig;
use crate::error::FetchError;

/// Largest exponent used when doubling the failure backoff.
const MAX_BACKOFF_SHIFT: u32 = 16;

/// A queued fetch, created by `load` on a miss.
#[derive(Debug)]
pub(crate) struct PendingRequest<T> {
    pub(crate) key: String,
    pub(crate) url: String,
    pub(crate) requester: T,
}

/// Everything guarded by the table lock.
#[derive(Debug)]
pub(crate) struct Shared<T> {
    pub(crate) table: CacheTable,
    pub(crate) queue: VecDeque<PendingRequest<T>>,
    pub(crate) worker_alive: bool,
    /// Idle hint from `drain`. New work supersedes it.
    pub(crate) terminate_requested: bool,
    /// Set by `stop`; holds until the worker exits.
    pub(crate) stopping: bool,
    /// Consecutive failed fetches. Outlives worker restarts.
    pub(crate) failure_streak: u32,
    /// No fetch starts before this instant while failures persist.
    pub(crate) retry_at: Option<Instant>,
}

impl<T> Default for Shared<T> {
    fn default() -> Self {
        Self {
            table: CacheTable::new(),
            queue: VecDeque::new(),
            worker_alive: false,
            terminate_requested: false,
            stopping: false,
            failure_streak: 0,
            retry_at: None,
        }
    }
}

pub(crate) struct Inner<T> {
    pub(crate) config: AssetCacheConfig,
    pub(crate) fetcher: Arc<dyn AssetFetcher>,
    pub(crate) runtime: Handle,
    pub(crate) shared: Mutex<Shared<T>>,
    pub(crate) completions: CompletionBuffer<T>,
    /// Wakes the worker: new work, an idle hint, or a stop request.
    pub(crate) work_ready: Notify,
    /// Wakes the consumer when a completion is buffered.
    pub(crate) completions_ready: Arc<Notify>,
    /// Fired once the worker has cleared `worker_alive`.
    pub(crate) worker_exited: Notify,
}

impl<T> Inner<T> {
    pub(crate) fn new(
        config: AssetCacheConfig,
        fetcher: Arc<dyn AssetFetcher>,
        runtime: Handle,
    ) -> Self {
        Self {
            config,
            fetcher,
            runtime,
            shared: Mutex::new(Shared::default()),
            completions: CompletionBuffer::new(),
            work_ready: Notify::new(),
            completions_ready: Arc::new(Notify::new()),
            worker_exited: Notify::new(),
        }
    }

    pub(crate) fn dir(&self) -> &Path {
        &self.config.cache_dir
    }

    pub(crate) fn lock_shared(&self) -> MutexGuard<'_, Shared<T>> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record_success(&self) {
        let mut shared = self.lock_shared();
        shared.failure_streak = 0;
        shared.retry_at = None;
    }

    fn record_failure(&self) {
        let mut shared = self.lock_shared();
        shared.failure_streak = shared.failure_streak.saturating_add(1);
        let pause = backoff(
            self.config.throttle(),
            self.config.max_backoff(),
            shared.failure_streak,
        );
        shared.retry_at = Some(Instant::now() + pause);
    }

    fn retry_at(&self) -> Option<Instant> {
        self.lock_shared().retry_at
    }

    /// Clear a pending entry so the next `load` queues the key again.
    fn forget_pending(&self, key: &str) {
        let mut shared = self.lock_shared();
        if shared.table.is_pending(key) {
            shared.table.remove(key);
        }
    }
}

/// Result of handling one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Completed,
    Skipped,
    Failed,
}

/// Resets the lifecycle flags if the worker unwinds, and always tells
/// `stop` waiters that this worker is gone.
struct WorkerGuard<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Drop for WorkerGuard<T> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            let mut shared = self.inner.lock_shared();
            shared.worker_alive = false;
            shared.terminate_requested = false;
            shared.stopping = false;
        }
        self.inner.worker_exited.notify_waiters();
    }
}

/// Worker task body. `worker_alive` must already be set by the spawner.
pub(crate) async fn run<T: Send + 'static>(inner: Arc<Inner<T>>) {
    let _guard = WorkerGuard {
        inner: Arc::clone(&inner),
    };
    debug!(dir = %inner.dir().display(), "Fetch worker started");

    let throttle = inner.config.throttle();

    while let Some(request) = next_request(&inner).await {
        match process(&inner, request).await {
            Outcome::Skipped => continue,
            Outcome::Completed => inner.record_success(),
            Outcome::Failed => inner.record_failure(),
        }

        if !throttle.is_zero() {
            tokio::time::sleep(throttle).await;
        }
    }

    debug!(dir = %inner.dir().display(), "Fetch worker exiting");
}

/// Wait for the next request, or return `None` once the worker should exit.
async fn next_request<T>(inner: &Inner<T>) -> Option<PendingRequest<T>> {
    loop {
        {
            let mut shared = inner.lock_shared();
            if let Some(request) = shared.queue.pop_front() {
                if shared.terminate_requested {
                    debug!("Idle shutdown superseded by queued work");
                    shared.terminate_requested = false;
                }
                return Some(request);
            }
            if shared.terminate_requested || shared.stopping {
                shared.worker_alive = false;
                shared.terminate_requested = false;
                shared.stopping = false;
                return None;
            }
        }
        inner.work_ready.notified().await;
    }
}

async fn process<T>(inner: &Inner<T>, request: PendingRequest<T>) -> Outcome {
    let PendingRequest {
        key,
        url,
        requester,
    } = request;

    if key::is_sentinel(&url) || !key::is_fetchable(&url) {
        debug!(url = %url, "Skipping unfetchable asset URL");
        inner.forget_pending(&key);
        return Outcome::Skipped;
    }
    let Some(path) = key::key_path(inner.dir(), &key) else {
        debug!(key = %key, "Skipping asset key that is not a valid file name");
        inner.forget_pending(&key);
        return Outcome::Skipped;
    };

    if !is_file(&path).await {
        if let Some(retry_at) = inner.retry_at() {
            tokio::time::sleep_until(retry_at).await;
        }
        match download(inner.fetcher.as_ref(), &url, &path).await {
            Ok(bytes) => info!(key = %key, bytes, "Fetched asset"),
            Err(e) => {
                warn!(key = %key, url = %url, error = %e, "Asset fetch failed");
                inner.forget_pending(&key);
                return Outcome::Failed;
            }
        }
    } else {
        debug!(key = %key, "Adopting asset already on disk");
    }

    if !is_file(&path).await {
        warn!(key = %key, "Asset missing after fetch");
        inner.forget_pending(&key);
        return Outcome::Failed;
    }

    inner.completions.push(CompletionRecord {
        key,
        path,
        requester,
    });
    inner.completions_ready.notify_one();
    Outcome::Completed
}

/// Fetch into a `.part` sibling and rename it into place, so `path` only
/// ever holds a complete body.
async fn download(fetcher: &dyn AssetFetcher, url: &str, path: &Path) -> Result<u64, FetchError> {
    let partial = key::partial_path(path);
    let result = match fetcher.fetch(url, &partial).await {
        Ok(bytes) => tokio::fs::rename(&partial, path)
            .await
            .map(|_| bytes)
            .map_err(FetchError::from),
        Err(e) => Err(e),
    };

    if result.is_err() {
        remove_partial(&partial).await;
    }
    result
}

async fn remove_partial(partial: &Path) {
    match tokio::fs::remove_file(partial).await {
        Ok(()) => debug!(path = %partial.display(), "Removed partial download"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => debug!(path = %partial.display(), error = %e, "Could not remove partial download"),
    }
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.is_file())
        .unwrap_or(false)
}

/// Delay before the next fetch: the plain throttle, doubled per consecutive
/// failure and capped at `max`.
fn backoff(throttle: Duration, max: Duration, failures: u32) -> Duration {
    let factor = 1u32 << failures.min(MAX_BACKOFF_SHIFT);
    throttle.saturating_mul(factor).min(max.max(throttle))
}
