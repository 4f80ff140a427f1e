//! zwi-prefetch - mirror profile images into the local zwi image cache.
//!
//! Drives the asset cache the way a UI redraw loop does: every tick it asks
//! for each outstanding image again and drains whatever the background
//! worker finished. Prints `key<TAB>path` for each image on disk.
//!
//! Usage: `zwi-prefetch [--config FILE] [URL ...]` (URLs are read from stdin
//! when none are given).

use std::collections::BTreeMap;
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use zwi_core::assets::derive_key;
use zwi_core::{AssetCache, AssetCacheConfig, Lookup, StopOutcome};

// ============================================================================
// Constants
// ============================================================================

/// Tick interval for re-polling the cache (in milliseconds)
const TICK_INTERVAL_MS: u64 = 100;

/// Give up on images still missing after this many seconds
const PREFETCH_DEADLINE_SECS: u64 = 60;

/// Overrides the configured cache directory
const ENV_CACHE_DIR: &str = "ZWI_CACHE_DIR";

/// Set to `1` to skip TLS certificate verification
const ENV_INSECURE_TLS: &str = "ZWI_INSECURE_TLS";

/// Directory for a `zwi-prefetch.log` file in addition to stderr
const ENV_LOG_DIR: &str = "ZWI_LOG_DIR";

/// Initialize the tracing subscriber for logging.
///
/// Returns the appender guard when file logging is enabled; it must live
/// until exit so buffered lines are flushed.
fn init_tracing() -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match std::env::var_os(ENV_LOG_DIR) {
        Some(dir) => {
            let appender = tracing_appender::rolling::never(dir, "zwi-prefetch.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

struct Args {
    config: Option<PathBuf>,
    urls: Vec<String>,
}

fn parse_args() -> Result<Args> {
    let mut config = None;
    let mut urls = Vec::new();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            let path = args.next().context("--config needs a file argument")?;
            config = Some(PathBuf::from(path));
        } else {
            urls.push(arg);
        }
    }

    if urls.is_empty() {
        for line in io::stdin().lock().lines() {
            let line = line.context("Failed to read URLs from stdin")?;
            let line = line.trim();
            if !line.is_empty() {
                urls.push(line.to_string());
            }
        }
    }

    Ok(Args { config, urls })
}

fn load_config(path: Option<&PathBuf>) -> Result<AssetCacheConfig> {
    let mut config = match path {
        Some(path) => AssetCacheConfig::load(path)
            .with_context(|| format!("Failed to load config: {}", path.display()))?,
        None => AssetCacheConfig::default(),
    };

    if let Some(dir) = std::env::var_os(ENV_CACHE_DIR) {
        config.cache_dir = PathBuf::from(dir);
    }
    if std::env::var(ENV_INSECURE_TLS).is_ok_and(|v| v == "1") {
        config.accept_invalid_certs = true;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let _log_guard = init_tracing();

    let args = parse_args()?;
    let config = load_config(args.config.as_ref())?;
    info!(dir = %config.cache_dir.display(), urls = args.urls.len(), "zwi-prefetch starting");

    let cache: AssetCache<usize> =
        AssetCache::new(config).context("Failed to open image cache")?;

    let report = run_prefetch(&cache, &args.urls).await;

    for (key, path) in &report.ready {
        println!("{}\t{}", key, path.display());
    }

    if !report.unfetched.is_empty() {
        eprintln!("{} image(s) could not be fetched:", report.unfetched.len());
        for url in &report.unfetched {
            eprintln!("  {}", url);
        }
    }

    info!("zwi-prefetch done");
    Ok(())
}

struct PrefetchReport {
    /// key -> local path for every image on disk
    ready: BTreeMap<String, PathBuf>,
    /// URLs still missing when the deadline passed
    unfetched: Vec<String>,
}

/// Tick until every URL is on disk or has no image, or the deadline passes.
async fn run_prefetch(cache: &AssetCache<usize>, urls: &[String]) -> PrefetchReport {
    let mut ready = BTreeMap::new();
    // Index into `urls` of everything still outstanding.
    let mut outstanding: Vec<usize> = (0..urls.len()).collect();

    let completions_ready = cache.completions_ready();
    let mut ticker = interval(Duration::from_millis(TICK_INTERVAL_MS));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let deadline = Instant::now() + Duration::from_secs(PREFETCH_DEADLINE_SECS);

    while !outstanding.is_empty() && Instant::now() < deadline {
        outstanding.retain(|&idx| match cache.load(&urls[idx], idx) {
            Lookup::Ready(path) => {
                ready.insert(derive_key(&urls[idx]).to_string(), path);
                false
            }
            Lookup::Pending => true,
            Lookup::NoAsset => {
                debug!(url = %urls[idx], "No image to fetch");
                false
            }
        });

        tokio::select! {
            _ = ticker.tick() => {}
            _ = completions_ready.notified() => {}
        }

        let drained = cache.drain(|record| {
            debug!(key = %record.key, requester = record.requester, "Image ready");
            ready.insert(record.key, record.path);
        });
        if drained > 0 {
            let stats = cache.stats();
            info!(ready = stats.ready, pending = stats.pending, "Prefetch progress");
        }
        // Completions may cover several outstanding URLs; load sorts them out
        // on the next pass.
    }

    if !outstanding.is_empty() {
        warn!(remaining = outstanding.len(), "Prefetch deadline reached");
    }

    match cache.stop().await {
        StopOutcome::TimedOut => warn!("Image fetch worker did not stop in time"),
        outcome => debug!(?outcome, "Image fetch worker stopped"),
    }
    cache.drain(|record| {
        ready.insert(record.key, record.path);
    });

    let unfetched = outstanding
        .into_iter()
        .map(|idx| urls[idx].clone())
        .filter(|url| !ready.contains_key(derive_key(url)))
        .collect();

    PrefetchReport { ready, unfetched }
}
