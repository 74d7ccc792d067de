//! Block Cache - demo composition root
//!
//! Builds the shared block cache from the persisted configuration, starts the
//! statistics reporter, and drives it with synthetic rendering workers until
//! interrupted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tokio::signal;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use block_cache::cache::{ImageBlock, RemovalCause};
use block_cache::registry::{FilePreferenceStore, PreferenceStore, CACHE_PREFERENCE_KEY};
use block_cache::{
    spawn_stats_reporter, BlockKey, CacheBackend, CacheRegistry, Config, GridCell, SourceId,
};

/// Edge length of a synthetic block, in voxels.
const DEMO_BLOCK_EDGE: u32 = 32;
const DEMO_TIMEPOINTS: u32 = 8;
const DEMO_LEVELS: u32 = 3;

type Block = Arc<ImageBlock>;

/// Main entry point for the block cache demo service.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load process configuration from environment variables
/// 3. Create the registry over the preference file and build the cache
/// 4. Start the statistics reporter if configured
/// 5. Run synthetic rendering workers
/// 6. Stop everything on SIGINT/SIGTERM
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "block_cache=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting block cache service");

    let config = Config::from_env();
    info!(
        "Configuration loaded: preferences={}, memory_override_mb={:?}, workers={}",
        config.preferences_path.display(),
        config.memory_override_mb,
        config.demo_workers
    );

    let preferences = Arc::new(FilePreferenceStore::new(&config.preferences_path));
    let registry: Arc<CacheRegistry<GridCell, Block>> = Arc::new(
        CacheRegistry::new(preferences.clone(), config.memory_info()).with_eviction_listener(
            Arc::new(|key: &BlockKey<GridCell>, _: &Block, cause: RemovalCause| {
                debug!(%key, ?cause, "block removed");
            }),
        ),
    );

    let cache = match registry.backend() {
        Ok(cache) => cache,
        Err(err) => {
            error!(error = %err, "cannot build block cache");
            return Err(err.into());
        }
    };

    // Seed the preference file so the configuration can be edited for the next run.
    if let Some(active) = registry.active_configuration() {
        let stored = preferences.get(CACHE_PREFERENCE_KEY).unwrap_or_else(|err| {
            warn!(error = %err, "preference file unreadable, treating it as empty");
            None
        });
        if stored.is_none() {
            match registry.save_configuration(&active) {
                Ok(()) => info!(
                    path = %preferences.path().display(),
                    "wrote default cache configuration"
                ),
                Err(err) => warn!(error = %err, "could not write cache configuration"),
            }
        }
    }

    let reporter = registry
        .active_configuration()
        .and_then(|active| spawn_stats_reporter(cache.clone(), active.stats_log_interval_ms()));

    let running = Arc::new(AtomicBool::new(true));
    let sources: Vec<SourceId> = (0..2).map(|_| SourceId::new()).collect();
    let workers: Vec<_> = (0..config.demo_workers)
        .map(|id| {
            let cache = cache.clone();
            let running = running.clone();
            let sources = sources.clone();
            thread::Builder::new()
                .name(format!("render-worker-{}", id))
                .spawn(move || render_loop(id, cache, sources, running))
        })
        .collect::<Result<_, _>>()?;
    info!("{} rendering workers started", workers.len());

    shutdown_signal().await;

    running.store(false, Ordering::Relaxed);
    let panicked = tokio::task::spawn_blocking(move || {
        workers
            .into_iter()
            .map(|worker| worker.join())
            .filter(Result::is_err)
            .count()
    })
    .await?;
    if panicked > 0 {
        warn!("{} rendering workers panicked", panicked);
    }
    if let Some(reporter) = reporter {
        reporter.shutdown().await;
    }

    let stats = cache.stats();
    info!(
        "Final cache state: entries={}, weight={} bytes, hit_rate={:.3}, evictions={}",
        stats.entries,
        stats.weight,
        stats.hit_rate(),
        stats.evictions
    );
    if registry.restart_required() {
        warn!("persisted cache configuration changed; it applies on next start");
    }
    info!("Block cache service shutdown complete");
    Ok(())
}

/// Requests blocks in a sweeping pattern, tearing down one timepoint now and then.
fn render_loop(
    worker: usize,
    cache: Arc<dyn CacheBackend<GridCell, Block>>,
    sources: Vec<SourceId>,
    running: Arc<AtomicBool>,
) {
    let voxels = (DEMO_BLOCK_EDGE * DEMO_BLOCK_EDGE * DEMO_BLOCK_EDGE) as usize;
    let mut step: u64 = worker as u64;

    while running.load(Ordering::Relaxed) {
        let source = sources[(step % sources.len() as u64) as usize];
        let timepoint = ((step / 7) % DEMO_TIMEPOINTS as u64) as u32;
        let level = (step % DEMO_LEVELS as u64) as u32;
        let cell = GridCell::new((step % 5) as i64, ((step / 5) % 5) as i64, 0);
        let key = BlockKey::new(source, timepoint, level, cell);

        let result = cache.get_or_load(&key, &mut || {
            // Stand-in for decoding a block from disk.
            thread::sleep(Duration::from_millis(2));
            Ok(Arc::new(ImageBlock::new(
                [DEMO_BLOCK_EDGE; 3],
                vec![(step % 251) as u8; voxels],
            )))
        });
        if let Err(err) = result {
            warn!(worker, error = %err, "block load failed");
        }

        if step % 997 == 0 {
            cache.invalidate_matching(source, timepoint, level);
        }
        step += 1;
    }
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }
}
