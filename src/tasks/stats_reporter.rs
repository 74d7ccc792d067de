//! Cache Statistics Reporter
//!
//! Background task that periodically logs size, weight and hit rate of the
//! shared block cache.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::{BlockLocalKey, BlockValue, CacheBackend};

// == Reporter Handle ==
/// Handle to a running reporter. Dropping it stops the reporter.
#[derive(Debug)]
pub struct StatsReporterHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl StatsReporterHandle {
    /// Asks the reporter to stop and waits for it to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }

    /// Stops the reporter without waiting.
    pub fn abort(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Spawns a task that logs cache statistics every `interval_ms` milliseconds.
///
/// Returns None, and spawns nothing, when `interval_ms` is not positive.
/// Must be called from within a tokio runtime.
///
/// # Example
/// ```ignore
/// let reporter = spawn_stats_reporter(backend.clone(), 10_000);
/// // Later, during shutdown:
/// if let Some(reporter) = reporter {
///     reporter.shutdown().await;
/// }
/// ```
pub fn spawn_stats_reporter<K: BlockLocalKey, V: BlockValue>(
    cache: Arc<dyn CacheBackend<K, V>>,
    interval_ms: i64,
) -> Option<StatsReporterHandle> {
    if interval_ms <= 0 {
        debug!("cache statistics reporting disabled");
        return None;
    }
    let interval = Duration::from_millis(interval_ms as u64);
    let (shutdown, mut stop) = watch::channel(false);

    let task = tokio::spawn(async move {
        info!(
            "Starting cache statistics reporter with interval of {} ms",
            interval_ms
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                // Fires on shutdown() and when the handle is dropped.
                _ = stop.changed() => break,
            }

            let stats = cache.stats();
            info!(
                backend = %cache.kind(),
                entries = stats.entries,
                weight_mb = stats.weight / (1024 * 1024),
                budget_mb = stats.budget / (1024 * 1024),
                fill = %format!("{:.1}%", stats.fill_ratio() * 100.0),
                hits = stats.hits,
                misses = stats.misses,
                coalesced = stats.coalesced,
                hit_rate = %format!("{:.3}", stats.hit_rate()),
                loads = stats.loads,
                load_failures = stats.load_failures,
                evictions = stats.evictions,
                invalidations = stats.invalidations,
                "block cache statistics"
            );
        }

        info!("Cache statistics reporter stopped");
    });

    Some(StatsReporterHandle { shutdown, task })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{GridCell, WeightedConcurrentCache};

    fn cache() -> Arc<dyn CacheBackend<GridCell, Vec<u8>>> {
        Arc::new(WeightedConcurrentCache::new(1024))
    }

    #[tokio::test]
    async fn test_non_positive_interval_is_inert() {
        assert!(spawn_stats_reporter(cache(), 0).is_none());
        assert!(spawn_stats_reporter(cache(), -1).is_none());
    }

    #[tokio::test]
    async fn test_reporter_runs_until_shutdown() {
        let handle = spawn_stats_reporter(cache(), 10).unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_finished());

        tokio::time::timeout(Duration::from_secs(1), handle.shutdown())
            .await
            .expect("reporter should stop promptly");
    }

    #[tokio::test]
    async fn test_reporter_can_be_aborted() {
        let handle = spawn_stats_reporter(cache(), 10).unwrap();

        handle.abort();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(handle.is_finished(), "Task should be finished after abort");
    }
}
