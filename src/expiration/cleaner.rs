use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::AppState;

/// Start the background task that evicts expired token cache entries.
///
/// Registration tokens may be cached without a TTL; this is what removes
/// them once the token itself has expired and nobody logged in.
pub fn start_cache_sweeper(state: Arc<AppState>) -> JoinHandle<()> {
    let interval = Duration::from_secs(state.config.worker.cache_sweep_interval_seconds);

    tokio::spawn(async move {
        let mut interval_timer = tokio::time::interval(interval);

        loop {
            interval_timer.tick().await;
            run_sweep(&state);
        }
    })
}

fn run_sweep(state: &AppState) -> usize {
    let cache = &state.flow.components().cache;
    let evicted = cache.purge_expired();
    if evicted > 0 {
        debug!(evicted, remaining = cache.len(), "Evicted expired cached tokens");
    }
    evicted
}
