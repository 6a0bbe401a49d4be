use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::engine::Engine;

const CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Background task that rewrites a tenant's WAL once enough appends have
/// accumulated since the last snapshot. Cancel/move churn otherwise grows
/// the log without bound.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_snapshot().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!("wal compacted after {appends} appends"),
            Err(e) => warn!("wal compaction failed: {e}"),
        }
    }
}
