use std::sync::Arc;

use chrono::Utc;
use dorma_engine::HoldManager;
use tokio::time::{interval, Duration};
use tracing::{error, info};

use crate::metrics::EngineMetrics;

/// Background loop enforcing hold deadlines server-side. Client
/// connectivity is irrelevant: a disconnected tenant's hold still expires
/// on schedule, at most one interval late.
pub async fn run_hold_sweeper(
    holds: Arc<HoldManager>,
    metrics: Arc<EngineMetrics>,
    interval_seconds: u64,
) {
    info!(interval_seconds, "hold sweeper started");
    let mut ticker = interval(Duration::from_secs(interval_seconds));

    loop {
        ticker.tick().await;
        match holds.run_sweep_once(Utc::now()).await {
            Ok(expired) => {
                if expired > 0 {
                    metrics.holds_expired_total.inc_by(expired as u64);
                }
            }
            Err(e) => error!("hold sweep failed: {}", e),
        }
    }
}
