use super::{ZoneCache, ZoneSource};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Reload the whole zone table every `period` until `shutdown` fires.
///
/// The first reload happens one full period after start; the initial load is
/// done synchronously during startup. Failures are logged and the previous
/// snapshot keeps serving lookups.
pub async fn run_refresh_loop(
    cache: ZoneCache,
    source: Arc<dyn ZoneSource>,
    period: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                log::info!("zone refresh task stopping");
                return;
            }
            _ = ticker.tick() => {}
        }

        match cache.load(source.as_ref()).await {
            Ok(summary) => log::info!(
                "refreshed zone cache: {} zones in {:?}",
                summary.loaded,
                summary.duration
            ),
            Err(err) => log::error!(
                "zone cache refresh failed, keeping {} cached zones: {}",
                cache.len(),
                err
            ),
        }
    }
}
