use crate::recruit_logic::state::AppState;
use std::time::Duration;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;

/// Periodically drops expired entries and reports queue sizes.
pub async fn run(check_every: Duration, app_state: AppState, shutdown: CancellationToken) {
    let mut check_interval = interval(check_every);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                log::info!("Monitor service received shutdown signal.");
                break;
            }
            _ = check_interval.tick() => report(&app_state).await,
        }
    }
}

async fn report(app_state: &AppState) {
    let pruned = app_state.queues.prune_all();
    if pruned > 0 {
        log::info!("Pruned {} expired entries.", pruned);
    }

    let sizes = app_state.queues.sizes();
    let total: usize = sizes.iter().map(|(_, len)| len).sum();
    log::info!(
        "{} queues, {} entries queued, stream {:?}",
        sizes.len(),
        total,
        app_state.stream_state().await
    );
    for (id, len) in sizes {
        log::debug!("Queue {}: {} entries", id, len);
    }

    let rate = app_state.client.rate_snapshot();
    if rate.remaining.is_some_and(|r| r <= 1) {
        log::warn!("API bucket nearly exhausted: {:?}", rate);
    }
}
