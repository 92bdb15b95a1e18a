use super::{BeginError, FetchGuard, FetchKind, Shared};
use crate::source::FetchError;
use std::sync::Weak;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

/// Repeating timer. Each tick tries to claim the fetch slot and hands the
/// fetch to its own task, so aborting this loop never cancels a request.
///
/// Holds only a weak reference; the loop ends once every scheduler handle
/// is gone.
pub(crate) async fn run_poll_loop(shared: Weak<Shared>) {
    let Some(interval) = shared.upgrade().map(|s| s.interval) else {
        return;
    };
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let Some(shared) = shared.upgrade() else {
            debug!("Scheduler dropped; poll loop exiting");
            return;
        };

        match shared.try_begin(FetchKind::Scheduled) {
            Ok(guard) => {
                tokio::spawn(run_fetch(guard));
            }
            Err(BeginError::Busy(in_flight)) => {
                debug!(%in_flight, "Fetch already in flight; skipping tick");
            }
            Err(BeginError::Paused | BeginError::Closed) => {
                debug!("Polling no longer active; poll loop exiting");
                return;
            }
            Err(BeginError::NotStarted) => {
                error!("Poll loop running while scheduler is idle");
                return;
            }
        }
    }
}

/// One fetch against the status source. On success the snapshot is
/// replaced; on failure the error is recorded and the snapshot kept. A
/// result arriving after shutdown is dropped and reported as discarded.
/// The slot is released when `guard` drops, after the store write.
pub(crate) async fn run_fetch(guard: FetchGuard) -> Result<usize, FetchError> {
    let fetch_id = Uuid::new_v4();
    let span = tracing::info_span!("fetch", %fetch_id, kind = %guard.kind);

    async move {
        let shared = &guard.shared;
        let result = shared.source.fetch().await;
        let completed_at = shared.clock.now();

        match result {
            Ok(sessions) => {
                let count = sessions.len();
                if !shared.store.apply_success(sessions, completed_at) {
                    debug!(sessions = count, "Store closed; result discarded");
                    return Err(FetchError::Discarded);
                }
                info!(sessions = count, "Snapshot replaced");
                Ok(count)
            }
            Err(e) => {
                warn!(error = %e, "Fetch failed; keeping previous snapshot");
                shared.store.apply_failure(e.clone(), completed_at);
                Err(e)
            }
        }
    }
    .instrument(span)
    .await
}
