//! Polling scheduler -- fixed-cadence fetches plus on-demand refresh, with at
//! most one fetch in flight at any time.

mod engine;
pub mod state;

pub use self::state::{BeginError, FetchKind, MonitorState, Phase};

use crate::clock::WallClock;
use crate::source::{FetchError, StatusSource};
use crate::store::SnapshotStore;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Fixed polling cadence of the status source.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(15_000);

/// Result of [`PollingScheduler::refresh_now`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RefreshOutcome {
    /// A fresh snapshot with this many records was stored.
    Refreshed { sessions: usize },
    /// The fetch failed; the previous snapshot is still in place.
    Failed {
        #[serde(serialize_with = "error_as_string")]
        error: FetchError,
    },
    /// A fetch was already running. No second request was made; this
    /// resolves when that fetch completes.
    Coalesced { in_flight: FetchKind },
    /// The scheduler has never been started, or has been shut down.
    Rejected,
}

fn error_as_string<S: serde::Serializer>(e: &FetchError, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(e)
}

pub(crate) struct Shared {
    pub(crate) source: Arc<dyn StatusSource>,
    pub(crate) store: SnapshotStore,
    pub(crate) clock: WallClock,
    pub(crate) interval: Duration,
    control: Mutex<Control>,
    refreshing: watch::Sender<bool>,
    /// Bumped each time a fetch releases the slot.
    completed: watch::Sender<u64>,
}

#[derive(Default)]
struct Control {
    state: MonitorState,
    timer: Option<JoinHandle<()>>,
}

impl Shared {
    fn control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim the fetch slot. The refreshing flag flips under the same lock.
    pub(crate) fn try_begin(self: &Arc<Self>, kind: FetchKind) -> Result<FetchGuard, BeginError> {
        self.claim(kind).0
    }

    /// Like [`Shared::try_begin`], also returning a completion receiver
    /// subscribed under the lock. When the slot is busy, its next change is
    /// the end of exactly the fetch that holds the slot now.
    fn claim(
        self: &Arc<Self>,
        kind: FetchKind,
    ) -> (Result<FetchGuard, BeginError>, watch::Receiver<u64>) {
        let mut control = self.control();
        let completions = self.completed.subscribe();
        let claimed = control.state.begin_fetch(kind).map(|()| {
            self.refreshing.send_replace(true);
            FetchGuard {
                shared: Arc::clone(self),
                kind,
            }
        });
        (claimed, completions)
    }

    fn finish(&self) {
        let mut control = self.control();
        control.state.finish_fetch();
        self.refreshing.send_replace(false);
        self.completed.send_modify(|n| *n = n.wrapping_add(1));
    }
}

/// Holds the fetch slot. Dropping it releases the slot, whether the fetch
/// finished, failed, or its task was torn down.
pub(crate) struct FetchGuard {
    pub(crate) shared: Arc<Shared>,
    pub(crate) kind: FetchKind,
}

impl Drop for FetchGuard {
    fn drop(&mut self) {
        self.shared.finish();
    }
}

/// Drives fetches against a [`StatusSource`] and writes results into a
/// [`SnapshotStore`]. Cheap to clone; clones share one state machine.
#[derive(Clone)]
pub struct PollingScheduler {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for PollingScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollingScheduler")
            .field("state", &self.state())
            .field("interval", &self.shared.interval)
            .finish()
    }
}

impl PollingScheduler {
    pub fn new(source: Arc<dyn StatusSource>, store: SnapshotStore) -> Self {
        Self::with_interval(source, store, DEFAULT_POLL_INTERVAL)
    }

    pub fn with_interval(
        source: Arc<dyn StatusSource>,
        store: SnapshotStore,
        interval: Duration,
    ) -> Self {
        Self::build(source, store, interval, WallClock::System)
    }

    pub(crate) fn build(
        source: Arc<dyn StatusSource>,
        store: SnapshotStore,
        interval: Duration,
        clock: WallClock,
    ) -> Self {
        let (refreshing, _) = watch::channel(false);
        let (completed, _) = watch::channel(0);
        Self {
            shared: Arc::new(Shared {
                source,
                store,
                clock,
                interval,
                control: Mutex::new(Control::default()),
                refreshing,
                completed,
            }),
        }
    }

    /// Fetch immediately, then every interval. No effect if already polling
    /// or shut down.
    pub fn start(&self) {
        let mut control = self.shared.control();
        if !control.state.start() {
            debug!(phase = %control.state.phase(), "Start ignored");
            return;
        }
        let weak = Arc::downgrade(&self.shared);
        control.timer = Some(tokio::spawn(engine::run_poll_loop(weak)));
        info!(
            interval_ms = self.shared.interval.as_millis() as u64,
            "Polling started"
        );
    }

    /// Cancel the repeating schedule. A fetch already in flight is left to finish.
    pub fn stop(&self) {
        let mut control = self.shared.control();
        if !control.state.stop() {
            return;
        }
        if let Some(timer) = control.timer.take() {
            timer.abort();
        }
        info!(
            in_flight = control.state.in_flight().is_some(),
            "Polling paused"
        );
    }

    /// Cancel polling for good. A fetch already in flight may finish but
    /// no new fetch, scheduled or manual, is accepted afterwards.
    pub fn shutdown(&self) {
        let mut control = self.shared.control();
        if !control.state.close() {
            return;
        }
        if let Some(timer) = control.timer.take() {
            timer.abort();
        }
        info!(
            in_flight = control.state.in_flight().is_some(),
            "Scheduler shut down"
        );
    }

    /// Out-of-band fetch. Never starts a second concurrent request.
    pub async fn refresh_now(&self) -> RefreshOutcome {
        let (claimed, mut completions) = self.shared.claim(FetchKind::Manual);
        match claimed {
            Ok(guard) => {
                // The fetch runs on its own task so a dropped caller cannot
                // strand the slot half-way through.
                let handle = tokio::spawn(engine::run_fetch(guard));
                match handle.await {
                    Ok(Ok(sessions)) => RefreshOutcome::Refreshed { sessions },
                    Ok(Err(error)) => RefreshOutcome::Failed { error },
                    Err(e) => {
                        warn!(error = %e, "Manual fetch task did not complete");
                        RefreshOutcome::Failed {
                            error: FetchError::Aborted,
                        }
                    }
                }
            }
            Err(BeginError::Busy(in_flight)) => {
                debug!(%in_flight, "Refresh requested while a fetch is in flight");
                // Err only if the sender is gone, which cannot outlive `self`.
                let _ = completions.changed().await;
                RefreshOutcome::Coalesced { in_flight }
            }
            Err(reason) => {
                debug!(?reason, "Refresh requested while the scheduler is not running");
                RefreshOutcome::Rejected
            }
        }
    }

    pub fn state(&self) -> MonitorState {
        self.shared.control().state
    }

    pub fn phase(&self) -> Phase {
        self.state().phase()
    }

    pub fn is_refreshing(&self) -> bool {
        *self.shared.refreshing.borrow()
    }

    /// Follow the refreshing flag, e.g. to disable a refresh button.
    pub fn subscribe_refreshing(&self) -> watch::Receiver<bool> {
        self.shared.refreshing.subscribe()
    }

    pub fn interval(&self) -> Duration {
        self.shared.interval
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.shared.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ExamStatus, ExamineeId, SessionStatus};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Semaphore;

    /// Counts calls; each fetch waits for a permit when gated.
    struct FakeSource {
        calls: AtomicUsize,
        gate: Option<Semaphore>,
        fail: bool,
    }

    impl FakeSource {
        fn open() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                gate: None,
                fail: false,
            })
        }

        fn gated() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                gate: Some(Semaphore::new(0)),
                fail: false,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                gate: None,
                fail: true,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn release(&self) {
            if let Some(gate) = &self.gate {
                gate.add_permits(1);
            }
        }
    }

    #[async_trait::async_trait]
    impl StatusSource for FakeSource {
        async fn fetch(&self) -> Result<Vec<SessionStatus>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.acquire().await.map_err(|_| FetchError::Aborted)?.forget();
            }
            if self.fail {
                return Err(FetchError::Transport("connection refused".to_string()));
            }
            Ok(vec![SessionStatus {
                examinee_id: ExamineeId::from(1),
                examinee_name: "A".to_string(),
                exam_title: "T".to_string(),
                status: ExamStatus::Taking,
                started_at: None,
                remarks: None,
            }])
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    fn scheduler(source: Arc<FakeSource>) -> PollingScheduler {
        PollingScheduler::new(source, SnapshotStore::new())
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_fetches_immediately_then_every_interval() {
        let source = FakeSource::open();
        let sched = scheduler(source.clone());
        sched.start();
        settle().await;
        assert_eq!(source.calls(), 1);
        assert_eq!(sched.store().generation(), 1);

        tokio::time::sleep(DEFAULT_POLL_INTERVAL).await;
        assert_eq!(source.calls(), 2);
        tokio::time::sleep(DEFAULT_POLL_INTERVAL * 2).await;
        assert_eq!(source.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_twice_has_no_extra_effect() {
        let source = FakeSource::open();
        let sched = scheduler(source.clone());
        sched.start();
        sched.start();
        settle().await;
        tokio::time::sleep(DEFAULT_POLL_INTERVAL).await;
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_fetch_after_stop() {
        let source = FakeSource::open();
        let sched = scheduler(source.clone());
        sched.start();
        settle().await;
        sched.stop();
        assert_eq!(sched.phase(), Phase::Paused);

        tokio::time::sleep(DEFAULT_POLL_INTERVAL * 5).await;
        assert_eq!(source.calls(), 1);

        sched.start();
        settle().await;
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_does_not_cancel_in_flight_fetch() {
        let source = FakeSource::gated();
        let sched = scheduler(source.clone());
        sched.start();
        settle().await;
        assert!(sched.is_refreshing());

        sched.stop();
        source.release();
        settle().await;
        assert!(!sched.is_refreshing());
        assert_eq!(sched.store().generation(), 1);
        assert_eq!(sched.state(), MonitorState::Paused { in_flight: None });
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_before_start_is_rejected() {
        let source = FakeSource::open();
        let sched = scheduler(source.clone());
        assert_eq!(sched.refresh_now().await, RefreshOutcome::Rejected);
        assert_eq!(source.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_while_paused() {
        let source = FakeSource::open();
        let sched = scheduler(source.clone());
        sched.start();
        settle().await;
        sched.stop();

        let outcome = sched.refresh_now().await;
        assert_eq!(outcome, RefreshOutcome::Refreshed { sessions: 1 });
        assert_eq!(source.calls(), 2);
        assert_eq!(sched.phase(), Phase::Paused);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_coalesces_with_in_flight_fetch() {
        let source = FakeSource::gated();
        let sched = scheduler(source.clone());
        sched.start();
        settle().await;
        assert_eq!(source.calls(), 1);

        let mut pending = tokio_test::task::spawn(sched.refresh_now());
        tokio_test::assert_pending!(pending.poll());

        source.release();
        settle().await;
        assert!(pending.is_woken());
        let outcome = tokio_test::assert_ready!(pending.poll());
        assert_eq!(
            outcome,
            RefreshOutcome::Coalesced {
                in_flight: FetchKind::Scheduled
            }
        );
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_tick_skipped_while_manual_in_flight() {
        let source = FakeSource::gated();
        let sched = scheduler(source.clone());
        sched.start();
        settle().await;
        source.release();
        settle().await;
        assert_eq!(source.calls(), 1);

        let refresh = tokio::spawn({
            let sched = sched.clone();
            async move { sched.refresh_now().await }
        });
        settle().await;
        assert_eq!(sched.phase(), Phase::ManualRefresh);

        // Two intervals pass while the manual fetch is held open.
        tokio::time::sleep(DEFAULT_POLL_INTERVAL * 2).await;
        assert_eq!(source.calls(), 2);

        source.release();
        assert_eq!(
            refresh.await.unwrap(),
            RefreshOutcome::Refreshed { sessions: 1 }
        );
        assert_eq!(sched.phase(), Phase::Polling);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_recorded_and_release_the_flag() {
        let source = FakeSource::failing();
        let sched = scheduler(source.clone());
        sched.start();
        settle().await;

        let outcome = sched.refresh_now().await;
        assert!(matches!(outcome, RefreshOutcome::Failed { .. }));
        assert!(!sched.is_refreshing());

        let state = sched.store().current();
        assert!(state.snapshot.is_none());
        assert!(state.last_error.is_some());

        // Still polling after failures.
        tokio::time::sleep(DEFAULT_POLL_INTERVAL).await;
        assert_eq!(source.calls(), 3);
        assert_eq!(sched.phase(), Phase::Polling);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_all_handles_ends_timer() {
        let source = FakeSource::open();
        let sched = scheduler(source.clone());
        sched.start();
        settle().await;
        drop(sched);
        tokio::time::sleep(DEFAULT_POLL_INTERVAL * 3).await;
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_racing_stop_does_not_fetch() {
        let source = FakeSource::open();
        let sched = scheduler(source.clone());
        sched.start();
        settle().await;

        // A tick that already fired but lost the lock to stop().
        sched.stop();
        assert!(matches!(
            sched.shared.try_begin(FetchKind::Scheduled),
            Err(BeginError::Paused)
        ));
        assert!(!sched.is_refreshing());
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_coalesced_waiter_ignores_later_fetches() {
        let source = FakeSource::gated();
        let sched = scheduler(source.clone());
        sched.start();
        settle().await;

        let mut pending = tokio_test::task::spawn(sched.refresh_now());
        tokio_test::assert_pending!(pending.poll());

        // The first fetch ends and a second one claims the slot before the
        // waiter gets to run again.
        source.release();
        settle().await;
        let second = sched.shared.try_begin(FetchKind::Scheduled).ok();
        assert!(second.is_some());
        assert!(sched.is_refreshing());

        let outcome = tokio_test::assert_ready!(pending.poll());
        assert_eq!(
            outcome,
            RefreshOutcome::Coalesced {
                in_flight: FetchKind::Scheduled
            }
        );
        drop(second);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_refuses_start_and_refresh() {
        let source = FakeSource::open();
        let sched = scheduler(source.clone());
        sched.start();
        settle().await;

        sched.shutdown();
        assert_eq!(sched.phase(), Phase::Closed);
        sched.start();
        assert_eq!(sched.phase(), Phase::Closed);
        assert_eq!(sched.refresh_now().await, RefreshOutcome::Rejected);

        tokio::time::sleep(DEFAULT_POLL_INTERVAL * 3).await;
        assert_eq!(source.calls(), 1);
    }
}
