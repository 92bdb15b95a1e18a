//! Monitor controller -- owns the store, the polling scheduler, the live
//! clock and the memoized view, and exposes them as one unit with an
//! explicit start/pause/resume/shutdown lifecycle.

use crate::clock::{LiveClock, WallClock};
use crate::config::MonitorConfig;
use crate::scheduler::{MonitorState, Phase, PollingScheduler, RefreshOutcome};
use crate::source::{HttpStatusSource, StatusSource};
use crate::store::{FetchFailure, SnapshotStore, StoreState};
use crate::view::{self, DerivedView, ViewCache, ViewKey};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

/// Point-in-time status of the monitor, for headers and indicators.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitorStatus {
    pub phase: Phase,
    pub refreshing: bool,
    pub fetched_at: Option<DateTime<Utc>>,
    /// Set while the most recent fetch failed; the view is then stale.
    pub last_error: Option<FetchFailure>,
    pub generation: u64,
    pub poll_interval_ms: u64,
}

pub struct Monitor {
    store: SnapshotStore,
    scheduler: PollingScheduler,
    clock: LiveClock,
    views: ViewCache,
    wall: WallClock,
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("scheduler", &self.scheduler)
            .field("clock", &self.clock)
            .finish()
    }
}

impl Monitor {
    pub fn new(source: Arc<dyn StatusSource>, poll_interval: Duration, tick: Duration) -> Self {
        Self::with_wall_clock(source, poll_interval, tick, WallClock::System)
    }

    /// Like [`Monitor::new`] but with an explicit source of "now".
    pub fn with_wall_clock(
        source: Arc<dyn StatusSource>,
        poll_interval: Duration,
        tick: Duration,
        wall: WallClock,
    ) -> Self {
        let store = SnapshotStore::new();
        let scheduler = PollingScheduler::build(source, store.clone(), poll_interval, wall);
        Self {
            store,
            scheduler,
            clock: LiveClock::new(tick),
            views: ViewCache::new(),
            wall,
        }
    }

    /// Build a monitor polling the HTTP source named in `config`.
    pub fn from_config(config: &MonitorConfig) -> Result<Self> {
        let source = HttpStatusSource::new(&config.source.url, config.source.request_timeout())?;
        info!(url = %source.url(), "Monitoring status source");
        Ok(Self::new(
            Arc::new(source),
            config.polling.interval(),
            config.polling.tick(),
        ))
    }

    /// Start polling and the live clock. No effect after shutdown.
    pub fn start(&self) {
        if self.store.is_closed() {
            debug!("Monitor is shut down; start ignored");
            return;
        }
        self.scheduler.start();
        self.clock.start();
    }

    /// Stop automatic polling. Elapsed labels keep updating.
    pub fn pause(&self) {
        self.scheduler.stop();
    }

    pub fn resume(&self) {
        self.start();
    }

    pub async fn refresh_now(&self) -> RefreshOutcome {
        self.scheduler.refresh_now().await
    }

    /// Stop both timers and discard results of any fetch still in flight.
    /// Terminal: later start, resume and refresh calls do nothing.
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
        self.clock.stop();
        self.store.close();
        info!("Monitor shut down");
    }

    /// Current derived view, recomputed only when the snapshot or the
    /// live clock has moved since the last call.
    pub fn view(&self) -> Arc<DerivedView> {
        let state = self.store.current();
        let key = ViewKey {
            generation: state.generation,
            tick: self.clock.ticks(),
        };
        self.views
            .get_or_compute(key, || view::derive(state.sessions(), self.wall.now()))
    }

    pub fn status(&self) -> MonitorStatus {
        let state = self.store.current();
        MonitorStatus {
            phase: self.scheduler.phase(),
            refreshing: self.scheduler.is_refreshing(),
            fetched_at: state.fetched_at(),
            last_error: state.last_error,
            generation: state.generation,
            poll_interval_ms: self.scheduler.interval().as_millis() as u64,
        }
    }

    pub fn state(&self) -> MonitorState {
        self.scheduler.state()
    }

    pub fn subscribe_store(&self) -> watch::Receiver<StoreState> {
        self.store.subscribe()
    }

    pub fn subscribe_ticks(&self) -> watch::Receiver<u64> {
        self.clock.subscribe()
    }

    pub fn subscribe_refreshing(&self) -> watch::Receiver<bool> {
        self.scheduler.subscribe_refreshing()
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.scheduler.shutdown();
        self.clock.stop();
        self.store.close();
    }
}
