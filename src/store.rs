//! Snapshot store -- single writer, many readers.
//!
//! Every write replaces the whole [`StoreState`] in one `watch` send, so a
//! reader sees either the previous complete state or the next one.

use crate::model::{SessionStatus, Snapshot};
use crate::source::FetchError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

/// The most recent failed fetch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetchFailure {
    #[serde(serialize_with = "error_as_string")]
    pub error: FetchError,
    pub at: DateTime<Utc>,
}

fn error_as_string<S: serde::Serializer>(e: &FetchError, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(e)
}

#[derive(Debug, Clone, Default)]
pub struct StoreState {
    /// `None` until the first successful fetch.
    pub snapshot: Option<Arc<Snapshot>>,
    pub last_error: Option<FetchFailure>,
    /// Bumped on every successful replacement.
    pub generation: u64,
}

impl StoreState {
    /// Sessions in the current snapshot, empty before the first fetch.
    pub fn sessions(&self) -> &[SessionStatus] {
        self.snapshot
            .as_deref()
            .map(|s| s.sessions.as_slice())
            .unwrap_or(&[])
    }

    pub fn fetched_at(&self) -> Option<DateTime<Utc>> {
        self.snapshot.as_ref().map(|s| s.fetched_at)
    }
}

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    tx: Arc<watch::Sender<StoreState>>,
    closed: Arc<AtomicBool>,
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotStore {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(StoreState::default());
        Self {
            tx: Arc::new(tx),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Clone of the current state.
    pub fn current(&self) -> StoreState {
        self.tx.borrow().clone()
    }

    pub fn generation(&self) -> u64 {
        self.tx.borrow().generation
    }

    pub fn subscribe(&self) -> watch::Receiver<StoreState> {
        self.tx.subscribe()
    }

    /// Replace the snapshot with `sessions` and clear any recorded error.
    /// Returns `false` once the store has been closed.
    pub fn apply_success(&self, sessions: Vec<SessionStatus>, fetched_at: DateTime<Utc>) -> bool {
        if self.is_closed() {
            debug!("Store closed; discarding fetched snapshot");
            return false;
        }
        let snapshot = Arc::new(Snapshot::new(sessions, fetched_at));
        self.tx.send_modify(|state| {
            state.snapshot = Some(snapshot);
            state.last_error = None;
            state.generation += 1;
        });
        true
    }

    /// Record a failed fetch. The snapshot is left untouched.
    pub fn apply_failure(&self, error: FetchError, at: DateTime<Utc>) -> bool {
        if self.is_closed() {
            return false;
        }
        self.tx.send_modify(|state| {
            state.last_error = Some(FetchFailure { error, at });
        });
        true
    }

    /// Teardown. Later writes become no-ops.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
