//! Monitoring state machine.
//!
//! `Idle -> Polling <-> Paused -> Closed`. Polling and Paused may carry one
//! fetch in flight; a manual one is the `ManualRefresh` sub-state. Idle never
//! has a fetch in flight, so "refreshing while stopped-and-idle" cannot be
//! built. Closed is terminal: it only lets an in-flight fetch drain.

use serde::Serialize;

/// Who started the fetch currently in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchKind {
    Scheduled,
    Manual,
}

impl std::fmt::Display for FetchKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchKind::Scheduled => write!(f, "scheduled"),
            FetchKind::Manual => write!(f, "manual"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MonitorState {
    #[default]
    Idle,
    Polling {
        in_flight: Option<FetchKind>,
    },
    Paused {
        in_flight: Option<FetchKind>,
    },
    Closed {
        in_flight: Option<FetchKind>,
    },
}

/// Coarse, externally reported phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Polling,
    Paused,
    ManualRefresh,
    Closed,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Idle => write!(f, "idle"),
            Phase::Polling => write!(f, "polling"),
            Phase::Paused => write!(f, "paused"),
            Phase::ManualRefresh => write!(f, "manual_refresh"),
            Phase::Closed => write!(f, "closed"),
        }
    }
}

/// Why a fetch could not begin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeginError {
    /// The monitor has never been started.
    NotStarted,
    /// Another fetch holds the slot.
    Busy(FetchKind),
    /// Scheduled fetches are off until polling resumes.
    Paused,
    /// The monitor has been shut down.
    Closed,
}

impl MonitorState {
    pub fn phase(&self) -> Phase {
        match self {
            MonitorState::Idle => Phase::Idle,
            MonitorState::Closed { .. } => Phase::Closed,
            MonitorState::Polling {
                in_flight: Some(FetchKind::Manual),
            }
            | MonitorState::Paused {
                in_flight: Some(FetchKind::Manual),
            } => Phase::ManualRefresh,
            MonitorState::Polling { .. } => Phase::Polling,
            MonitorState::Paused { .. } => Phase::Paused,
        }
    }

    pub fn in_flight(&self) -> Option<FetchKind> {
        match self {
            MonitorState::Idle => None,
            MonitorState::Polling { in_flight }
            | MonitorState::Paused { in_flight }
            | MonitorState::Closed { in_flight } => *in_flight,
        }
    }

    pub fn is_refreshing(&self) -> bool {
        self.in_flight().is_some()
    }

    /// `Idle | Paused -> Polling`. Returns `false` if already polling or closed.
    pub fn start(&mut self) -> bool {
        match *self {
            MonitorState::Idle => {
                *self = MonitorState::Polling { in_flight: None };
                true
            }
            MonitorState::Paused { in_flight } => {
                *self = MonitorState::Polling { in_flight };
                true
            }
            MonitorState::Polling { .. } | MonitorState::Closed { .. } => false,
        }
    }

    /// `Polling -> Paused`, keeping any fetch in flight. Returns `false` otherwise.
    pub fn stop(&mut self) -> bool {
        match *self {
            MonitorState::Polling { in_flight } => {
                *self = MonitorState::Paused { in_flight };
                true
            }
            _ => false,
        }
    }

    /// Any state -> `Closed`, keeping any fetch in flight so its slot can
    /// still be released. Returns `false` if already closed.
    pub fn close(&mut self) -> bool {
        if matches!(self, MonitorState::Closed { .. }) {
            return false;
        }
        *self = MonitorState::Closed {
            in_flight: self.in_flight(),
        };
        true
    }

    /// Claim the single fetch slot. Scheduled fetches need `Polling`;
    /// manual ones also run while paused.
    pub fn begin_fetch(&mut self, kind: FetchKind) -> Result<(), BeginError> {
        let slot = match (self, kind) {
            (MonitorState::Idle, _) => return Err(BeginError::NotStarted),
            (MonitorState::Closed { .. }, _) => return Err(BeginError::Closed),
            (MonitorState::Paused { .. }, FetchKind::Scheduled) => {
                return Err(BeginError::Paused)
            }
            (MonitorState::Polling { in_flight } | MonitorState::Paused { in_flight }, _) => {
                in_flight
            }
        };
        if let Some(current) = *slot {
            return Err(BeginError::Busy(current));
        }
        *slot = Some(kind);
        Ok(())
    }

    /// Release the fetch slot, staying in whichever of Polling/Paused/Closed we are in.
    pub fn finish_fetch(&mut self) -> Option<FetchKind> {
        match self {
            MonitorState::Idle => None,
            MonitorState::Polling { in_flight }
            | MonitorState::Paused { in_flight }
            | MonitorState::Closed { in_flight } => in_flight.take(),
        }
    }
}
