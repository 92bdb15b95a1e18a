//! Derived view engine -- pure transformations from a snapshot to what the
//! presentation layer shows. No I/O, no timers.

use crate::clock::format_elapsed;
use crate::model::{ExamStatus, ExamineeId, SessionStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};

pub const UNKNOWN_LABEL: &str = "Unknown";

/// Aggregate numbers for the summary header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionCounts {
    /// Active sessions (status is not `done`).
    pub total: usize,
    /// Active sessions whose status is `taking`.
    pub currently_taking: usize,
    /// `done` records in the full snapshot.
    pub recently_done: usize,
}

/// Coarse phase of the exam an examinee is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseCategory {
    AcademicExam,
    PersonalityTest,
    Completed,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseBadge {
    pub label: String,
    pub category: PhaseCategory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusBadge {
    CurrentlyTaking,
    Done,
    Unknown,
}

impl StatusBadge {
    pub fn label(self) -> &'static str {
        match self {
            StatusBadge::CurrentlyTaking => "Currently Taking",
            StatusBadge::Done => "Done",
            StatusBadge::Unknown => UNKNOWN_LABEL,
        }
    }
}

impl std::fmt::Display for StatusBadge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.label())
    }
}

/// One row of the live table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionRow {
    pub examinee_id: ExamineeId,
    pub examinee_name: String,
    pub exam_title: String,
    pub status: StatusBadge,
    pub phase: PhaseBadge,
    /// e.g. "1m 5s ago", or "N/A".
    pub elapsed: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DerivedView {
    pub rows: Vec<SessionRow>,
    pub counts: SessionCounts,
}

/// Records whose status is not `done`, in snapshot order.
pub fn active_sessions(sessions: &[SessionStatus]) -> Vec<&SessionStatus> {
    sessions.iter().filter(|s| !s.status.is_done()).collect()
}

pub fn counts(sessions: &[SessionStatus]) -> SessionCounts {
    let mut c = SessionCounts::default();
    for s in sessions {
        match s.status {
            ExamStatus::Done => c.recently_done += 1,
            ExamStatus::Taking => {
                c.total += 1;
                c.currently_taking += 1;
            }
            ExamStatus::Other => c.total += 1,
        }
    }
    c
}

/// Map a free-form remark to a phase badge. Total: every input yields a badge.
///
/// Known remarks are matched ignoring case and surrounding whitespace.
/// Unrecognised remarks keep their raw text as the label.
pub fn classify_phase(remarks: Option<&str>) -> PhaseBadge {
    let raw = remarks.unwrap_or_default();
    let key = raw.trim().to_ascii_lowercase();

    let known = match key.as_str() {
        "" => {
            return PhaseBadge {
                label: UNKNOWN_LABEL.to_string(),
                category: PhaseCategory::Unknown,
            }
        }
        "in progress" | "academic exam" => Some(("Academic Exam", PhaseCategory::AcademicExam)),
        "personality test" => Some(("Personality Test", PhaseCategory::PersonalityTest)),
        "completed" | "finished" => Some(("Completed", PhaseCategory::Completed)),
        _ => None,
    };

    match known {
        Some((label, category)) => PhaseBadge {
            label: label.to_string(),
            category,
        },
        None => PhaseBadge {
            label: raw.to_string(),
            category: PhaseCategory::Unknown,
        },
    }
}

pub fn classify_status_badge(status: ExamStatus) -> StatusBadge {
    match status {
        ExamStatus::Taking => StatusBadge::CurrentlyTaking,
        ExamStatus::Done => StatusBadge::Done,
        ExamStatus::Other => StatusBadge::Unknown,
    }
}

/// Compute the full view for `sessions` as of `now`.
pub fn derive(sessions: &[SessionStatus], now: DateTime<Utc>) -> DerivedView {
    let rows = active_sessions(sessions)
        .into_iter()
        .map(|s| SessionRow {
            examinee_id: s.examinee_id.clone(),
            examinee_name: s.examinee_name.clone(),
            exam_title: s.exam_title.clone(),
            status: classify_status_badge(s.status),
            phase: classify_phase(s.remarks.as_deref()),
            elapsed: format_elapsed(s.started_at, now),
        })
        .collect();

    DerivedView {
        rows,
        counts: counts(sessions),
    }
}

/// Memoization key: store generation plus live-clock tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewKey {
    pub generation: u64,
    pub tick: u64,
}

/// Holds the last computed view until the snapshot or the clock moves.
#[derive(Debug, Default)]
pub struct ViewCache {
    slot: Mutex<Option<(ViewKey, Arc<DerivedView>)>>,
}

impl ViewCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached view for `key`, or build and cache a fresh one.
    pub fn get_or_compute(
        &self,
        key: ViewKey,
        compute: impl FnOnce() -> DerivedView,
    ) -> Arc<DerivedView> {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((cached_key, view)) = slot.as_ref() {
            if *cached_key == key {
                return Arc::clone(view);
            }
        }
        let view = Arc::new(compute());
        *slot = Some((key, Arc::clone(&view)));
        view
    }
}
