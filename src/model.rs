//! Session-status records as reported by the status source.
//!
//! Records are created and mutated only upstream. This crate never edits a
//! record; it replaces whole snapshots and classifies what it sees.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Stable examinee identifier, unique within one snapshot.
///
/// Upstream sends either a JSON string or an integer; both normalise to text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ExamineeId(String);

impl ExamineeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ExamineeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(&self.0)
    }
}

impl From<u64> for ExamineeId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl<'de> Deserialize<'de> for ExamineeId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Int(i64),
            Text(String),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Int(n) => Self(n.to_string()),
            Raw::Text(s) => Self(s),
        })
    }
}

/// Where an examinee is in the exam lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExamStatus {
    Taking,
    Done,
    /// Any value upstream sends that we do not recognise.
    #[serde(other)]
    Other,
}

impl ExamStatus {
    pub fn is_done(self) -> bool {
        matches!(self, ExamStatus::Done)
    }
}

impl std::fmt::Display for ExamStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExamStatus::Taking => write!(f, "taking"),
            ExamStatus::Done => write!(f, "done"),
            ExamStatus::Other => write!(f, "other"),
        }
    }
}

/// One tracked examinee.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub examinee_id: ExamineeId,
    #[serde(default)]
    pub examinee_name: String,
    #[serde(default)]
    pub exam_title: String,
    pub status: ExamStatus,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub started_at: Option<DateTime<Utc>>,
    /// Free-form phase descriptor, e.g. "Personality Test".
    #[serde(default)]
    pub remarks: Option<String>,
}

/// The complete record set returned by one successful poll.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub sessions: Vec<SessionStatus>,
    /// When the fetch that produced this snapshot completed.
    pub fetched_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn new(sessions: Vec<SessionStatus>, fetched_at: DateTime<Utc>) -> Self {
        Self {
            sessions,
            fetched_at,
        }
    }
}

/// Accepts RFC 3339 or `YYYY-MM-DD HH:MM:SS` (taken as UTC).
/// Anything else, including null, becomes `None` instead of failing the fetch.
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(parse_timestamp))
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}
