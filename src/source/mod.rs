//! Status source -- the external query that reports in-progress sessions.

pub mod http;

use crate::model::SessionStatus;
use serde::Deserialize;
use thiserror::Error;

pub use self::http::HttpStatusSource;

/// A failed poll. Always recoverable: the previous snapshot stays in place
/// and the next scheduled or manual fetch retries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("status source returned HTTP {0}")]
    Status(u16),

    #[error("malformed status payload: {0}")]
    Decode(String),

    #[error("status source reported failure{}", detail(.message))]
    Rejected { message: Option<String> },

    #[error("fetch timed out after {0} ms")]
    Timeout(u64),

    #[error("fetch task aborted before completing")]
    Aborted,

    #[error("fetch result discarded after shutdown")]
    Discarded,
}

fn detail(message: &Option<String>) -> String {
    message
        .as_deref()
        .map(|m| format!(": {m}"))
        .unwrap_or_default()
}

/// Response envelope: `{ success, data }`.
#[derive(Debug, Deserialize)]
pub struct StatusEnvelope {
    pub success: bool,
    #[serde(default)]
    pub data: Option<Vec<SessionStatus>>,
    #[serde(default)]
    pub message: Option<String>,
}

impl StatusEnvelope {
    /// Unwrap the envelope, turning `success: false` into a fetch failure.
    pub fn into_sessions(self) -> Result<Vec<SessionStatus>, FetchError> {
        if !self.success {
            return Err(FetchError::Rejected {
                message: self.message,
            });
        }
        Ok(self.data.unwrap_or_default())
    }
}

/// Read-only query returning the current set of tracked sessions.
#[async_trait::async_trait]
pub trait StatusSource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<SessionStatus>, FetchError>;
}
