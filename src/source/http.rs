use super::{FetchError, StatusEnvelope, StatusSource};
use crate::model::SessionStatus;
use anyhow::{Context, Result};
use reqwest::Client;
use std::time::{Duration, Instant};
use tracing::debug;

/// Polls a JSON endpoint answering `{ success, data: SessionStatus[] }`.
pub struct HttpStatusSource {
    client: Client,
    url: String,
    timeout: Option<Duration>,
}

impl HttpStatusSource {
    /// Build a source for `url`. `timeout` bounds each request; `None` leaves
    /// requests unbounded.
    pub fn new(url: impl Into<String>, timeout: Option<Duration>) -> Result<Self> {
        let mut builder = Client::builder().user_agent(concat!(
            env!("CARGO_PKG_NAME"),
            "/",
            env!("CARGO_PKG_VERSION")
        ));
        if let Some(t) = timeout {
            builder = builder.timeout(t);
        }
        let client = builder.build().context("Failed to build HTTP client")?;

        let url = url.into();
        let url = if url.starts_with("http://") || url.starts_with("https://") {
            url
        } else {
            format!("http://{}", url)
        };

        Ok(Self {
            client,
            url,
            timeout,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn map_transport(&self, e: reqwest::Error) -> FetchError {
        match self.timeout {
            Some(t) if e.is_timeout() => FetchError::Timeout(t.as_millis() as u64),
            _ => FetchError::Transport(e.to_string()),
        }
    }
}

#[async_trait::async_trait]
impl StatusSource for HttpStatusSource {
    async fn fetch(&self) -> Result<Vec<SessionStatus>, FetchError> {
        let start = Instant::now();
        let resp = self
            .client
            .get(&self.url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body = resp.bytes().await.map_err(|e| self.map_transport(e))?;
        let envelope: StatusEnvelope =
            serde_json::from_slice(&body).map_err(|e| FetchError::Decode(e.to_string()))?;
        let sessions = envelope.into_sessions()?;

        debug!(
            url = %self.url,
            sessions = sessions.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Status source answered"
        );
        Ok(sessions)
    }
}
