use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tokio::time::sleep;

use super::{ActivityWriter, WriteOutcome};
use crate::error::LogError;
use crate::model::{LogEntry, NewActivityLog};

pub const ACTIVITY_LOGS_PATH: &str = "/api/activity-logs";

/// Client for the authenticated activity-log endpoint of `activity-logd`.
#[derive(Debug, Clone)]
pub struct HttpActivityClient {
    client: reqwest::Client,
    base_url: String,
    bearer_token: String,
    max_retries: u32,
}

impl HttpActivityClient {
    pub fn new(base_url: impl Into<String>, bearer_token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            bearer_token: bearer_token.into(),
            max_retries: 2,
        }
    }

    /// Retries apply to transport errors and 5xx answers only.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn endpoint(&self) -> String {
        format!("{}{}", self.base_url, ACTIVITY_LOGS_PATH)
    }

    async fn send_once(&self, req: &NewActivityLog) -> Result<WriteOutcome, LogError> {
        let res = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.bearer_token)
            .json(req)
            .send()
            .await?;
        let status = res.status();
        // 204: the server's own policy filtered the record
        if status == reqwest::StatusCode::NO_CONTENT {
            return Ok(WriteOutcome::Dropped);
        }
        if status.is_success() {
            return Ok(WriteOutcome::Persisted(res.json::<LogEntry>().await?));
        }
        let body: Value = res.json().await.unwrap_or(Value::Null);
        let message = body
            .get("error")
            .and_then(|v| v.as_str())
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed"))
            .to_string();
        Err(LogError::Api { status: status.as_u16(), message })
    }
}

#[async_trait]
impl ActivityWriter for HttpActivityClient {
    async fn write_activity(&self, req: &NewActivityLog) -> Result<WriteOutcome, LogError> {
        let mut attempt = 0;
        loop {
            match self.send_once(req).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    sleep(Duration::from_millis(100 * 2_u64.pow(attempt))).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
