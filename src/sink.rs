//! Tabular sinks: where a successfully extracted row ends up.
//!
//! The core only needs "append one row of 14 strings". [`SheetsSink`] does
//! that with a single Google Sheets `values:append` call; [`MemorySink`]
//! keeps rows in memory for tests and dry runs. There is no idempotency key,
//! so a redelivered webhook produces a duplicate row.

use crate::config::SheetsConfig;
use crate::error::{truncate_chars, ManifestError, MAX_ERROR_BODY_CHARS};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info};

/// Append-only destination for extracted rows.
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Append one row (values in column order).
    async fn append(&self, row: &[String]) -> Result<(), ManifestError>;
}

/// Appends rows to a Google Sheets range.
pub struct SheetsSink {
    client: reqwest::Client,
    config: SheetsConfig,
}

impl SheetsSink {
    pub fn new(config: SheetsConfig, client: reqwest::Client) -> Self {
        Self { client, config }
    }

    /// `{base}/v4/spreadsheets/{id}/values/{range}:append?…`
    pub fn append_url(&self) -> Result<reqwest::Url, ManifestError> {
        let mut url = reqwest::Url::parse(&self.config.api_base_url).map_err(|e| {
            ManifestError::InvalidConfig(format!(
                "bad Sheets base URL '{}': {}",
                self.config.api_base_url, e
            ))
        })?;

        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                ManifestError::InvalidConfig("Sheets base URL cannot have a path".into())
            })?;
            segments
                .pop_if_empty()
                .push("v4")
                .push("spreadsheets")
                .push(&self.config.spreadsheet_id)
                .push("values")
                .push(&format!("{}:append", self.config.range));
        }

        url.query_pairs_mut()
            .append_pair("valueInputOption", "USER_ENTERED")
            .append_pair("insertDataOption", "INSERT_ROWS");
        Ok(url)
    }
}

#[async_trait]
impl RecordSink for SheetsSink {
    async fn append(&self, row: &[String]) -> Result<(), ManifestError> {
        let url = self.append_url()?;
        debug!("Appending {} values to {}", row.len(), self.config.range);

        let response = self
            .client
            .post(url)
            .bearer_auth(&self.config.access_token)
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .json(&json!({ "values": [row] }))
            .send()
            .await
            .map_err(|e| ManifestError::Sink {
                reason: if e.is_timeout() {
                    format!("append timed out after {}s", self.config.timeout_secs)
                } else {
                    e.to_string()
                },
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ManifestError::Sink {
                reason: format!(
                    "HTTP {}: {}",
                    status,
                    truncate_chars(&body, MAX_ERROR_BODY_CHARS)
                ),
            });
        }

        info!("Row appended to sheet {}", self.config.spreadsheet_id);
        Ok(())
    }
}

/// Keeps appended rows in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    rows: Mutex<Vec<Vec<String>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every row appended so far.
    pub fn rows(&self) -> Vec<Vec<String>> {
        self.rows
            .lock()
            .map(|rows| rows.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl RecordSink for MemorySink {
    async fn append(&self, row: &[String]) -> Result<(), ManifestError> {
        self.rows
            .lock()
            .map_err(|e| ManifestError::Internal(format!("sink lock poisoned: {e}")))?
            .push(row.to_vec());
        Ok(())
    }
}
