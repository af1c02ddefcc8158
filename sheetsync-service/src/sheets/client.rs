//! Google Sheets v4 values API client.

use crate::config::SheetsConfig;
use crate::models::SheetRow;
use crate::services::metrics::SHEETS_API_DURATION;
use crate::sheets::{SheetAdapter, SheetError};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use service_core::retry::{RetryConfig, retry_call};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};

/// Response shape of `spreadsheets.values.get`.
#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Client for the Google Sheets values API.
///
/// Owns the token lifecycle (one refresh on auth failure, then surface) and
/// the bounded retry policy for transient transport errors. Everything else
/// is surfaced as a classified [`SheetError`].
pub struct GoogleSheetsClient {
    http: reqwest::Client,
    api_base: String,
    token_url: String,
    access_token: RwLock<Option<String>>,
    refresh_token: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    retry: RetryConfig,
    append_attempts: u32,
}

impl GoogleSheetsClient {
    pub fn new(config: &SheetsConfig) -> Result<Self, SheetError> {
        if config.access_token.is_none() && config.refresh_token.is_none() {
            return Err(SheetError::Config(
                "Sheets credentials missing: set SHEETS_ACCESS_TOKEN or SHEETS_REFRESH_TOKEN"
                    .to_string(),
            ));
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| SheetError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            api_base: config.api_base_url.trim_end_matches('/').to_string(),
            token_url: config.oauth_token_url.clone(),
            access_token: RwLock::new(config.access_token.clone()),
            refresh_token: config.refresh_token.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            retry: RetryConfig::with_max_retries(config.max_transient_retries),
            append_attempts: config.max_append_attempts.max(1),
        })
    }

    async fn current_token(&self) -> Result<String, SheetError> {
        if let Some(token) = self.access_token.read().await.clone() {
            return Ok(token);
        }
        self.refresh_access_token().await
    }

    /// Exchange the refresh token for a fresh access token.
    #[instrument(skip(self))]
    async fn refresh_access_token(&self) -> Result<String, SheetError> {
        let (refresh_token, client_id, client_secret) = match (
            &self.refresh_token,
            &self.client_id,
            &self.client_secret,
        ) {
            (Some(r), Some(id), Some(secret)) => (r, id, secret),
            _ => {
                return Err(SheetError::Auth(
                    "Access token expired and no refresh credentials configured".to_string(),
                ))
            }
        };

        let response = self
            .http
            .post(&self.token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.as_str()),
                ("client_id", client_id.as_str()),
                ("client_secret", client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(|e| SheetError::Transient(format!("Token refresh request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SheetError::Auth(format!(
                "Token refresh rejected ({}): {}",
                status, body
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| SheetError::Auth(format!("Malformed token response: {}", e)))?;

        *self.access_token.write().await = Some(token.access_token.clone());
        info!("Sheets access token refreshed");
        Ok(token.access_token)
    }

    /// Translate an HTTP failure status into the error taxonomy.
    async fn classify_response(
        response: reqwest::Response,
        context: &str,
    ) -> Result<reqwest::Response, SheetError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(match status.as_u16() {
            401 => SheetError::Auth(format!("{}: token rejected", context)),
            403 if body.contains("rateLimitExceeded") || body.contains("quota") => {
                SheetError::Quota(format!("{}: {}", context, body))
            }
            403 => SheetError::Auth(format!("{}: {}", context, body)),
            404 => SheetError::SheetNotFound(format!("{}: {}", context, body)),
            429 => SheetError::Quota(format!("{}: rate limited", context)),
            s if s >= 500 => SheetError::Transient(format!("{} failed with {}: {}", context, s, body)),
            s => SheetError::Invalid(format!("{} failed with {}: {}", context, s, body)),
        })
    }

    /// Run `op` once; on an auth failure, refresh the token and retry a
    /// single time. Quota errors pass through untouched.
    async fn with_auth_retry<F, Fut, T>(&self, op: F) -> Result<T, SheetError>
    where
        F: Fn(String) -> Fut,
        Fut: std::future::Future<Output = Result<T, SheetError>>,
    {
        let token = self.current_token().await?;
        match op(token).await {
            Err(SheetError::Auth(reason)) => {
                warn!(reason = %reason, "Sheets auth failure, attempting token refresh");
                let token = self.refresh_access_token().await?;
                op(token).await
            }
            other => other,
        }
    }

    fn values_url(&self, spreadsheet_id: &str, range: &str) -> String {
        format!(
            "{}/spreadsheets/{}/values/{}",
            self.api_base, spreadsheet_id, range
        )
    }

    async fn get_values(
        &self,
        spreadsheet_id: &str,
        sheet_name: &str,
    ) -> Result<Vec<SheetRow>, SheetError> {
        let timer = SHEETS_API_DURATION
            .with_label_values(&["values_get"])
            .start_timer();

        let rows = self
            .with_auth_retry(|token| async move {
                let response = self
                    .http
                    .get(self.values_url(spreadsheet_id, sheet_name))
                    .bearer_auth(&token)
                    .query(&[("majorDimension", "ROWS")])
                    .send()
                    .await
                    .map_err(|e| SheetError::Transient(format!("values.get: {}", e)))?;

                let response = Self::classify_response(response, "values.get").await?;
                let range: ValueRange = response
                    .json()
                    .await
                    .map_err(|e| SheetError::Invalid(format!("values.get body: {}", e)))?;

                Ok(range
                    .values
                    .into_iter()
                    .enumerate()
                    .map(|(i, cells)| {
                        SheetRow::new(i as u32 + 1, cells.iter().map(cell_to_string).collect())
                    })
                    .collect())
            })
            .await;

        timer.observe_duration();
        rows
    }

    async fn put_values(
        &self,
        spreadsheet_id: &str,
        sheet_name: &str,
        start_row: u32,
        rows: &[Vec<String>],
    ) -> Result<(), SheetError> {
        if rows.is_empty() {
            return Ok(());
        }

        let timer = SHEETS_API_DURATION
            .with_label_values(&["values_update"])
            .start_timer();

        let width = rows.iter().map(Vec::len).max().unwrap_or(1);
        let end_row = start_row + rows.len() as u32 - 1;
        let range = format!(
            "{}!A{}:{}{}",
            sheet_name,
            start_row,
            column_letter(width),
            end_row
        );

        let result = self
            .with_auth_retry(|token| {
                let range = range.clone();
                async move {
                    let response = self
                        .http
                        .put(self.values_url(spreadsheet_id, &range))
                        .bearer_auth(&token)
                        .query(&[("valueInputOption", "RAW")])
                        .json(&json!({
                            "range": range,
                            "majorDimension": "ROWS",
                            "values": rows,
                        }))
                        .send()
                        .await
                        .map_err(|e| SheetError::Transient(format!("values.update: {}", e)))?;

                    Self::classify_response(response, "values.update").await?;
                    Ok(())
                }
            })
            .await;

        timer.observe_duration();
        result
    }
}

#[async_trait]
impl SheetAdapter for GoogleSheetsClient {
    #[instrument(skip(self), fields(spreadsheet_id = %spreadsheet_id, sheet_name = %sheet_name))]
    async fn read_range(
        &self,
        spreadsheet_id: &str,
        sheet_name: &str,
    ) -> Result<Vec<SheetRow>, SheetError> {
        retry_call(&self.retry, "sheets_read_range", || {
            self.get_values(spreadsheet_id, sheet_name)
        })
        .await
    }

    #[instrument(skip(self, rows), fields(spreadsheet_id = %spreadsheet_id, start_row = start_row, row_count = rows.len()))]
    async fn write_rows(
        &self,
        spreadsheet_id: &str,
        sheet_name: &str,
        start_row: u32,
        rows: &[Vec<String>],
    ) -> Result<(), SheetError> {
        retry_call(&self.retry, "sheets_write_rows", || {
            self.put_values(spreadsheet_id, sheet_name, start_row, rows)
        })
        .await
    }

    #[instrument(skip(self, rows), fields(spreadsheet_id = %spreadsheet_id, row_count = rows.len()))]
    async fn append_rows(
        &self,
        spreadsheet_id: &str,
        sheet_name: &str,
        rows: &[Vec<String>],
    ) -> Result<u32, SheetError> {
        if rows.is_empty() {
            return Err(SheetError::Invalid("append_rows with no rows".to_string()));
        }

        // No compare-and-swap on the remote side: discover the current end,
        // write, and on failure redo the whole read-then-append as one unit.
        let mut last_err = None;
        for attempt in 0..self.append_attempts {
            let current = self.read_range(spreadsheet_id, sheet_name).await?;
            let start_row = current.len() as u32 + 1;

            match self
                .write_rows(spreadsheet_id, sheet_name, start_row, rows)
                .await
            {
                Ok(()) => return Ok(start_row),
                Err(e @ SheetError::Transient(_)) | Err(e @ SheetError::Invalid(_)) => {
                    warn!(
                        attempt = attempt + 1,
                        error = %e,
                        "Append write failed, redoing read-then-append"
                    );
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err
            .unwrap_or_else(|| SheetError::Transient("append_rows exhausted".to_string())))
    }
}

fn cell_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// 1-based column width to its A1 letter ("A".."Z", "AA"...).
fn column_letter(width: usize) -> String {
    let mut n = width.max(1);
    let mut out = String::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        out.insert(0, (b'A' + rem as u8) as char);
        n = (n - 1) / 26;
    }
    out
}
