//! Remote spreadsheet boundary: error taxonomy and the adapter trait the
//! sync engine is written against.

pub mod client;

pub use client::GoogleSheetsClient;

use crate::models::SheetRow;
use async_trait::async_trait;
use service_core::error::AppError;
use service_core::retry::Retryable;
use thiserror::Error;

/// Failure modes of the spreadsheet API, classified at the origin so no raw
/// transport error crosses a component boundary.
#[derive(Debug, Error)]
pub enum SheetError {
    /// Missing or unusable credentials. Fatal, no retry.
    #[error("Sheets configuration error: {0}")]
    Config(String),

    /// Expired or invalid token. The client performs one refresh and a
    /// single retry before surfacing this.
    #[error("Sheets authentication failed: {0}")]
    Auth(String),

    /// Rate limited. Surfaced for caller-side backoff, not retried inline.
    #[error("Sheets API quota exceeded: {0}")]
    Quota(String),

    /// Spreadsheet id or tab does not exist. Fatal for that spreadsheet.
    #[error("Spreadsheet not found: {0}")]
    SheetNotFound(String),

    /// The existing header row does not match the expected column list.
    /// Fatal; carries both header lists so the user can repair the sheet.
    #[error("Sheet header mismatch: expected {expected:?}, found {found:?}")]
    SchemaMismatch {
        expected: Vec<String>,
        found: Vec<String>,
    },

    /// Network or 5xx failure that may succeed on a later attempt.
    #[error("Transient Sheets API error: {0}")]
    Transient(String),

    /// Malformed request or response. Programmer error territory.
    #[error("Invalid Sheets request: {0}")]
    Invalid(String),
}

impl Retryable for SheetError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<SheetError> for AppError {
    fn from(err: SheetError) -> Self {
        match err {
            SheetError::Config(msg) => AppError::ConfigError(anyhow::anyhow!(msg)),
            SheetError::Auth(msg) => AppError::AuthError(anyhow::anyhow!(msg)),
            SheetError::Quota(msg) => AppError::TooManyRequests(msg, None),
            SheetError::SheetNotFound(msg) => AppError::NotFound(anyhow::anyhow!(msg)),
            e @ SheetError::SchemaMismatch { .. } => {
                AppError::BadRequest(anyhow::anyhow!(e.to_string()))
            }
            SheetError::Transient(msg) => AppError::BadGateway(msg),
            SheetError::Invalid(msg) => AppError::BadRequest(anyhow::anyhow!(msg)),
        }
    }
}

/// Reads and writes rectangular ranges of a named spreadsheet tab.
///
/// Row indices are 1-based and include the header row. Implementations own
/// the quota/retry discipline for the remote API; callers see only
/// [`SheetError`] kinds.
#[async_trait]
pub trait SheetAdapter: Send + Sync {
    /// Full-range read of a tab, header row included.
    async fn read_range(
        &self,
        spreadsheet_id: &str,
        sheet_name: &str,
    ) -> Result<Vec<SheetRow>, SheetError>;

    /// Idempotent overwrite of a contiguous block starting at `start_row`.
    async fn write_rows(
        &self,
        spreadsheet_id: &str,
        sheet_name: &str,
        start_row: u32,
        rows: &[Vec<String>],
    ) -> Result<(), SheetError>;

    /// Append `rows` at the current end of the tab, discovered by reading
    /// the current row count immediately before writing. The read-then-write
    /// is retried as one unit since the remote API has no compare-and-swap.
    /// Returns the 1-based index of the first appended row.
    async fn append_rows(
        &self,
        spreadsheet_id: &str,
        sheet_name: &str,
        rows: &[Vec<String>],
    ) -> Result<u32, SheetError>;
}
