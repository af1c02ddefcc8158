//! Domain models for sheetsync-service.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ============================================================================
// Transaction Models
// ============================================================================

/// A categorized transaction as stored in Postgres.
///
/// Owned by the categorization subsystem. The sync engine reads these rows
/// and writes back only `sync_fingerprint` and the remote row reference,
/// plus the business fields a pull is allowed to touch (category,
/// subcategory, notes, confirmed).
#[derive(Debug, Clone, FromRow)]
pub struct TransactionRecord {
    pub transaction_id: Uuid,
    pub user_id: Uuid,
    pub job_id: Option<Uuid>,
    pub transaction_date: NaiveDate,
    pub description: String,
    pub amount: Decimal,
    pub category: String,
    pub subcategory: Option<String>,
    pub confidence_score: Option<f64>,
    pub user_confirmed: bool,
    pub user_notes: Option<String>,
    pub sync_fingerprint: Option<String>,
    pub remote_sheet_name: Option<String>,
    pub remote_row_index: Option<i32>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl TransactionRecord {
    /// The remote row this record was last placed at, if it has ever been
    /// pushed. Set only after a successful push; cleared when the referenced
    /// row is confirmed gone.
    pub fn remote_row_ref(&self) -> Option<RemoteRowRef> {
        match (&self.remote_sheet_name, self.remote_row_index) {
            (Some(sheet), Some(row)) if row > 0 => Some(RemoteRowRef {
                sheet_name: sheet.clone(),
                row_index: row as u32,
            }),
            _ => None,
        }
    }
}

/// Pointer to a single data row of a named sheet tab. Row indices are
/// 1-based; row 1 is always the header, so a valid reference is >= 2.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRowRef {
    pub sheet_name: String,
    pub row_index: u32,
}

/// One row read from the spreadsheet: ordered cell strings plus its 1-based
/// index. Ephemeral; reconstructed on every sync pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetRow {
    pub row_index: u32,
    pub cells: Vec<String>,
}

impl SheetRow {
    pub fn new(row_index: u32, cells: Vec<String>) -> Self {
        Self { row_index, cells }
    }

    /// Cell at `col` (0-based), empty string when the row is ragged.
    pub fn cell(&self, col: usize) -> &str {
        self.cells.get(col).map(String::as_str).unwrap_or("")
    }
}

/// The sync-relevant fields parsed out of a [`SheetRow`]. Missing cells get
/// the documented defaults, never an error.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteRecord {
    pub row_index: u32,
    pub transaction_date: Option<NaiveDate>,
    pub description: String,
    pub amount: Decimal,
    pub category: String,
    pub subcategory: Option<String>,
    pub confidence_score: Option<f64>,
    pub user_confirmed: bool,
    pub user_notes: Option<String>,
}

/// Business-field update a pull applies to one local record. Amount, date
/// and description are source-of-truth from ingestion and never appear here.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteEdit {
    pub transaction_id: Uuid,
    pub category: String,
    pub subcategory: Option<String>,
    pub user_confirmed: bool,
    pub user_notes: Option<String>,
}

// ============================================================================
// Sync State Models
// ============================================================================

/// The last state both sides agreed on for one transaction, used as the
/// base revision for three-way diffing.
#[derive(Debug, Clone, FromRow)]
pub struct SyncState {
    pub transaction_id: Uuid,
    pub user_id: Uuid,
    pub spreadsheet_id: String,
    pub sheet_name: String,
    pub row_index: i32,
    pub base_fingerprint: String,
    pub synced_utc: DateTime<Utc>,
}

impl SyncState {
    pub fn remote_row_ref(&self) -> RemoteRowRef {
        RemoteRowRef {
            sheet_name: self.sheet_name.clone(),
            row_index: self.row_index.max(0) as u32,
        }
    }
}

// ============================================================================
// Conflict Models
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    AmountMismatch,
    CategoryMismatch,
    DeletedRemotely,
    DeletedLocally,
    DuplicateRow,
}

impl ConflictType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AmountMismatch => "amount_mismatch",
            Self::CategoryMismatch => "category_mismatch",
            Self::DeletedRemotely => "deleted_remotely",
            Self::DeletedLocally => "deleted_locally",
            Self::DuplicateRow => "duplicate_row",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "amount_mismatch" => Self::AmountMismatch,
            "category_mismatch" => Self::CategoryMismatch,
            "deleted_remotely" => Self::DeletedRemotely,
            "deleted_locally" => Self::DeletedLocally,
            "duplicate_row" => Self::DuplicateRow,
            _ => Self::CategoryMismatch,
        }
    }

    /// Deletion intent cannot be inferred, so these are never auto-resolved.
    pub fn is_deletion(&self) -> bool {
        matches!(self, Self::DeletedRemotely | Self::DeletedLocally)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStatus {
    Pending,
    ResolvedLocal,
    ResolvedRemote,
    Ignored,
}

impl ResolutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::ResolvedLocal => "resolved_local",
            Self::ResolvedRemote => "resolved_remote",
            Self::Ignored => "ignored",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "pending" => Self::Pending,
            "resolved_local" => Self::ResolvedLocal,
            "resolved_remote" => Self::ResolvedRemote,
            "ignored" => Self::Ignored,
            _ => Self::Pending,
        }
    }
}

/// A detected divergence the engine declined to resolve automatically.
///
/// Created during a sync pass; transitions out of `pending` only through an
/// explicit resolution action, never silently by a later pass.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Conflict {
    pub conflict_id: Uuid,
    pub transaction_id: Uuid,
    pub user_id: Uuid,
    pub spreadsheet_id: String,
    pub sheet_name: String,
    pub conflict_type: String,
    pub resolution_status: String,
    pub local_value: Option<String>,
    pub remote_value: Option<String>,
    pub remote_row_index: Option<i32>,
    pub detected_utc: DateTime<Utc>,
    pub resolved_utc: Option<DateTime<Utc>>,
}

impl Conflict {
    pub fn conflict_type(&self) -> ConflictType {
        ConflictType::from_str(&self.conflict_type)
    }

    pub fn resolution_status(&self) -> ResolutionStatus {
        ResolutionStatus::from_str(&self.resolution_status)
    }
}

// ============================================================================
// Sync Invocation Models
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    Push,
    Pull,
    Bidirectional,
}

impl SyncDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Push => "push",
            Self::Pull => "pull",
            Self::Bidirectional => "bidirectional",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "push" => Some(Self::Push),
            "pull" => Some(Self::Pull),
            "bidirectional" => Some(Self::Bidirectional),
            _ => None,
        }
    }
}

/// How conflicting divergences are handled during a bidirectional pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictMode {
    Manual,
    PreferLocal,
    PreferRemote,
}

impl Default for ConflictMode {
    fn default() -> Self {
        Self::Manual
    }
}

impl ConflictMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::PreferLocal => "prefer_local",
            Self::PreferRemote => "prefer_remote",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "manual" => Some(Self::Manual),
            "prefer_local" => Some(Self::PreferLocal),
            "prefer_remote" => Some(Self::PreferRemote),
            _ => None,
        }
    }
}

/// Terminal outcome of one sync invocation. Constructed exactly once, in
/// DONE or FAILED; counts reflect only committed operations.
#[derive(Debug, Clone, Serialize)]
pub struct SyncResult {
    pub direction: SyncDirection,
    pub rows_pushed: u64,
    pub rows_pulled: u64,
    pub rows_skipped: u64,
    pub rows_updated: u64,
    pub conflicts_detected: u64,
    pub duration_ms: u64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub conflicts: Vec<Conflict>,
}

impl SyncResult {
    /// Total rows accounted for by this pass. Equals the number of records
    /// considered: pushed + pulled + skipped + updated + conflicts.
    pub fn rows_considered(&self) -> u64 {
        self.rows_pushed
            + self.rows_pulled
            + self.rows_skipped
            + self.rows_updated
            + self.conflicts_detected
    }
}
