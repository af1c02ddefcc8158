//! The sync engine: row mapping, three-way diffing, conflict resolution and
//! the orchestrator that drives a pass end to end.

pub mod differ;
pub mod mapper;
pub mod orchestrator;
pub mod resolver;

pub use differ::{DetectedConflict, Differencer, SyncDelta};
pub use mapper::RowMapper;
pub use orchestrator::{ResolutionAction, SyncOptions, SyncOrchestrator};
pub use resolver::{ConflictResolver, ResolutionPlan};

use crate::models::{
    Conflict, RemoteEdit, RemoteRowRef, ResolutionStatus, SyncState, TransactionRecord,
};
use async_trait::async_trait;
use service_core::error::AppError;
use uuid::Uuid;

/// Repository interface over the categorized-transaction store.
///
/// Every method is scoped by `user_id`; the same filter that selects sync
/// candidates guards all writes, so no record outside the caller's ownership
/// is ever touched.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Candidate records for one sync pass, optionally restricted to a job.
    async fn list_for_sync(
        &self,
        user_id: Uuid,
        job_id: Option<Uuid>,
    ) -> Result<Vec<TransactionRecord>, AppError>;

    async fn get_transaction(
        &self,
        user_id: Uuid,
        transaction_id: Uuid,
    ) -> Result<Option<TransactionRecord>, AppError>;

    /// Base revisions recorded by previous passes against this spreadsheet,
    /// including ones whose transaction has since been deleted locally.
    async fn list_sync_states(
        &self,
        user_id: Uuid,
        spreadsheet_id: &str,
    ) -> Result<Vec<SyncState>, AppError>;

    /// Apply remote business-field edits, atomically per record. Only
    /// category, subcategory, notes and confirmed are writable; amount,
    /// date and description are source-of-truth from ingestion.
    async fn apply_remote_edits(
        &self,
        user_id: Uuid,
        edits: &[RemoteEdit],
    ) -> Result<u64, AppError>;

    /// Record a successful placement: updates the transaction's fingerprint
    /// and remote row reference, and upserts the base revision.
    async fn record_sync_state(
        &self,
        user_id: Uuid,
        spreadsheet_id: &str,
        transaction_id: Uuid,
        fingerprint: &str,
        row_ref: &RemoteRowRef,
    ) -> Result<(), AppError>;

    /// Drop the base revision for a transaction/spreadsheet pair.
    async fn delete_sync_state(
        &self,
        user_id: Uuid,
        spreadsheet_id: &str,
        transaction_id: Uuid,
    ) -> Result<(), AppError>;

    /// Clear a transaction's remote row reference (the referenced row was
    /// confirmed deleted).
    async fn clear_remote_ref(&self, user_id: Uuid, transaction_id: Uuid)
        -> Result<(), AppError>;

    /// Persist a detected conflict. An existing `pending` or `ignored` row
    /// for the same (transaction, spreadsheet, type) is kept as-is; a
    /// previously resolved one is re-opened. Returns the stored row.
    async fn upsert_conflict(&self, conflict: &Conflict) -> Result<Conflict, AppError>;

    async fn get_conflict(
        &self,
        user_id: Uuid,
        conflict_id: Uuid,
    ) -> Result<Option<Conflict>, AppError>;

    async fn set_conflict_resolution(
        &self,
        user_id: Uuid,
        conflict_id: Uuid,
        status: ResolutionStatus,
    ) -> Result<(), AppError>;

    async fn list_conflicts(
        &self,
        user_id: Uuid,
        spreadsheet_id: Option<&str>,
    ) -> Result<Vec<Conflict>, AppError>;
}
