//! Drives one sync pass end to end: collect both snapshots, diff, route
//! conflicts, apply the surviving writes, and produce a single terminal
//! [`SyncResult`].

use crate::models::{
    Conflict, ConflictMode, ConflictType, RemoteEdit, ResolutionStatus, SyncDirection, SyncResult,
    TransactionRecord,
};
use crate::services::metrics::{
    record_conflict, record_error, record_sync_operation, record_sync_rows,
};
use crate::sheets::SheetAdapter;
use crate::sync::differ::{DetectedConflict, Differencer, PushAction, RowTarget, SyncDelta};
use crate::sync::mapper::RowMapper;
use crate::sync::resolver::ConflictResolver;
use crate::sync::LocalStore;
use chrono::Utc;
use dashmap::DashMap;
use service_core::error::AppError;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Parameters of one sync invocation.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub user_id: Uuid,
    pub spreadsheet_id: String,
    pub sheet_name: String,
    pub conflict_mode: ConflictMode,
    pub job_id: Option<Uuid>,
    pub deadline: Duration,
}

/// Explicit action for a persisted conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionAction {
    Local,
    Remote,
    Ignore,
}

impl ResolutionAction {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "local" => Some(Self::Local),
            "remote" => Some(Self::Remote),
            "ignore" => Some(Self::Ignore),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct PassCounts {
    pushed: u64,
    pulled: u64,
    skipped: u64,
    updated: u64,
    conflicts: u64,
}

/// One engine per process. Passes for the same `(user, spreadsheet)` pair
/// are serialized through an advisory mutex; distinct pairs run freely in
/// parallel, sharing nothing but the adapter and the store.
pub struct SyncOrchestrator<S, L> {
    sheets: Arc<S>,
    store: Arc<L>,
    locks: DashMap<(Uuid, String), Arc<Mutex<()>>>,
}

impl<S: SheetAdapter, L: LocalStore> SyncOrchestrator<S, L> {
    pub fn new(sheets: Arc<S>, store: Arc<L>) -> Self {
        Self {
            sheets,
            store,
            locks: DashMap::new(),
        }
    }

    pub async fn push_to_sheets(&self, options: &SyncOptions) -> SyncResult {
        self.run(SyncDirection::Push, options).await
    }

    pub async fn pull_from_sheets(&self, options: &SyncOptions) -> SyncResult {
        self.run(SyncDirection::Pull, options).await
    }

    pub async fn bidirectional_sync(&self, options: &SyncOptions) -> SyncResult {
        self.run(SyncDirection::Bidirectional, options).await
    }

    fn pair_lock(&self, user_id: Uuid, spreadsheet_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry((user_id, spreadsheet_id.to_string()))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    #[instrument(
        skip(self, options),
        fields(
            user_id = %options.user_id,
            spreadsheet_id = %options.spreadsheet_id,
            direction = direction.as_str(),
        )
    )]
    async fn run(&self, direction: SyncDirection, options: &SyncOptions) -> SyncResult {
        let lock = self.pair_lock(options.user_id, &options.spreadsheet_id);
        let _guard = lock.lock().await;

        let started = Instant::now();
        let deadline = started + options.deadline;
        let mut counts = PassCounts::default();
        let mut conflicts: Vec<Conflict> = Vec::new();

        let outcome = self
            .execute(direction, options, deadline, &mut counts, &mut conflicts)
            .await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let (success, error) = match outcome {
            Ok(()) => (true, None),
            Err(err) => {
                warn!(error = %err, "sync pass failed");
                record_error("sync_pass");
                (false, Some(err.to_string()))
            }
        };

        record_sync_operation(direction.as_str(), if success { "success" } else { "failed" });
        record_sync_rows("pushed", counts.pushed);
        record_sync_rows("pulled", counts.pulled);
        record_sync_rows("skipped", counts.skipped);
        record_sync_rows("updated", counts.updated);

        let result = SyncResult {
            direction,
            rows_pushed: counts.pushed,
            rows_pulled: counts.pulled,
            rows_skipped: counts.skipped,
            rows_updated: counts.updated,
            conflicts_detected: counts.conflicts,
            duration_ms,
            success,
            error,
            conflicts,
        };
        info!(
            rows_pushed = result.rows_pushed,
            rows_pulled = result.rows_pulled,
            rows_skipped = result.rows_skipped,
            rows_updated = result.rows_updated,
            conflicts = result.conflicts_detected,
            success = result.success,
            "sync pass finished"
        );
        result
    }

    async fn execute(
        &self,
        direction: SyncDirection,
        options: &SyncOptions,
        deadline: Instant,
        counts: &mut PassCounts,
        stored_conflicts: &mut Vec<Conflict>,
    ) -> Result<(), AppError> {
        // COLLECTING: the remote read and the two local reads are
        // independent and run concurrently.
        let (all_rows, locals, states) = tokio::try_join!(
            async {
                self.sheets
                    .read_range(&options.spreadsheet_id, &options.sheet_name)
                    .await
                    .map_err(AppError::from)
            },
            self.store.list_for_sync(options.user_id, options.job_id),
            self.store
                .list_sync_states(options.user_id, &options.spreadsheet_id),
        )?;

        // Row 1 is always the header. A brand-new tab gets one bootstrapped
        // before anything else; an existing one must match exactly.
        let data_rows: &[crate::models::SheetRow] = match all_rows.split_first() {
            None => {
                self.sheets
                    .write_rows(
                        &options.spreadsheet_id,
                        &options.sheet_name,
                        1,
                        &[RowMapper::header_row()],
                    )
                    .await
                    .map_err(AppError::from)?;
                &[]
            }
            Some((header, rest)) => {
                RowMapper::validate_header(header).map_err(AppError::from)?;
                rest
            }
        };

        // DIFFING
        let differ = Differencer::new(&options.sheet_name, data_rows, &states);
        let delta = match direction {
            SyncDirection::Push => differ.diff_push(&locals),
            SyncDirection::Pull => differ.diff_pull(&locals),
            SyncDirection::Bidirectional => differ.diff(&locals),
        };
        counts.skipped = delta.skipped.len() as u64;

        let SyncDelta {
            pushes,
            pulls,
            conflicts: detected,
            refreshes,
            ..
        } = delta;

        // RESOLVING
        let plan = ConflictResolver::plan(detected, options.conflict_mode);
        for conflict in &plan.pending {
            record_conflict(conflict.conflict_type.as_str());
            let stored = self
                .store
                .upsert_conflict(&build_conflict(options, conflict, ResolutionStatus::Pending))
                .await?;
            counts.conflicts += 1;
            stored_conflicts.push(stored);
        }

        let by_id: HashMap<Uuid, &TransactionRecord> =
            locals.iter().map(|r| (r.transaction_id, r)).collect();

        let (updates, appends): (Vec<PushAction>, Vec<PushAction>) = pushes
            .into_iter()
            .partition(|p| matches!(p.target, RowTarget::Update(_)));

        let planned = pulls.len()
            + updates.len()
            + appends.len()
            + plan.apply_local.len()
            + plan.apply_remote.len();

        // APPLYING. Base refreshes first; they move no data and carry no
        // count, so they are exempt from the deadline.
        for refresh in &refreshes {
            self.store
                .record_sync_state(
                    options.user_id,
                    &options.spreadsheet_id,
                    refresh.transaction_id,
                    &refresh.fingerprint,
                    &refresh.row_ref,
                )
                .await?;
        }

        // Pulls: local writes, atomic per record.
        for pull in &pulls {
            check_deadline(deadline, counts, planned)?;
            let applied = self
                .store
                .apply_remote_edits(options.user_id, std::slice::from_ref(&pull.edit))
                .await?;
            if applied == 0 {
                // Record vanished between COLLECTING and now; the next pass
                // will classify it.
                continue;
            }
            self.store
                .record_sync_state(
                    options.user_id,
                    &options.spreadsheet_id,
                    pull.edit.transaction_id,
                    &pull.remote_fingerprint,
                    &crate::models::RemoteRowRef {
                        sheet_name: options.sheet_name.clone(),
                        row_index: pull.row_index,
                    },
                )
                .await?;
            counts.pulled += 1;
        }

        // Row overwrites, one remote write per contiguous block.
        for block in contiguous_blocks(&updates) {
            check_deadline(deadline, counts, planned)?;
            let cells: Vec<Vec<String>> = block
                .iter()
                .map(|p| RowMapper::to_row(&p.record))
                .collect();
            let start_row = block_start(&block);
            self.sheets
                .write_rows(&options.spreadsheet_id, &options.sheet_name, start_row, &cells)
                .await
                .map_err(AppError::from)?;
            for (offset, push) in block.iter().enumerate() {
                self.record_push_state(options, push, start_row + offset as u32)
                    .await?;
                counts.updated += 1;
            }
        }

        // Appends, one remote write for the whole batch.
        if !appends.is_empty() {
            check_deadline(deadline, counts, planned)?;
            let cells: Vec<Vec<String>> = appends
                .iter()
                .map(|p| RowMapper::to_row(&p.record))
                .collect();
            let first_row = self
                .sheets
                .append_rows(&options.spreadsheet_id, &options.sheet_name, &cells)
                .await
                .map_err(AppError::from)?;
            for (offset, push) in appends.iter().enumerate() {
                self.record_push_state(options, push, first_row + offset as u32)
                    .await?;
                counts.pushed += 1;
            }
        }

        // Auto-resolved conflicts, local side wins: rewrite the row.
        for conflict in &plan.apply_local {
            check_deadline(deadline, counts, planned)?;
            let Some(record) = by_id.get(&conflict.transaction_id) else {
                continue;
            };
            let Some(row_index) = conflict.remote_row_index else {
                continue;
            };
            let push = PushAction {
                record: (*record).clone(),
                fingerprint: RowMapper::fingerprint(record),
                target: RowTarget::Update(row_index),
            };
            self.sheets
                .write_rows(
                    &options.spreadsheet_id,
                    &options.sheet_name,
                    row_index,
                    &[RowMapper::to_row(record)],
                )
                .await
                .map_err(AppError::from)?;
            self.record_push_state(options, &push, row_index).await?;
            let stored = self
                .store
                .upsert_conflict(&build_conflict(
                    options,
                    conflict,
                    ResolutionStatus::ResolvedLocal,
                ))
                .await?;
            stored_conflicts.push(stored);
            counts.updated += 1;
        }

        // Auto-resolved conflicts, remote side wins: pull the row's fields.
        for conflict in &plan.apply_remote {
            check_deadline(deadline, counts, planned)?;
            let Some(row_index) = conflict.remote_row_index else {
                continue;
            };
            let Some(remote) = differ.remote_record(row_index) else {
                continue;
            };
            let edit = RemoteEdit {
                transaction_id: conflict.transaction_id,
                category: remote.category.clone(),
                subcategory: remote.subcategory.clone(),
                user_confirmed: remote.user_confirmed,
                user_notes: remote.user_notes.clone(),
            };
            let applied = self
                .store
                .apply_remote_edits(options.user_id, &[edit])
                .await?;
            if applied > 0 {
                if let Some(fp) = differ.remote_fingerprint(row_index) {
                    self.store
                        .record_sync_state(
                            options.user_id,
                            &options.spreadsheet_id,
                            conflict.transaction_id,
                            fp,
                            &crate::models::RemoteRowRef {
                                sheet_name: options.sheet_name.clone(),
                                row_index,
                            },
                        )
                        .await?;
                }
            }
            let stored = self
                .store
                .upsert_conflict(&build_conflict(
                    options,
                    conflict,
                    ResolutionStatus::ResolvedRemote,
                ))
                .await?;
            stored_conflicts.push(stored);
            counts.pulled += 1;
        }

        Ok(())
    }

    async fn record_push_state(
        &self,
        options: &SyncOptions,
        push: &PushAction,
        row_index: u32,
    ) -> Result<(), AppError> {
        self.store
            .record_sync_state(
                options.user_id,
                &options.spreadsheet_id,
                push.record.transaction_id,
                &push.fingerprint,
                &crate::models::RemoteRowRef {
                    sheet_name: options.sheet_name.clone(),
                    row_index,
                },
            )
            .await
    }

    /// Explicitly resolve one persisted conflict.
    ///
    /// `local` re-asserts the local record on the sheet; `remote` pulls the
    /// sheet's business fields into the record; `ignore` records the choice
    /// and changes nothing. Only `pending` conflicts are resolvable.
    #[instrument(skip(self), fields(user_id = %user_id, conflict_id = %conflict_id))]
    pub async fn resolve_conflict(
        &self,
        user_id: Uuid,
        conflict_id: Uuid,
        action: ResolutionAction,
    ) -> Result<Conflict, AppError> {
        let conflict = self
            .store
            .get_conflict(user_id, conflict_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("conflict {conflict_id} not found")))?;

        if conflict.resolution_status() != ResolutionStatus::Pending {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "conflict {conflict_id} is already {}",
                conflict.resolution_status
            )));
        }

        let status = match action {
            ResolutionAction::Ignore => ResolutionStatus::Ignored,
            ResolutionAction::Local => {
                self.apply_local_resolution(user_id, &conflict).await?;
                ResolutionStatus::ResolvedLocal
            }
            ResolutionAction::Remote => {
                self.apply_remote_resolution(user_id, &conflict).await?;
                ResolutionStatus::ResolvedRemote
            }
        };

        self.store
            .set_conflict_resolution(user_id, conflict_id, status)
            .await?;
        self.store
            .get_conflict(user_id, conflict_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("conflict {conflict_id} not found")))
    }

    async fn apply_local_resolution(
        &self,
        user_id: Uuid,
        conflict: &Conflict,
    ) -> Result<(), AppError> {
        match conflict.conflict_type() {
            ConflictType::DuplicateRow => Err(AppError::BadRequest(anyhow::anyhow!(
                "duplicate rows must be repaired in the sheet, then re-synced or ignored"
            ))),
            ConflictType::DeletedLocally => {
                // The record is gone; blank the orphaned row and drop the
                // stale base.
                if let Some(row_index) = conflict_row(conflict) {
                    self.sheets
                        .write_rows(
                            &conflict.spreadsheet_id,
                            &conflict.sheet_name,
                            row_index,
                            &[vec![String::new(); RowMapper::header_row().len()]],
                        )
                        .await
                        .map_err(AppError::from)?;
                }
                self.store
                    .delete_sync_state(user_id, &conflict.spreadsheet_id, conflict.transaction_id)
                    .await
            }
            ConflictType::DeletedRemotely => {
                // The row is gone; re-append the surviving local record.
                let record = self.require_transaction(user_id, conflict).await?;
                let first_row = self
                    .sheets
                    .append_rows(
                        &conflict.spreadsheet_id,
                        &conflict.sheet_name,
                        &[RowMapper::to_row(&record)],
                    )
                    .await
                    .map_err(AppError::from)?;
                self.record_resolution_state(user_id, conflict, &record, first_row)
                    .await
            }
            ConflictType::AmountMismatch | ConflictType::CategoryMismatch => {
                let record = self.require_transaction(user_id, conflict).await?;
                let row_index = conflict_row(conflict).ok_or_else(|| {
                    AppError::Conflict(anyhow::anyhow!("conflict has no remote row to overwrite"))
                })?;
                self.sheets
                    .write_rows(
                        &conflict.spreadsheet_id,
                        &conflict.sheet_name,
                        row_index,
                        &[RowMapper::to_row(&record)],
                    )
                    .await
                    .map_err(AppError::from)?;
                self.record_resolution_state(user_id, conflict, &record, row_index)
                    .await
            }
        }
    }

    async fn apply_remote_resolution(
        &self,
        user_id: Uuid,
        conflict: &Conflict,
    ) -> Result<(), AppError> {
        match conflict.conflict_type() {
            ConflictType::DuplicateRow => Err(AppError::BadRequest(anyhow::anyhow!(
                "duplicate rows must be repaired in the sheet, then re-synced or ignored"
            ))),
            ConflictType::DeletedRemotely => {
                // Accept the deletion: unlink the record, keep it locally.
                self.store
                    .clear_remote_ref(user_id, conflict.transaction_id)
                    .await?;
                self.store
                    .delete_sync_state(user_id, &conflict.spreadsheet_id, conflict.transaction_id)
                    .await
            }
            ConflictType::DeletedLocally => {
                // The row stays as a manual artifact; drop the stale base.
                self.store
                    .delete_sync_state(user_id, &conflict.spreadsheet_id, conflict.transaction_id)
                    .await
            }
            ConflictType::AmountMismatch | ConflictType::CategoryMismatch => {
                let record = self.require_transaction(user_id, conflict).await?;
                let row_index = conflict_row(conflict).ok_or_else(|| {
                    AppError::Conflict(anyhow::anyhow!("conflict has no remote row to read"))
                })?;
                let rows = self
                    .sheets
                    .read_range(&conflict.spreadsheet_id, &conflict.sheet_name)
                    .await
                    .map_err(AppError::from)?;
                let row = rows
                    .iter()
                    .find(|r| r.row_index == row_index)
                    .ok_or_else(|| {
                        AppError::Conflict(anyhow::anyhow!(
                            "remote row {row_index} no longer exists"
                        ))
                    })?;
                let remote = RowMapper::from_row(row);

                let mut merged = record.clone();
                merged.category = remote.category.clone();
                merged.subcategory = remote.subcategory.clone();
                merged.user_confirmed = remote.user_confirmed;
                merged.user_notes = remote.user_notes.clone();
                self.store
                    .apply_remote_edits(
                        user_id,
                        &[RemoteEdit {
                            transaction_id: record.transaction_id,
                            category: remote.category,
                            subcategory: remote.subcategory,
                            user_confirmed: remote.user_confirmed,
                            user_notes: remote.user_notes,
                        }],
                    )
                    .await?;

                // Amount is source-of-truth from ingestion and never pulled;
                // converge by rewriting the row from the merged record so
                // both sides agree afterwards.
                if RowMapper::to_row(&merged) != row.cells {
                    self.sheets
                        .write_rows(
                            &conflict.spreadsheet_id,
                            &conflict.sheet_name,
                            row_index,
                            &[RowMapper::to_row(&merged)],
                        )
                        .await
                        .map_err(AppError::from)?;
                }
                self.record_resolution_state(user_id, conflict, &merged, row_index)
                    .await
            }
        }
    }

    async fn require_transaction(
        &self,
        user_id: Uuid,
        conflict: &Conflict,
    ) -> Result<TransactionRecord, AppError> {
        self.store
            .get_transaction(user_id, conflict.transaction_id)
            .await?
            .ok_or_else(|| {
                AppError::Conflict(anyhow::anyhow!(
                    "transaction {} no longer exists",
                    conflict.transaction_id
                ))
            })
    }

    async fn record_resolution_state(
        &self,
        user_id: Uuid,
        conflict: &Conflict,
        record: &TransactionRecord,
        row_index: u32,
    ) -> Result<(), AppError> {
        self.store
            .record_sync_state(
                user_id,
                &conflict.spreadsheet_id,
                record.transaction_id,
                &RowMapper::fingerprint(record),
                &crate::models::RemoteRowRef {
                    sheet_name: conflict.sheet_name.clone(),
                    row_index,
                },
            )
            .await
    }
}

fn conflict_row(conflict: &Conflict) -> Option<u32> {
    conflict.remote_row_index.filter(|i| *i > 0).map(|i| i as u32)
}

fn check_deadline(deadline: Instant, counts: &PassCounts, planned: usize) -> Result<(), AppError> {
    if Instant::now() >= deadline {
        let applied = counts.pushed + counts.pulled + counts.updated;
        return Err(AppError::InternalError(anyhow::anyhow!(
            "sync deadline exceeded; applied {applied} of {planned} row operations"
        )));
    }
    Ok(())
}

fn build_conflict(
    options: &SyncOptions,
    detected: &DetectedConflict,
    status: ResolutionStatus,
) -> Conflict {
    let now = Utc::now();
    Conflict {
        conflict_id: Uuid::new_v4(),
        transaction_id: detected.transaction_id,
        user_id: options.user_id,
        spreadsheet_id: options.spreadsheet_id.clone(),
        sheet_name: options.sheet_name.clone(),
        conflict_type: detected.conflict_type.as_str().to_string(),
        resolution_status: status.as_str().to_string(),
        local_value: detected.local_value.clone(),
        remote_value: detected.remote_value.clone(),
        remote_row_index: detected.remote_row_index.map(|i| i as i32),
        detected_utc: now,
        resolved_utc: match status {
            ResolutionStatus::Pending => None,
            _ => Some(now),
        },
    }
}

/// Split row overwrites into runs of consecutive row indices so each run is
/// one remote write. Input need not be sorted.
fn contiguous_blocks(updates: &[PushAction]) -> Vec<Vec<&PushAction>> {
    let mut sorted: Vec<&PushAction> = updates.iter().collect();
    sorted.sort_by_key(|p| match p.target {
        RowTarget::Update(row) => row,
        RowTarget::Append => u32::MAX,
    });

    let mut blocks: Vec<Vec<&PushAction>> = Vec::new();
    for push in sorted {
        let RowTarget::Update(row) = push.target else {
            continue;
        };
        match blocks.last_mut() {
            Some(block) if block_start(block) + block.len() as u32 == row => block.push(push),
            _ => blocks.push(vec![push]),
        }
    }
    blocks
}

fn block_start(block: &[&PushAction]) -> u32 {
    match block.first().map(|p| p.target.clone()) {
        Some(RowTarget::Update(row)) => row,
        _ => 0,
    }
}
