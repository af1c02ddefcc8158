//! Shared test fixtures: an in-memory spreadsheet and an in-memory store so
//! orchestrator behavior is tested without Postgres or the Sheets API.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use sheetsync_service::models::{
    Conflict, RemoteEdit, RemoteRowRef, ResolutionStatus, SheetRow, SyncState, TransactionRecord,
};
use sheetsync_service::sheets::{SheetAdapter, SheetError};
use sheetsync_service::sync::{LocalStore, RowMapper};
use std::sync::{Mutex, Once};
use std::time::Duration;
use uuid::Uuid;

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,sheetsync_service=debug")
            .with_test_writer()
            .init();
    });
}

// ============================================================================
// Fake spreadsheet
// ============================================================================

/// In-memory sheet tab. Rows are 1-based; slot `i` of the vec is row `i + 1`.
/// An optional per-write cost drives deadline tests under a paused clock.
pub struct FakeSheet {
    rows: Mutex<Vec<Vec<String>>>,
    pub write_cost: Option<Duration>,
    pub writes: Mutex<u32>,
}

impl FakeSheet {
    pub fn empty() -> Self {
        Self {
            rows: Mutex::new(Vec::new()),
            write_cost: None,
            writes: Mutex::new(0),
        }
    }

    pub fn with_header() -> Self {
        let sheet = Self::empty();
        sheet.rows.lock().unwrap().push(RowMapper::header_row());
        sheet
    }

    pub fn with_write_cost(cost: Duration) -> Self {
        let sheet = Self::with_header();
        Self {
            write_cost: Some(cost),
            ..sheet
        }
    }

    /// Place `cells` at `row_index`, growing the tab with empty rows.
    pub fn set_row(&self, row_index: u32, cells: Vec<String>) {
        let mut rows = self.rows.lock().unwrap();
        while rows.len() < row_index as usize {
            rows.push(Vec::new());
        }
        rows[row_index as usize - 1] = cells;
    }

    pub fn row(&self, row_index: u32) -> Option<Vec<String>> {
        self.rows.lock().unwrap().get(row_index as usize - 1).cloned()
    }

    pub fn row_count(&self) -> u32 {
        self.rows.lock().unwrap().len() as u32
    }

    pub fn delete_row(&self, row_index: u32) {
        self.rows.lock().unwrap().remove(row_index as usize - 1);
    }

    pub fn write_count(&self) -> u32 {
        *self.writes.lock().unwrap()
    }

    async fn charge_write(&self) {
        *self.writes.lock().unwrap() += 1;
        if let Some(cost) = self.write_cost {
            tokio::time::sleep(cost).await;
        }
    }
}

#[async_trait]
impl SheetAdapter for FakeSheet {
    async fn read_range(
        &self,
        _spreadsheet_id: &str,
        _sheet_name: &str,
    ) -> Result<Vec<SheetRow>, SheetError> {
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .iter()
            .enumerate()
            .map(|(i, cells)| SheetRow::new(i as u32 + 1, cells.clone()))
            .collect())
    }

    async fn write_rows(
        &self,
        _spreadsheet_id: &str,
        _sheet_name: &str,
        start_row: u32,
        rows: &[Vec<String>],
    ) -> Result<(), SheetError> {
        self.charge_write().await;
        for (offset, cells) in rows.iter().enumerate() {
            self.set_row(start_row + offset as u32, cells.clone());
        }
        Ok(())
    }

    async fn append_rows(
        &self,
        _spreadsheet_id: &str,
        _sheet_name: &str,
        rows: &[Vec<String>],
    ) -> Result<u32, SheetError> {
        self.charge_write().await;
        let first = self.row_count() + 1;
        for (offset, cells) in rows.iter().enumerate() {
            self.set_row(first + offset as u32, cells.clone());
        }
        Ok(first)
    }
}

// ============================================================================
// Fake store
// ============================================================================

#[derive(Default)]
pub struct FakeStore {
    pub transactions: Mutex<Vec<TransactionRecord>>,
    pub states: Mutex<Vec<SyncState>>,
    pub conflicts: Mutex<Vec<Conflict>>,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: TransactionRecord) {
        self.transactions.lock().unwrap().push(record);
    }

    pub fn transaction(&self, transaction_id: Uuid) -> Option<TransactionRecord> {
        self.transactions
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.transaction_id == transaction_id)
            .cloned()
    }

    pub fn update<F: FnOnce(&mut TransactionRecord)>(&self, transaction_id: Uuid, f: F) {
        let mut records = self.transactions.lock().unwrap();
        if let Some(record) = records.iter_mut().find(|r| r.transaction_id == transaction_id) {
            f(record);
        }
    }

    pub fn state_for(&self, transaction_id: Uuid) -> Option<SyncState> {
        self.states
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.transaction_id == transaction_id)
            .cloned()
    }

    pub fn stored_conflicts(&self) -> Vec<Conflict> {
        self.conflicts.lock().unwrap().clone()
    }

    /// Seed the agreed base for a record already placed on the sheet.
    pub fn seed_state(&self, record: &TransactionRecord, spreadsheet_id: &str, row_index: u32) {
        self.states.lock().unwrap().push(SyncState {
            transaction_id: record.transaction_id,
            user_id: record.user_id,
            spreadsheet_id: spreadsheet_id.to_string(),
            sheet_name: "Transactions".to_string(),
            row_index: row_index as i32,
            base_fingerprint: RowMapper::fingerprint(record),
            synced_utc: Utc::now(),
        });
    }
}

#[async_trait]
impl LocalStore for FakeStore {
    async fn list_for_sync(
        &self,
        user_id: Uuid,
        job_id: Option<Uuid>,
    ) -> Result<Vec<TransactionRecord>, AppError> {
        Ok(self
            .transactions
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.user_id == user_id)
            .filter(|r| job_id.is_none() || r.job_id == job_id)
            .cloned()
            .collect())
    }

    async fn get_transaction(
        &self,
        user_id: Uuid,
        transaction_id: Uuid,
    ) -> Result<Option<TransactionRecord>, AppError> {
        Ok(self
            .transactions
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.user_id == user_id && r.transaction_id == transaction_id)
            .cloned())
    }

    async fn list_sync_states(
        &self,
        user_id: Uuid,
        spreadsheet_id: &str,
    ) -> Result<Vec<SyncState>, AppError> {
        Ok(self
            .states
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.user_id == user_id && s.spreadsheet_id == spreadsheet_id)
            .cloned()
            .collect())
    }

    async fn apply_remote_edits(
        &self,
        user_id: Uuid,
        edits: &[RemoteEdit],
    ) -> Result<u64, AppError> {
        let mut records = self.transactions.lock().unwrap();
        let mut applied = 0;
        for edit in edits {
            if let Some(record) = records
                .iter_mut()
                .find(|r| r.user_id == user_id && r.transaction_id == edit.transaction_id)
            {
                record.category = edit.category.clone();
                record.subcategory = edit.subcategory.clone();
                record.user_confirmed = edit.user_confirmed;
                record.user_notes = edit.user_notes.clone();
                record.updated_utc = Utc::now();
                applied += 1;
            }
        }
        Ok(applied)
    }

    async fn record_sync_state(
        &self,
        user_id: Uuid,
        spreadsheet_id: &str,
        transaction_id: Uuid,
        fingerprint: &str,
        row_ref: &RemoteRowRef,
    ) -> Result<(), AppError> {
        {
            let mut records = self.transactions.lock().unwrap();
            if let Some(record) = records
                .iter_mut()
                .find(|r| r.user_id == user_id && r.transaction_id == transaction_id)
            {
                record.sync_fingerprint = Some(fingerprint.to_string());
                record.remote_sheet_name = Some(row_ref.sheet_name.clone());
                record.remote_row_index = Some(row_ref.row_index as i32);
            }
        }
        let mut states = self.states.lock().unwrap();
        if let Some(state) = states
            .iter_mut()
            .find(|s| s.transaction_id == transaction_id && s.spreadsheet_id == spreadsheet_id)
        {
            state.sheet_name = row_ref.sheet_name.clone();
            state.row_index = row_ref.row_index as i32;
            state.base_fingerprint = fingerprint.to_string();
            state.synced_utc = Utc::now();
        } else {
            states.push(SyncState {
                transaction_id,
                user_id,
                spreadsheet_id: spreadsheet_id.to_string(),
                sheet_name: row_ref.sheet_name.clone(),
                row_index: row_ref.row_index as i32,
                base_fingerprint: fingerprint.to_string(),
                synced_utc: Utc::now(),
            });
        }
        Ok(())
    }

    async fn delete_sync_state(
        &self,
        _user_id: Uuid,
        spreadsheet_id: &str,
        transaction_id: Uuid,
    ) -> Result<(), AppError> {
        self.states
            .lock()
            .unwrap()
            .retain(|s| !(s.transaction_id == transaction_id && s.spreadsheet_id == spreadsheet_id));
        Ok(())
    }

    async fn clear_remote_ref(&self, user_id: Uuid, transaction_id: Uuid) -> Result<(), AppError> {
        let mut records = self.transactions.lock().unwrap();
        if let Some(record) = records
            .iter_mut()
            .find(|r| r.user_id == user_id && r.transaction_id == transaction_id)
        {
            record.remote_sheet_name = None;
            record.remote_row_index = None;
            record.sync_fingerprint = None;
        }
        Ok(())
    }

    async fn upsert_conflict(&self, conflict: &Conflict) -> Result<Conflict, AppError> {
        let mut conflicts = self.conflicts.lock().unwrap();
        if let Some(existing) = conflicts.iter_mut().find(|c| {
            c.transaction_id == conflict.transaction_id
                && c.spreadsheet_id == conflict.spreadsheet_id
                && c.conflict_type == conflict.conflict_type
        }) {
            match existing.resolution_status() {
                ResolutionStatus::Pending | ResolutionStatus::Ignored => {}
                _ => {
                    existing.resolution_status = ResolutionStatus::Pending.as_str().to_string();
                    existing.local_value = conflict.local_value.clone();
                    existing.remote_value = conflict.remote_value.clone();
                    existing.remote_row_index = conflict.remote_row_index;
                    existing.detected_utc = conflict.detected_utc;
                    existing.resolved_utc = None;
                }
            }
            return Ok(existing.clone());
        }
        conflicts.push(conflict.clone());
        Ok(conflict.clone())
    }

    async fn get_conflict(
        &self,
        user_id: Uuid,
        conflict_id: Uuid,
    ) -> Result<Option<Conflict>, AppError> {
        Ok(self
            .conflicts
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.user_id == user_id && c.conflict_id == conflict_id)
            .cloned())
    }

    async fn set_conflict_resolution(
        &self,
        user_id: Uuid,
        conflict_id: Uuid,
        status: ResolutionStatus,
    ) -> Result<(), AppError> {
        let mut conflicts = self.conflicts.lock().unwrap();
        let conflict = conflicts
            .iter_mut()
            .find(|c| c.user_id == user_id && c.conflict_id == conflict_id)
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("conflict not found")))?;
        conflict.resolution_status = status.as_str().to_string();
        conflict.resolved_utc = Some(Utc::now());
        Ok(())
    }

    async fn list_conflicts(
        &self,
        user_id: Uuid,
        spreadsheet_id: Option<&str>,
    ) -> Result<Vec<Conflict>, AppError> {
        Ok(self
            .conflicts
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.user_id == user_id)
            .filter(|c| spreadsheet_id.is_none() || Some(c.spreadsheet_id.as_str()) == spreadsheet_id)
            .cloned()
            .collect())
    }
}

// ============================================================================
// Builders
// ============================================================================

pub fn transaction(user_id: Uuid, description: &str, cents: i64) -> TransactionRecord {
    TransactionRecord {
        transaction_id: Uuid::new_v4(),
        user_id,
        job_id: None,
        transaction_date: NaiveDate::from_ymd_opt(2025, 2, 14).unwrap(),
        description: description.to_string(),
        amount: Decimal::new(cents, 2),
        category: "Office Supplies".to_string(),
        subcategory: None,
        confidence_score: Some(0.92),
        user_confirmed: false,
        user_notes: None,
        sync_fingerprint: None,
        remote_sheet_name: None,
        remote_row_index: None,
        created_utc: Utc::now(),
        updated_utc: Utc::now(),
    }
}

/// Place a record's row on the sheet and seed its agreed base state.
pub fn place_synced(
    sheet: &FakeSheet,
    store: &FakeStore,
    record: &TransactionRecord,
    spreadsheet_id: &str,
    row_index: u32,
) {
    sheet.set_row(row_index, RowMapper::to_row(record));
    store.seed_state(record, spreadsheet_id, row_index);
}
