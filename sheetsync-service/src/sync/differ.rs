//! Three-way delta between the last known-synced base, the current local
//! records and the current remote rows.

use crate::models::{
    ConflictType, RemoteEdit, RemoteRecord, RemoteRowRef, SheetRow, SyncState, TransactionRecord,
};
use crate::sync::mapper::{format_amount, RowMapper};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Where a push lands: overwrite a known row, or append at sheet end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowTarget {
    Update(u32),
    Append,
}

/// One record to write to the sheet.
#[derive(Debug, Clone)]
pub struct PushAction {
    pub record: TransactionRecord,
    pub fingerprint: String,
    pub target: RowTarget,
}

/// One remote edit to apply locally.
#[derive(Debug, Clone)]
pub struct PullAction {
    pub edit: RemoteEdit,
    pub remote_fingerprint: String,
    pub row_index: u32,
}

/// Base-state refresh for a record that needs no data movement (content
/// already equal on both sides, or a first link to an identical row).
#[derive(Debug, Clone)]
pub struct StateRefresh {
    pub transaction_id: Uuid,
    pub fingerprint: String,
    pub row_ref: RemoteRowRef,
}

/// A divergence the pass must not apply automatically.
#[derive(Debug, Clone)]
pub struct DetectedConflict {
    pub transaction_id: Uuid,
    pub conflict_type: ConflictType,
    pub local_value: Option<String>,
    pub remote_value: Option<String>,
    pub remote_row_index: Option<u32>,
}

/// Everything one diff pass decided. `pushes + pulls + skipped + conflicts`
/// covers every record considered exactly once; `refreshes` piggyback on
/// skipped rows and carry no count of their own.
#[derive(Debug, Clone, Default)]
pub struct SyncDelta {
    pub pushes: Vec<PushAction>,
    pub pulls: Vec<PullAction>,
    pub skipped: Vec<Uuid>,
    pub conflicts: Vec<DetectedConflict>,
    pub refreshes: Vec<StateRefresh>,
}

/// Pure three-way diff over one `(user, spreadsheet, sheet)` snapshot.
pub struct Differencer<'a> {
    sheet_name: &'a str,
    remote: HashMap<u32, RemoteRecord>,
    remote_fp: HashMap<u32, String>,
    /// identity key -> data row indices, for first-time matching.
    identity: HashMap<String, Vec<u32>>,
    bases: HashMap<Uuid, &'a SyncState>,
}

impl<'a> Differencer<'a> {
    /// `data_rows` excludes the header row.
    pub fn new(sheet_name: &'a str, data_rows: &[SheetRow], bases: &'a [SyncState]) -> Self {
        let mut remote = HashMap::new();
        let mut remote_fp = HashMap::new();
        let mut identity: HashMap<String, Vec<u32>> = HashMap::new();

        for row in data_rows {
            let parsed = RowMapper::from_row(row);
            let key = RowMapper::identity_key(
                parsed.transaction_date,
                &parsed.description,
                parsed.amount,
            );
            identity.entry(key).or_default().push(row.row_index);
            remote_fp.insert(row.row_index, RowMapper::fingerprint_remote(&parsed));
            remote.insert(row.row_index, parsed);
        }

        let bases = bases
            .iter()
            .filter(|s| s.sheet_name == sheet_name)
            .map(|s| (s.transaction_id, s))
            .collect();

        Self {
            sheet_name,
            remote,
            remote_fp,
            identity,
            bases,
        }
    }

    pub fn remote_record(&self, row_index: u32) -> Option<&RemoteRecord> {
        self.remote.get(&row_index)
    }

    pub fn remote_fingerprint(&self, row_index: u32) -> Option<&str> {
        self.remote_fp.get(&row_index).map(String::as_str)
    }

    fn row_ref(&self, row_index: u32) -> RemoteRowRef {
        RemoteRowRef {
            sheet_name: self.sheet_name.to_string(),
            row_index,
        }
    }

    /// The row a record is linked to, from the recorded base first, else
    /// from the record's own reference, and only when it points at this tab.
    fn linked_row(&self, record: &TransactionRecord) -> Option<u32> {
        if let Some(state) = self.bases.get(&record.transaction_id) {
            return Some(state.row_index.max(0) as u32);
        }
        record
            .remote_row_ref()
            .filter(|r| r.sheet_name == self.sheet_name)
            .map(|r| r.row_index)
    }

    fn base_fingerprint(&self, record: &TransactionRecord) -> Option<String> {
        self.bases
            .get(&record.transaction_id)
            .map(|s| s.base_fingerprint.clone())
            .or_else(|| record.sync_fingerprint.clone())
    }

    /// Full three-way classification for a bidirectional pass.
    pub fn diff(&self, locals: &[TransactionRecord]) -> SyncDelta {
        let mut delta = SyncDelta::default();
        let mut claimed: HashSet<u32> = HashSet::new();
        let local_ids: HashSet<Uuid> = locals.iter().map(|r| r.transaction_id).collect();

        for record in locals {
            let local_fp = RowMapper::fingerprint(record);

            if let Some(row_index) = self.linked_row(record) {
                claimed.insert(row_index);
                self.diff_linked(record, &local_fp, row_index, &mut delta);
            } else {
                self.diff_unlinked(record, &local_fp, &mut delta, &mut claimed);
            }
        }

        // Remote rows orphaned by a local deletion: the record is gone from
        // the local set but a base revision still points at (or matches) a
        // surviving row. Unknown human-added rows are not records of ours
        // and stay untouched.
        for (id, state) in &self.bases {
            if local_ids.contains(id) {
                continue;
            }
            let row_index = state.row_index.max(0) as u32;
            let survives = self.remote_fp.get(&row_index).map(|fp| fp == &state.base_fingerprint)
                == Some(true)
                || self
                    .remote_fp
                    .iter()
                    .any(|(idx, fp)| !claimed.contains(idx) && fp == &state.base_fingerprint);
            if survives {
                delta.conflicts.push(DetectedConflict {
                    transaction_id: *id,
                    conflict_type: ConflictType::DeletedLocally,
                    local_value: None,
                    remote_value: Some(state.base_fingerprint.clone()),
                    remote_row_index: Some(row_index),
                });
            }
        }

        delta
    }

    fn diff_linked(
        &self,
        record: &TransactionRecord,
        local_fp: &str,
        row_index: u32,
        delta: &mut SyncDelta,
    ) {
        let Some(remote) = self.remote.get(&row_index) else {
            // Reference points at a row that no longer exists.
            delta.conflicts.push(DetectedConflict {
                transaction_id: record.transaction_id,
                conflict_type: ConflictType::DeletedRemotely,
                local_value: Some(describe_local(record)),
                remote_value: None,
                remote_row_index: Some(row_index),
            });
            return;
        };

        let remote_fp = &self.remote_fp[&row_index];
        let base_fp = self.base_fingerprint(record);

        if local_fp == remote_fp {
            // Both sides agree; refresh the base if it lags behind.
            delta.skipped.push(record.transaction_id);
            if base_fp.as_deref() != Some(local_fp) {
                delta.refreshes.push(StateRefresh {
                    transaction_id: record.transaction_id,
                    fingerprint: local_fp.to_string(),
                    row_ref: self.row_ref(row_index),
                });
            }
            return;
        }

        let (local_changed, remote_changed) = match &base_fp {
            Some(base) => (local_fp != base, remote_fp != base),
            // No recorded base: any difference is indistinguishable from a
            // two-sided edit, so it is a conflict.
            None => (true, true),
        };

        match (local_changed, remote_changed) {
            (true, false) => delta.pushes.push(PushAction {
                record: record.clone(),
                fingerprint: local_fp.to_string(),
                target: RowTarget::Update(row_index),
            }),
            (false, true) => delta.pulls.push(PullAction {
                edit: remote_edit(record.transaction_id, remote),
                remote_fingerprint: remote_fp.clone(),
                row_index,
            }),
            // base == local == remote is unreachable here (fingerprints
            // differ), so (false, false) cannot happen with a real base.
            _ => delta
                .conflicts
                .push(classify_conflict(record, remote, row_index)),
        }
    }

    fn diff_unlinked(
        &self,
        record: &TransactionRecord,
        local_fp: &str,
        delta: &mut SyncDelta,
        claimed: &mut HashSet<u32>,
    ) {
        let key = RowMapper::identity_key(
            Some(record.transaction_date),
            &record.description,
            record.amount,
        );
        let candidates: Vec<u32> = self
            .identity
            .get(&key)
            .map(|rows| {
                rows.iter()
                    .copied()
                    .filter(|idx| !claimed.contains(idx))
                    .collect()
            })
            .unwrap_or_default();

        match candidates.as_slice() {
            [] => delta.pushes.push(PushAction {
                record: record.clone(),
                fingerprint: local_fp.to_string(),
                target: RowTarget::Append,
            }),
            [row_index] => {
                // First-link heuristic: exactly one unclaimed candidate.
                claimed.insert(*row_index);
                if &self.remote_fp[row_index] == local_fp {
                    delta.skipped.push(record.transaction_id);
                    delta.refreshes.push(StateRefresh {
                        transaction_id: record.transaction_id,
                        fingerprint: local_fp.to_string(),
                        row_ref: self.row_ref(*row_index),
                    });
                } else {
                    delta.pushes.push(PushAction {
                        record: record.clone(),
                        fingerprint: local_fp.to_string(),
                        target: RowTarget::Update(*row_index),
                    });
                }
            }
            many => {
                // Multiple rows carry this record's identity; never pick one
                // silently.
                delta.conflicts.push(DetectedConflict {
                    transaction_id: record.transaction_id,
                    conflict_type: ConflictType::DuplicateRow,
                    local_value: Some(describe_local(record)),
                    remote_value: Some(format!(
                        "rows {}",
                        many.iter()
                            .map(|r| r.to_string())
                            .collect::<Vec<_>>()
                            .join(", ")
                    )),
                    remote_row_index: many.first().copied(),
                });
            }
        }
    }

    /// Push-only classification: local is authoritative, remote divergence
    /// is overwritten and never a conflict.
    pub fn diff_push(&self, locals: &[TransactionRecord]) -> SyncDelta {
        let mut delta = SyncDelta::default();
        let mut claimed: HashSet<u32> = HashSet::new();

        for record in locals {
            let local_fp = RowMapper::fingerprint(record);

            let target_row = self.linked_row(record).or_else(|| {
                let key = RowMapper::identity_key(
                    Some(record.transaction_date),
                    &record.description,
                    record.amount,
                );
                self.identity
                    .get(&key)
                    .and_then(|rows| rows.iter().find(|idx| !claimed.contains(idx)))
                    .copied()
            });

            match target_row {
                Some(row_index) if self.remote.contains_key(&row_index) => {
                    claimed.insert(row_index);
                    if self.remote_fp[&row_index] == local_fp {
                        delta.skipped.push(record.transaction_id);
                        if self.base_fingerprint(record).as_deref() != Some(local_fp.as_str()) {
                            delta.refreshes.push(StateRefresh {
                                transaction_id: record.transaction_id,
                                fingerprint: local_fp.clone(),
                                row_ref: self.row_ref(row_index),
                            });
                        }
                    } else {
                        delta.pushes.push(PushAction {
                            record: record.clone(),
                            fingerprint: local_fp,
                            target: RowTarget::Update(row_index),
                        });
                    }
                }
                _ => delta.pushes.push(PushAction {
                    record: record.clone(),
                    fingerprint: local_fp,
                    target: RowTarget::Append,
                }),
            }
        }

        delta
    }

    /// Pull-only classification: the spreadsheet is authoritative for the
    /// business fields of every linked record. Unlinked records have
    /// nothing to pull and are skipped; a linked row that vanished is still
    /// a deletion conflict, never an implicit local delete.
    pub fn diff_pull(&self, locals: &[TransactionRecord]) -> SyncDelta {
        let mut delta = SyncDelta::default();

        for record in locals {
            let local_fp = RowMapper::fingerprint(record);

            let Some(row_index) = self.linked_row(record) else {
                delta.skipped.push(record.transaction_id);
                continue;
            };

            match self.remote.get(&row_index) {
                None => delta.conflicts.push(DetectedConflict {
                    transaction_id: record.transaction_id,
                    conflict_type: ConflictType::DeletedRemotely,
                    local_value: Some(describe_local(record)),
                    remote_value: None,
                    remote_row_index: Some(row_index),
                }),
                Some(remote) => {
                    let remote_fp = &self.remote_fp[&row_index];
                    if remote_fp == &local_fp {
                        delta.skipped.push(record.transaction_id);
                    } else {
                        delta.pulls.push(PullAction {
                            edit: remote_edit(record.transaction_id, remote),
                            remote_fingerprint: remote_fp.clone(),
                            row_index,
                        });
                    }
                }
            }
        }

        delta
    }
}

fn remote_edit(transaction_id: Uuid, remote: &RemoteRecord) -> RemoteEdit {
    RemoteEdit {
        transaction_id,
        category: remote.category.clone(),
        subcategory: remote.subcategory.clone(),
        user_confirmed: remote.user_confirmed,
        user_notes: remote.user_notes.clone(),
    }
}

/// Amount takes priority over the category family when both differ.
fn classify_conflict(
    record: &TransactionRecord,
    remote: &RemoteRecord,
    row_index: u32,
) -> DetectedConflict {
    if format_amount(record.amount) != format_amount(remote.amount) {
        DetectedConflict {
            transaction_id: record.transaction_id,
            conflict_type: ConflictType::AmountMismatch,
            local_value: Some(format_amount(record.amount)),
            remote_value: Some(format_amount(remote.amount)),
            remote_row_index: Some(row_index),
        }
    } else {
        DetectedConflict {
            transaction_id: record.transaction_id,
            conflict_type: ConflictType::CategoryMismatch,
            local_value: Some(describe_category(record)),
            remote_value: Some(format!(
                "{}/{} confirmed={} notes={}",
                remote.category,
                remote.subcategory.as_deref().unwrap_or(""),
                remote.user_confirmed,
                remote.user_notes.as_deref().unwrap_or(""),
            )),
            remote_row_index: Some(row_index),
        }
    }
}

fn describe_category(record: &TransactionRecord) -> String {
    format!(
        "{}/{} confirmed={} notes={}",
        record.category,
        record.subcategory.as_deref().unwrap_or(""),
        record.user_confirmed,
        record.user_notes.as_deref().unwrap_or(""),
    )
}

fn describe_local(record: &TransactionRecord) -> String {
    format!(
        "{} {} {}",
        record.transaction_date,
        record.description,
        format_amount(record.amount)
    )
}
