//! Explicit resolution of persisted conflicts.

mod common;

use common::{place_synced, transaction, FakeSheet, FakeStore};
use rust_decimal::Decimal;
use sheetsync_service::models::{ConflictMode, ConflictType, ResolutionStatus};
use sheetsync_service::sync::{
    LocalStore, ResolutionAction, RowMapper, SyncOptions, SyncOrchestrator,
};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const SPREADSHEET: &str = "spreadsheet-1";

fn options(user_id: Uuid) -> SyncOptions {
    common::init_tracing();
    SyncOptions {
        user_id,
        spreadsheet_id: SPREADSHEET.to_string(),
        sheet_name: "Transactions".to_string(),
        conflict_mode: ConflictMode::Manual,
        job_id: None,
        deadline: Duration::from_secs(120),
    }
}

/// Sync once with both sides diverged, returning the pending conflict id.
async fn seed_mismatch(
    orchestrator: &SyncOrchestrator<FakeSheet, FakeStore>,
    sheet: &FakeSheet,
    store: &FakeStore,
    user_id: Uuid,
) -> (Uuid, Uuid) {
    let a = transaction(user_id, "Coffee", 450);
    place_synced(sheet, store, &a, SPREADSHEET, 2);
    store.insert(a.clone());
    store.update(a.transaction_id, |r| r.category = "Travel".to_string());
    let mut row = sheet.row(2).unwrap();
    row[3] = "Meals & Entertainment".to_string();
    sheet.set_row(2, row);

    let result = orchestrator.bidirectional_sync(&options(user_id)).await;
    assert_eq!(result.conflicts_detected, 1);
    (a.transaction_id, result.conflicts[0].conflict_id)
}

#[tokio::test]
async fn test_ignore_records_the_choice_and_touches_nothing() {
    let user_id = Uuid::new_v4();
    let sheet = Arc::new(FakeSheet::with_header());
    let store = Arc::new(FakeStore::new());
    let orchestrator = SyncOrchestrator::new(sheet.clone(), store.clone());
    let (transaction_id, conflict_id) =
        seed_mismatch(&orchestrator, &sheet, &store, user_id).await;

    let resolved = orchestrator
        .resolve_conflict(user_id, conflict_id, ResolutionAction::Ignore)
        .await
        .unwrap();

    assert_eq!(resolved.resolution_status(), ResolutionStatus::Ignored);
    assert!(resolved.resolved_utc.is_some());
    assert_eq!(sheet.row(2).unwrap()[3], "Meals & Entertainment");
    assert_eq!(store.transaction(transaction_id).unwrap().category, "Travel");
}

#[tokio::test]
async fn test_resolve_local_rewrites_the_row() {
    let user_id = Uuid::new_v4();
    let sheet = Arc::new(FakeSheet::with_header());
    let store = Arc::new(FakeStore::new());
    let orchestrator = SyncOrchestrator::new(sheet.clone(), store.clone());
    let (transaction_id, conflict_id) =
        seed_mismatch(&orchestrator, &sheet, &store, user_id).await;

    let resolved = orchestrator
        .resolve_conflict(user_id, conflict_id, ResolutionAction::Local)
        .await
        .unwrap();

    assert_eq!(resolved.resolution_status(), ResolutionStatus::ResolvedLocal);
    assert_eq!(sheet.row(2).unwrap()[3], "Travel");

    // Base caught up: the next pass is a no-op.
    let after = orchestrator.bidirectional_sync(&options(user_id)).await;
    assert_eq!(after.rows_skipped, 1);
    assert_eq!(after.conflicts_detected, 0);
    assert_eq!(store.transaction(transaction_id).unwrap().category, "Travel");
}

#[tokio::test]
async fn test_resolve_remote_pulls_the_row() {
    let user_id = Uuid::new_v4();
    let sheet = Arc::new(FakeSheet::with_header());
    let store = Arc::new(FakeStore::new());
    let orchestrator = SyncOrchestrator::new(sheet.clone(), store.clone());
    let (transaction_id, conflict_id) =
        seed_mismatch(&orchestrator, &sheet, &store, user_id).await;

    let resolved = orchestrator
        .resolve_conflict(user_id, conflict_id, ResolutionAction::Remote)
        .await
        .unwrap();

    assert_eq!(resolved.resolution_status(), ResolutionStatus::ResolvedRemote);
    assert_eq!(
        store.transaction(transaction_id).unwrap().category,
        "Meals & Entertainment"
    );

    let after = orchestrator.bidirectional_sync(&options(user_id)).await;
    assert_eq!(after.rows_skipped, 1);
    assert_eq!(after.conflicts_detected, 0);
}

#[tokio::test]
async fn test_resolve_remote_amount_mismatch_keeps_local_amount() {
    let user_id = Uuid::new_v4();
    let sheet = Arc::new(FakeSheet::with_header());
    let store = Arc::new(FakeStore::new());
    let orchestrator = SyncOrchestrator::new(sheet.clone(), store.clone());

    let a = transaction(user_id, "Coffee", 450);
    place_synced(&sheet, &store, &a, SPREADSHEET, 2);
    store.insert(a.clone());
    store.update(a.transaction_id, |r| r.amount = Decimal::new(475, 2));
    let mut row = sheet.row(2).unwrap();
    row[3] = "Meals & Entertainment".to_string();
    sheet.set_row(2, row);

    let result = orchestrator.bidirectional_sync(&options(user_id)).await;
    assert_eq!(
        result.conflicts[0].conflict_type(),
        ConflictType::AmountMismatch
    );

    orchestrator
        .resolve_conflict(user_id, result.conflicts[0].conflict_id, ResolutionAction::Remote)
        .await
        .unwrap();

    // The category came from the sheet, the amount did not; the row was
    // rewritten so both sides converge.
    let after = store.transaction(a.transaction_id).unwrap();
    assert_eq!(after.category, "Meals & Entertainment");
    assert_eq!(after.amount, Decimal::new(475, 2));
    assert_eq!(sheet.row(2).unwrap()[2], "4.75");

    let next = orchestrator.bidirectional_sync(&options(user_id)).await;
    assert_eq!(next.rows_skipped, 1);
    assert_eq!(next.conflicts_detected, 0);
}

#[tokio::test]
async fn test_resolve_local_reappends_after_remote_deletion() {
    let user_id = Uuid::new_v4();
    let sheet = Arc::new(FakeSheet::with_header());
    let store = Arc::new(FakeStore::new());
    let orchestrator = SyncOrchestrator::new(sheet.clone(), store.clone());

    let a = transaction(user_id, "Coffee", 450);
    place_synced(&sheet, &store, &a, SPREADSHEET, 2);
    store.insert(a.clone());
    sheet.delete_row(2);

    let result = orchestrator.bidirectional_sync(&options(user_id)).await;
    let conflict_id = result.conflicts[0].conflict_id;

    orchestrator
        .resolve_conflict(user_id, conflict_id, ResolutionAction::Local)
        .await
        .unwrap();

    assert_eq!(sheet.row(2).unwrap(), RowMapper::to_row(&a));
    assert_eq!(store.state_for(a.transaction_id).unwrap().row_index, 2);
}

#[tokio::test]
async fn test_resolve_remote_accepts_remote_deletion() {
    let user_id = Uuid::new_v4();
    let sheet = Arc::new(FakeSheet::with_header());
    let store = Arc::new(FakeStore::new());
    let orchestrator = SyncOrchestrator::new(sheet.clone(), store.clone());

    let a = transaction(user_id, "Coffee", 450);
    place_synced(&sheet, &store, &a, SPREADSHEET, 2);
    store.insert(a.clone());
    sheet.delete_row(2);

    let result = orchestrator.bidirectional_sync(&options(user_id)).await;
    orchestrator
        .resolve_conflict(user_id, result.conflicts[0].conflict_id, ResolutionAction::Remote)
        .await
        .unwrap();

    // The record survives locally, unlinked; no stale base remains.
    let after = store.transaction(a.transaction_id).unwrap();
    assert!(after.remote_row_index.is_none());
    assert!(store.state_for(a.transaction_id).is_none());
}

#[tokio::test]
async fn test_local_deletion_conflict_and_both_resolutions() {
    let user_id = Uuid::new_v4();
    let sheet = Arc::new(FakeSheet::with_header());
    let store = Arc::new(FakeStore::new());
    let orchestrator = SyncOrchestrator::new(sheet.clone(), store.clone());

    let a = transaction(user_id, "Coffee", 450);
    let b = transaction(user_id, "Lunch", 1825);
    place_synced(&sheet, &store, &a, SPREADSHEET, 2);
    place_synced(&sheet, &store, &b, SPREADSHEET, 3);
    store.insert(b.clone());
    // `a` was deleted locally after being synced; its row and base remain.

    let result = orchestrator.bidirectional_sync(&options(user_id)).await;
    assert_eq!(result.conflicts_detected, 1);
    let conflict = &result.conflicts[0];
    assert_eq!(conflict.conflict_type(), ConflictType::DeletedLocally);
    assert_eq!(conflict.transaction_id, a.transaction_id);

    // Local wins: the orphaned row is blanked and the base dropped.
    orchestrator
        .resolve_conflict(user_id, conflict.conflict_id, ResolutionAction::Local)
        .await
        .unwrap();
    assert!(sheet.row(2).unwrap().iter().all(|c| c.is_empty()));
    assert!(store.state_for(a.transaction_id).is_none());
}

#[tokio::test]
async fn test_resolving_twice_is_rejected() {
    let user_id = Uuid::new_v4();
    let sheet = Arc::new(FakeSheet::with_header());
    let store = Arc::new(FakeStore::new());
    let orchestrator = SyncOrchestrator::new(sheet.clone(), store.clone());
    let (_, conflict_id) = seed_mismatch(&orchestrator, &sheet, &store, user_id).await;

    orchestrator
        .resolve_conflict(user_id, conflict_id, ResolutionAction::Ignore)
        .await
        .unwrap();
    let err = orchestrator
        .resolve_conflict(user_id, conflict_id, ResolutionAction::Local)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("already"));
}

#[tokio::test]
async fn test_unknown_conflict_is_not_found() {
    let user_id = Uuid::new_v4();
    let sheet = Arc::new(FakeSheet::with_header());
    let store = Arc::new(FakeStore::new());
    let orchestrator = SyncOrchestrator::new(sheet.clone(), store.clone());

    let err = orchestrator
        .resolve_conflict(user_id, Uuid::new_v4(), ResolutionAction::Ignore)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("not found"));
}

#[tokio::test]
async fn test_resolved_conflict_reopens_on_new_divergence() {
    let user_id = Uuid::new_v4();
    let sheet = Arc::new(FakeSheet::with_header());
    let store = Arc::new(FakeStore::new());
    let orchestrator = SyncOrchestrator::new(sheet.clone(), store.clone());
    let (transaction_id, conflict_id) =
        seed_mismatch(&orchestrator, &sheet, &store, user_id).await;

    orchestrator
        .resolve_conflict(user_id, conflict_id, ResolutionAction::Local)
        .await
        .unwrap();

    // Both sides diverge again in the same way.
    store.update(transaction_id, |r| r.category = "Utilities".to_string());
    let mut row = sheet.row(2).unwrap();
    row[3] = "Rent".to_string();
    sheet.set_row(2, row);

    let result = orchestrator.bidirectional_sync(&options(user_id)).await;
    assert_eq!(result.conflicts_detected, 1);

    let stored = store
        .list_conflicts(user_id, Some(SPREADSHEET))
        .await
        .unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].conflict_id, conflict_id);
    assert_eq!(stored[0].resolution_status(), ResolutionStatus::Pending);
    assert!(stored[0].resolved_utc.is_none());
}
