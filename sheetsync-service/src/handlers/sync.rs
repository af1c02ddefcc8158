use crate::models::{ConflictMode, SyncDirection, SyncResult};
use crate::startup::AppState;
use crate::sync::SyncOptions;
use axum::{extract::State, http::HeaderMap, Json};
use serde::Deserialize;
use service_core::error::AppError;
use std::time::Duration;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct SyncRequest {
    #[validate(length(min = 1, max = 256))]
    pub spreadsheet_id: String,
    #[validate(length(min = 1, max = 100))]
    pub sheet_name: Option<String>,
    /// `push`, `pull` or `bidirectional` (default).
    pub direction: Option<String>,
    /// `manual` (default), `prefer_local` or `prefer_remote`.
    pub conflict_mode: Option<String>,
    /// Restrict the pass to one categorization job's transactions.
    pub job_id: Option<Uuid>,
    #[validate(range(min = 1, max = 3600))]
    pub deadline_secs: Option<u64>,
}

/// POST /sync
///
/// Runs one sync pass and always answers 200 with the terminal
/// [`SyncResult`]; operational failures are reported inside it, not as an
/// HTTP error. Only malformed requests and missing identity map to error
/// statuses.
pub async fn run_sync(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<SyncRequest>,
) -> Result<Json<SyncResult>, AppError> {
    let user_id = super::require_user_id(&headers)?;
    req.validate()?;

    let direction = match &req.direction {
        None => SyncDirection::Bidirectional,
        Some(s) => SyncDirection::from_str(s).ok_or_else(|| {
            AppError::BadRequest(anyhow::anyhow!("unknown direction: {s}"))
        })?,
    };
    let conflict_mode = match &req.conflict_mode {
        None => ConflictMode::default(),
        Some(s) => ConflictMode::from_str(s).ok_or_else(|| {
            AppError::BadRequest(anyhow::anyhow!("unknown conflict_mode: {s}"))
        })?,
    };

    let options = SyncOptions {
        user_id,
        spreadsheet_id: req.spreadsheet_id,
        sheet_name: req
            .sheet_name
            .unwrap_or_else(|| state.config.sync.default_sheet_name.clone()),
        conflict_mode,
        job_id: req.job_id,
        deadline: Duration::from_secs(
            req.deadline_secs.unwrap_or(state.config.sync.deadline_secs),
        ),
    };

    let result = match direction {
        SyncDirection::Push => state.orchestrator.push_to_sheets(&options).await,
        SyncDirection::Pull => state.orchestrator.pull_from_sheets(&options).await,
        SyncDirection::Bidirectional => state.orchestrator.bidirectional_sync(&options).await,
    };
    Ok(Json(result))
}
