use crate::models::Conflict;
use crate::startup::AppState;
use crate::sync::{LocalStore, ResolutionAction};
use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct ListConflictsQuery {
    pub spreadsheet_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ConflictListResponse {
    pub conflicts: Vec<Conflict>,
}

/// GET /conflicts
pub async fn list_conflicts(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListConflictsQuery>,
) -> Result<Json<ConflictListResponse>, AppError> {
    let user_id = super::require_user_id(&headers)?;
    let conflicts = state
        .db
        .list_conflicts(user_id, query.spreadsheet_id.as_deref())
        .await?;
    Ok(Json(ConflictListResponse { conflicts }))
}

#[derive(Debug, Deserialize)]
pub struct ResolveConflictRequest {
    /// `local`, `remote` or `ignore`.
    pub resolution: String,
}

/// POST /conflicts/{conflict_id}/resolve
pub async fn resolve_conflict(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(conflict_id): Path<Uuid>,
    Json(req): Json<ResolveConflictRequest>,
) -> Result<Json<Conflict>, AppError> {
    let user_id = super::require_user_id(&headers)?;
    let action = ResolutionAction::from_str(&req.resolution).ok_or_else(|| {
        AppError::BadRequest(anyhow::anyhow!("unknown resolution: {}", req.resolution))
    })?;
    let conflict = state
        .orchestrator
        .resolve_conflict(user_id, conflict_id, action)
        .await?;
    Ok(Json(conflict))
}
