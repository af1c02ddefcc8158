//! HTTP handlers for sheetsync-service.

pub mod conflict;
pub mod health;
pub mod sync;

use axum::http::HeaderMap;
use service_core::error::AppError;
use uuid::Uuid;

/// Caller identity, injected by the gateway as `x-user-id`.
pub fn require_user_id(headers: &HeaderMap) -> Result<Uuid, AppError> {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s).ok())
        .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("missing or invalid x-user-id header")))
}
