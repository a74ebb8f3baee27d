use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use super::{AppState, CurrentUser};
use crate::engine::audit;
use crate::utils::error::AppError;
use crate::utils::response::success;

#[derive(Deserialize)]
pub struct TrailQuery {
    pub resource_kind: String,
    pub resource_id: String,
    pub limit: Option<i64>,
}

/// Audit trail for one resource, newest first.
pub async fn trail(
    State(state): State<AppState>,
    CurrentUser(_user_id): CurrentUser,
    Query(query): Query<TrailQuery>,
) -> Result<Response, AppError> {
    let entries = audit::trail(
        &state.pool,
        &query.resource_kind,
        &query.resource_id,
        query.limit,
    )
    .await?;
    Ok(success(entries, "Audit trail retrieved").into_response())
}
