use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use uuid::Uuid;

use super::{AppState, CurrentUser};
use crate::engine::refunds::{self, RefundRequest, RejectRequest};
use crate::utils::error::AppError;
use crate::utils::response::{created, success};

pub async fn request(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Json(req): Json<RefundRequest>,
) -> Result<Response, AppError> {
    let refund = refunds::request(&state.pool, user_id, req).await?;
    Ok(created(refund, "Refund requested").into_response())
}

pub async fn approve(
    State(state): State<AppState>,
    CurrentUser(approver_id): CurrentUser,
    Path(refund_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let refund = refunds::approve(&state.pool, &state.gateways, approver_id, refund_id).await?;
    Ok(success(refund, "Refund approved").into_response())
}

pub async fn reject(
    State(state): State<AppState>,
    CurrentUser(approver_id): CurrentUser,
    Path(refund_id): Path<Uuid>,
    Json(req): Json<RejectRequest>,
) -> Result<Response, AppError> {
    let refund = refunds::reject(&state.pool, approver_id, refund_id, req).await?;
    Ok(success(refund, "Refund rejected").into_response())
}
