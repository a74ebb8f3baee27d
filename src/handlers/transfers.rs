use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use super::{AppState, CurrentUser};
use crate::engine::transfers::{self, AcceptTransferRequest, InitiateTransferRequest};
use crate::utils::error::AppError;
use crate::utils::response::{created, success};

#[derive(Deserialize, Default)]
pub struct DeclineTransferRequest {
    #[serde(default)]
    pub transfer_code: Option<String>,
}

pub async fn initiate(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Json(req): Json<InitiateTransferRequest>,
) -> Result<Response, AppError> {
    let transfer = transfers::initiate(&state.pool, user_id, req).await?;
    Ok(created(transfer, "Transfer initiated").into_response())
}

pub async fn accept(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(transfer_id): Path<Uuid>,
    Json(req): Json<AcceptTransferRequest>,
) -> Result<Response, AppError> {
    let (transfer, ticket) = transfers::accept(&state.pool, user_id, transfer_id, req).await?;
    Ok(
        success(json!({ "transfer": transfer, "ticket": ticket }), "Transfer accepted")
            .into_response(),
    )
}

pub async fn decline(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(transfer_id): Path<Uuid>,
    Json(req): Json<DeclineTransferRequest>,
) -> Result<Response, AppError> {
    let transfer =
        transfers::decline(&state.pool, user_id, transfer_id, req.transfer_code.as_deref()).await?;
    Ok(success(transfer, "Transfer declined").into_response())
}
