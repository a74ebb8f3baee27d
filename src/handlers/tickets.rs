use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use super::{AppState, CurrentUser};
use crate::engine::tickets::{self, ConfirmPaymentRequest, PurchaseRequest};
use crate::engine::validator::{self, ValidateRequest};
use crate::utils::error::AppError;
use crate::utils::response::{created, success};

pub async fn purchase(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Json(req): Json<PurchaseRequest>,
) -> Result<Response, AppError> {
    let outcome = tickets::purchase(&state.pool, &state.gateways, user_id, req).await?;
    Ok(created(outcome, "Tickets reserved").into_response())
}

pub async fn confirm_payment(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(ticket_id): Path<Uuid>,
    Json(req): Json<ConfirmPaymentRequest>,
) -> Result<Response, AppError> {
    let (order, payment) =
        tickets::confirm_payment(&state.pool, &state.gateways, user_id, ticket_id, req).await?;
    Ok(success(json!({ "order": order, "payment": payment }), "Payment confirmed").into_response())
}

pub async fn cancel(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(ticket_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let ticket = tickets::cancel(&state.pool, user_id, ticket_id).await?;
    Ok(success(ticket, "Ticket cancelled").into_response())
}

pub async fn qr_payload(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(ticket_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let payload = tickets::qr_payload(&state.pool, user_id, ticket_id).await?;
    Ok(success(json!({ "qr_data": payload }), "QR payload retrieved").into_response())
}

/// Gate-side scan. Authenticated like everything else, but the caller is a
/// scanner device, not the ticket holder.
pub async fn validate(
    State(state): State<AppState>,
    CurrentUser(_scanner_id): CurrentUser,
    Json(req): Json<ValidateRequest>,
) -> Result<Response, AppError> {
    let outcome = validator::validate(&state.pool, req, Utc::now()).await?;
    Ok(success(outcome, "Ticket validated").into_response())
}
