use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use super::{AppState, CurrentUser};
use crate::engine::orders::{self, ApplyPaymentRequest, ListQuery};
use crate::utils::error::AppError;
use crate::utils::response::success;

#[derive(Deserialize)]
pub struct CancelOrderRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

pub async fn get(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(order_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let (order, tickets) = orders::get(&state.pool, user_id, order_id).await?;
    Ok(success(json!({ "order": order, "tickets": tickets }), "Order retrieved").into_response())
}

pub async fn list(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Query(query): Query<ListQuery>,
) -> Result<Response, AppError> {
    let page = orders::list(&state.pool, user_id, query).await?;
    Ok(success(page, "Orders retrieved").into_response())
}

pub async fn pay(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(order_id): Path<Uuid>,
    Json(req): Json<ApplyPaymentRequest>,
) -> Result<Response, AppError> {
    let (order, payment) = orders::apply_payment(&state.pool, user_id, order_id, req).await?;
    Ok(success(json!({ "order": order, "payment": payment }), "Payment applied").into_response())
}

pub async fn cancel(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(order_id): Path<Uuid>,
    Json(req): Json<CancelOrderRequest>,
) -> Result<Response, AppError> {
    let order = orders::cancel(&state.pool, user_id, order_id, req.reason).await?;
    Ok(success(order, "Order cancelled").into_response())
}
