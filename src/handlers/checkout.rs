use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use uuid::Uuid;

use super::{AppState, CurrentUser};
use crate::engine::checkout::{self, AddItemRequest, CompleteRequest, InitiateRequest};
use crate::utils::error::AppError;
use crate::utils::response::{created, empty_success, success};

pub async fn get_cart(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
) -> Result<Response, AppError> {
    let cart = checkout::get_or_create_cart(&state.pool, user_id).await?;
    let items = checkout::cart_items(&state.pool, cart.id).await?;
    Ok(success(json!({ "cart": cart, "items": items }), "Cart retrieved").into_response())
}

pub async fn add_cart_item(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Json(req): Json<AddItemRequest>,
) -> Result<Response, AppError> {
    let item = checkout::add_item(&state.pool, user_id, req).await?;
    Ok(created(item, "Item added to cart").into_response())
}

pub async fn clear_cart(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
) -> Result<Response, AppError> {
    checkout::clear_cart(&state.pool, user_id).await?;
    Ok(empty_success("Cart cleared").into_response())
}

pub async fn initiate(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Json(req): Json<InitiateRequest>,
) -> Result<Response, AppError> {
    let outcome = checkout::initiate(&state.pool, &state.gateways, user_id, req).await?;
    Ok(created(outcome, "Checkout initiated").into_response())
}

pub async fn complete(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Json(req): Json<CompleteRequest>,
) -> Result<Response, AppError> {
    let outcome = checkout::complete(&state.pool, &state.gateways, user_id, req).await?;
    Ok(success(outcome, "Checkout completed").into_response())
}

pub async fn cancel(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(checkout_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let checkout = checkout::cancel(&state.pool, user_id, checkout_id).await?;
    Ok(success(checkout, "Checkout cancelled").into_response())
}

pub async fn get(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(checkout_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let checkout = checkout::get(&state.pool, user_id, checkout_id).await?;
    Ok(success(checkout, "Checkout retrieved").into_response())
}

/// Operator acknowledgement that an offline payment arrived. Reached
/// through the proxy-gated admin surface, not by the buyer.
pub async fn confirm_offline(
    State(state): State<AppState>,
    CurrentUser(operator_id): CurrentUser,
    Path(checkout_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let payment =
        checkout::confirm_offline_payment(&state.pool, operator_id, checkout_id).await?;
    Ok(success(payment, "Offline payment confirmed").into_response())
}
