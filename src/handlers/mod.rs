//! HTTP surface. Handlers unwrap the request, call into the engine and wrap
//! the result in the response envelope; nothing stateful lives here.

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::config::Config;
use crate::engine::gateway::GatewayRegistry;
use crate::utils::error::AppError;
use crate::utils::response::success;

pub mod audit;
pub mod checkout;
pub mod events;
pub mod orders;
pub mod refunds;
pub mod tickets;
pub mod transfers;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub gateways: GatewayRegistry,
    pub config: Config,
}

/// The authenticated caller. Authentication itself terminates upstream; the
/// proxy forwards the verified identity in `x-user-id`.
pub struct CurrentUser(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get("x-user-id")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::AuthError("Missing x-user-id header".to_string()))?;
        let user_id = header
            .parse::<Uuid>()
            .map_err(|_| AppError::AuthError("Invalid x-user-id header".to_string()))?;
        Ok(CurrentUser(user_id))
    }
}

#[derive(Serialize)]
struct HealthPayload {
    status: &'static str,
    service: &'static str,
}

pub async fn health_check() -> Response {
    let payload = HealthPayload {
        status: "ok",
        service: "tiketi-api",
    };

    success(payload, "Health check successful").into_response()
}
