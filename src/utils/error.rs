use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use crate::utils::response::error as error_response;

/// One entry of a multi-field validation failure.
#[derive(Debug, Clone, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Validation failed")]
    ValidationErrors(Vec<FieldError>),

    #[error("Authentication error: {0}")]
    AuthError(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    /// A state-machine precondition failed on the locked row. The message
    /// reveals the current state so the caller can recover.
    #[error("Conflicting state: {0}")]
    ConflictingState(String),

    #[error("Insufficient: {0}")]
    Insufficient(String),

    #[error("Expired: {0}")]
    Expired(String),

    /// Gateway failure that may succeed on retry. Adapters retry internally;
    /// this surfaces only after retries are exhausted.
    #[error("Payment gateway unavailable: {0}")]
    GatewayTransient(String),

    #[error("Payment gateway error: {0}")]
    GatewayFatal(String),

    #[error("Database error")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Internal server error")]
    InternalServerError(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::ValidationError(_) | AppError::ValidationErrors(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::AuthError(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::ConflictingState(_) | AppError::Insufficient(_) => StatusCode::CONFLICT,
            AppError::Expired(_) => StatusCode::GONE,
            AppError::GatewayTransient(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::GatewayFatal(_) => StatusCode::BAD_GATEWAY,
            AppError::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::ValidationError(_) | AppError::ValidationErrors(_) => "VALIDATION_ERROR",
            AppError::AuthError(_) => "AUTH_ERROR",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::ConflictingState(_) => "CONFLICTING_STATE",
            AppError::Insufficient(_) => "INSUFFICIENT",
            AppError::Expired(_) => "EXPIRED",
            AppError::GatewayTransient(_) => "GATEWAY_TRANSIENT",
            AppError::GatewayFatal(_) => "GATEWAY_FATAL",
            AppError::DatabaseError(_) => "DATABASE_ERROR",
            AppError::InternalServerError(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    fn log(&self) {
        match self {
            AppError::ValidationError(msg)
            | AppError::AuthError(msg)
            | AppError::Forbidden(msg)
            | AppError::NotFound(msg)
            | AppError::ConflictingState(msg)
            | AppError::Insufficient(msg)
            | AppError::Expired(msg)
            | AppError::GatewayTransient(msg)
            | AppError::GatewayFatal(msg)
            | AppError::InternalServerError(msg) => {
                error!(error = ?self, message = %msg, "Application error");
            }
            AppError::ValidationErrors(fields) => {
                error!(error = ?self, fields = fields.len(), "Validation failed");
            }
            AppError::DatabaseError(e) => {
                error!(error = ?e, "Database error");
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();

        // Log internal details
        self.log();

        // Only expose high-level message to the client
        let public_message = match &self {
            AppError::ValidationError(msg)
            | AppError::AuthError(msg)
            | AppError::Forbidden(msg)
            | AppError::NotFound(msg)
            | AppError::ConflictingState(msg)
            | AppError::Insufficient(msg)
            | AppError::Expired(msg)
            | AppError::GatewayTransient(msg)
            | AppError::GatewayFatal(msg)
            | AppError::InternalServerError(msg) => msg.clone(),
            AppError::ValidationErrors(_) => "One or more fields are invalid".to_string(),
            AppError::DatabaseError(_) => "A database error occurred".to_string(),
        };

        // Field-level reasons are the only internal detail exposed to clients
        let details = match &self {
            AppError::ValidationErrors(fields) => serde_json::to_value(fields).ok(),
            _ => None,
        };

        error_response(code, public_message, details, status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflicting_state_maps_to_conflict() {
        let err = AppError::ConflictingState("Order is already fully paid".to_string());
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert_eq!(err.code(), "CONFLICTING_STATE");
    }

    #[test]
    fn test_expired_maps_to_gone() {
        let err = AppError::Expired("Checkout has expired".to_string());
        assert_eq!(err.status_code(), StatusCode::GONE);
        assert_eq!(err.code(), "EXPIRED");
    }

    #[test]
    fn test_field_errors_share_the_validation_code() {
        let err = AppError::ValidationErrors(vec![
            FieldError::new("quantity", "must be greater than zero"),
            FieldError::new("currency", "mixed currencies are not allowed"),
        ]);
        assert_eq!(err.code(), "VALIDATION_ERROR");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }
}
