use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::config::{create_cors_layer, security_headers};
use crate::handlers::{self, health_check, AppState};

pub fn create_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route(
            "/api/events/:id/availability",
            get(handlers::events::availability),
        )
        .route("/api/audit", get(handlers::audit::trail))
        .route("/api/cart", get(handlers::checkout::get_cart))
        .route("/api/cart/items", post(handlers::checkout::add_cart_item))
        .route("/api/cart", delete(handlers::checkout::clear_cart))
        .route("/api/checkout/initiate", post(handlers::checkout::initiate))
        .route("/api/checkout/complete", post(handlers::checkout::complete))
        .route("/api/checkout/:id", get(handlers::checkout::get))
        .route("/api/checkout/:id/cancel", post(handlers::checkout::cancel))
        .route(
            "/api/checkout/:id/confirm-offline",
            post(handlers::checkout::confirm_offline),
        )
        .route("/api/orders", get(handlers::orders::list))
        .route("/api/orders/:id", get(handlers::orders::get))
        .route("/api/orders/:id/pay", post(handlers::orders::pay))
        .route("/api/orders/:id/cancel", post(handlers::orders::cancel))
        .route("/api/tickets/purchase", post(handlers::tickets::purchase))
        .route("/api/tickets/validate", post(handlers::tickets::validate))
        .route(
            "/api/tickets/:id/confirm-payment",
            post(handlers::tickets::confirm_payment),
        )
        .route("/api/tickets/:id/cancel", post(handlers::tickets::cancel))
        .route("/api/tickets/:id/qr", get(handlers::tickets::qr_payload))
        .route("/api/transfers", post(handlers::transfers::initiate))
        .route(
            "/api/transfers/:id/accept",
            post(handlers::transfers::accept),
        )
        .route(
            "/api/transfers/:id/decline",
            post(handlers::transfers::decline),
        )
        .route("/api/refunds", post(handlers::refunds::request))
        .route("/api/refunds/:id/approve", post(handlers::refunds::approve))
        .route("/api/refunds/:id/reject", post(handlers::refunds::reject))
        .layer(middleware::from_fn(security_headers))
        .layer(create_cors_layer())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
