use axum::{
    body::Body,
    http::{HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use std::env;

const NOSNIFF: &str = "nosniff";
const DENY: &str = "DENY";
const HSTS_VALUE: &str = "max-age=31536000; includeSubDomains";
const CSP_API_VALUE: &str = "default-src 'none'; frame-ancestors 'none'";
const REFERRER_POLICY_VALUE: &str = "strict-origin-when-cross-origin";

/// Stamps the standard API security headers on every response. HSTS only
/// goes out in production, where TLS terminates in front of us.
pub async fn security_headers(request: Request<Body>, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert("X-Content-Type-Options", HeaderValue::from_static(NOSNIFF));
    headers.insert("X-Frame-Options", HeaderValue::from_static(DENY));
    headers.insert(
        "Content-Security-Policy",
        HeaderValue::from_static(CSP_API_VALUE),
    );
    headers.insert(
        "Referrer-Policy",
        HeaderValue::from_static(REFERRER_POLICY_VALUE),
    );
    if is_production() {
        headers.insert(
            "Strict-Transport-Security",
            HeaderValue::from_static(HSTS_VALUE),
        );
    }
    response
}

fn is_production() -> bool {
    env::var("RUST_ENV")
        .map(|v| v.eq_ignore_ascii_case("production"))
        .unwrap_or(false)
}
