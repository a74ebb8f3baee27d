use std::env;

pub mod cors;
pub mod security;

pub use cors::create_cors_layer;
pub use security::security_headers;

/// Process configuration, read once at startup. Gateway credentials default
/// to sandbox-shaped placeholders so a development instance boots without a
/// full set of secrets.
#[derive(Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub gateways: GatewayConfig,
}

/// Per-gateway endpoints and credentials.
#[derive(Clone)]
pub struct GatewayConfig {
    pub stripe_api_base: String,
    pub stripe_secret_key: String,
    pub paypal_api_base: String,
    pub paypal_client_id: String,
    pub paypal_client_secret: String,
    pub zim_api_base: String,
    pub zim_integration_id: String,
    pub zim_integration_key: String,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost/tiketi".to_string()),
            port: env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(3000),
            gateways: GatewayConfig::from_env(),
        }
    }
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        Self {
            stripe_api_base: env::var("STRIPE_API_BASE")
                .unwrap_or_else(|_| "https://api.stripe.com".to_string()),
            stripe_secret_key: env::var("STRIPE_SECRET_KEY").unwrap_or_default(),
            paypal_api_base: env::var("PAYPAL_API_BASE")
                .unwrap_or_else(|_| "https://api-m.sandbox.paypal.com".to_string()),
            paypal_client_id: env::var("PAYPAL_CLIENT_ID").unwrap_or_default(),
            paypal_client_secret: env::var("PAYPAL_CLIENT_SECRET").unwrap_or_default(),
            zim_api_base: env::var("ZIM_GATEWAY_API_BASE")
                .unwrap_or_else(|_| "https://www.paynow.co.zw/interface".to_string()),
            zim_integration_id: env::var("ZIM_GATEWAY_INTEGRATION_ID").unwrap_or_default(),
            zim_integration_key: env::var("ZIM_GATEWAY_INTEGRATION_KEY").unwrap_or_default(),
        }
    }
}
