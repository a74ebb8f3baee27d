//! Uniform capability set over the payment gateways: intent creation,
//! verification and refunds. Adapters are stateless, thread-safe handles
//! keyed by configuration; none of them is ever called while a database
//! transaction holds locks.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::config::GatewayConfig;
use crate::engine::money::Money;
use crate::models::payment::PaymentGatewayKind;
use crate::utils::error::AppError;

mod offline;
mod paypal;
mod stripe;
mod zim;

pub use offline::OfflineGateway;
pub use paypal::PaypalGateway;
pub use stripe::StripeGateway;
pub use zim::ZimGateway;

/// Intent creation retries on transient failures only.
const INTENT_MAX_ATTEMPTS: u32 = 3;
const BACKOFF_BASE_MS: u64 = 200;
const BACKOFF_CAP_MS: u64 = 2_000;

/// Gateway calls time out after 30 seconds.
pub const GATEWAY_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// Network trouble or a 5xx from the gateway; retrying may succeed.
    #[error("transient gateway failure: {0}")]
    Transient(String),

    /// The gateway rejected the request; retrying will not help.
    #[error("gateway failure: {0}")]
    Fatal(String),
}

impl From<GatewayError> for AppError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::Transient(msg) => AppError::GatewayTransient(msg),
            GatewayError::Fatal(msg) => AppError::GatewayFatal(msg),
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() {
            GatewayError::Transient(e.to_string())
        } else if let Some(status) = e.status() {
            if status.is_server_error() {
                GatewayError::Transient(format!("gateway returned {}", status))
            } else {
                GatewayError::Fatal(format!("gateway returned {}", status))
            }
        } else {
            GatewayError::Transient(e.to_string())
        }
    }
}

/// Adapter-specific material the client needs to proceed with payment.
#[derive(Debug, Clone)]
pub struct PaymentIntent {
    pub intent_id: String,
    pub client_payload: Value,
}

/// A successful verification outcome, raw response included for the audit
/// trail and the payment record.
#[derive(Debug, Clone)]
pub struct Verification {
    pub transaction_id: String,
    pub raw_response: Value,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn kind(&self) -> PaymentGatewayKind;

    async fn create_intent(
        &self,
        amount: &Money,
        reference: &str,
        user_id: Uuid,
    ) -> Result<PaymentIntent, GatewayError>;

    /// Confirms (or denies) that the referenced payment went through.
    /// Implementations must never synthesize success: a transient failure
    /// here is fatal for the checkout and the payment stays pending.
    async fn verify(
        &self,
        reference: &str,
        verification_payload: &Value,
    ) -> Result<Verification, GatewayError>;

    /// Returns the gateway's refund id.
    async fn refund(&self, transaction_id: &str, amount: &Money) -> Result<String, GatewayError>;
}

/// Creates an intent, retrying transient failures with exponential backoff
/// (200ms base, 2s cap, 3 attempts).
pub async fn create_intent_with_retry(
    gateway: &dyn PaymentGateway,
    amount: &Money,
    reference: &str,
    user_id: Uuid,
) -> Result<PaymentIntent, GatewayError> {
    let mut attempt = 0u32;
    loop {
        match gateway.create_intent(amount, reference, user_id).await {
            Ok(intent) => return Ok(intent),
            Err(GatewayError::Transient(msg)) => {
                attempt += 1;
                if attempt >= INTENT_MAX_ATTEMPTS {
                    return Err(GatewayError::Transient(msg));
                }
                let delay = backoff_delay(attempt);
                warn!(
                    gateway = ?gateway.kind(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Transient gateway failure creating intent, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(fatal) => return Err(fatal),
        }
    }
}

/// Pulls the server-stamped amount and currency out of a verification
/// payload. Adapters refuse to verify a charge they cannot compare against
/// the pending payment.
pub(crate) fn expected_money(payload: &Value) -> Result<(Decimal, String), GatewayError> {
    let amount = payload["expected_amount"]
        .as_str()
        .and_then(|s| Decimal::from_str_exact(s).ok())
        .ok_or_else(|| {
            GatewayError::Fatal("verification payload is missing the expected amount".to_string())
        })?;
    let currency = payload["expected_currency"]
        .as_str()
        .ok_or_else(|| {
            GatewayError::Fatal("verification payload is missing the expected currency".to_string())
        })?
        .to_string();
    Ok((amount, currency))
}

/// Delay before retry `attempt` (1-based): base * 2^(attempt-1), capped.
fn backoff_delay(attempt: u32) -> Duration {
    let exp = BACKOFF_BASE_MS.saturating_mul(1u64 << (attempt - 1).min(16));
    Duration::from_millis(exp.min(BACKOFF_CAP_MS))
}

/// The set of configured gateway handles, shared across request handlers.
#[derive(Clone)]
pub struct GatewayRegistry {
    gateways: Arc<HashMap<PaymentGatewayKind, Arc<dyn PaymentGateway>>>,
}

impl GatewayRegistry {
    pub fn from_config(config: &GatewayConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(GATEWAY_TIMEOUT_SECS))
            .build()
            .expect("Failed to build gateway HTTP client");

        let mut gateways: HashMap<PaymentGatewayKind, Arc<dyn PaymentGateway>> = HashMap::new();
        gateways.insert(
            PaymentGatewayKind::Stripe,
            Arc::new(StripeGateway::new(client.clone(), config)),
        );
        gateways.insert(
            PaymentGatewayKind::Paypal,
            Arc::new(PaypalGateway::new(client.clone(), config)),
        );
        gateways.insert(
            PaymentGatewayKind::ZimGateway,
            Arc::new(ZimGateway::new(client, config)),
        );
        gateways.insert(PaymentGatewayKind::Offline, Arc::new(OfflineGateway::new()));

        Self {
            gateways: Arc::new(gateways),
        }
    }

    pub fn get(&self, kind: PaymentGatewayKind) -> Result<Arc<dyn PaymentGateway>, AppError> {
        self.gateways.get(&kind).cloned().ok_or_else(|| {
            AppError::InternalServerError(format!("No adapter configured for {:?}", kind))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        assert_eq!(backoff_delay(1), Duration::from_millis(200));
        assert_eq!(backoff_delay(2), Duration::from_millis(400));
        assert_eq!(backoff_delay(3), Duration::from_millis(800));
        assert_eq!(backoff_delay(4), Duration::from_millis(1_600));
        assert_eq!(backoff_delay(5), Duration::from_millis(2_000));
        assert_eq!(backoff_delay(12), Duration::from_millis(2_000));
    }

    #[test]
    fn test_expected_money_requires_server_stamps() {
        let payload = serde_json::json!({
            "expected_amount": "42.50",
            "expected_currency": "USD",
        });
        let (amount, currency) = expected_money(&payload).unwrap();
        assert_eq!(amount, Decimal::from_str_exact("42.50").unwrap());
        assert_eq!(currency, "USD");

        assert!(expected_money(&serde_json::json!({})).is_err());
        assert!(expected_money(&serde_json::json!({ "expected_amount": "nope" })).is_err());
    }

    #[test]
    fn test_transient_and_fatal_map_to_distinct_kinds() {
        let t: AppError = GatewayError::Transient("down".to_string()).into();
        let f: AppError = GatewayError::Fatal("declined".to_string()).into();
        assert_eq!(t.code(), "GATEWAY_TRANSIENT");
        assert_eq!(f.code(), "GATEWAY_FATAL");
    }
}
