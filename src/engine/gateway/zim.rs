//! Adapter for the Zimbabwean mobile-money gateway (EcoCash / OneMoney
//! style). Initiation returns a poll URL; verification polls it. The
//! gateway offers no API-driven reversals, so refunds are fatal here and
//! must be settled manually.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::config::GatewayConfig;
use crate::engine::money::Money;
use crate::models::payment::PaymentGatewayKind;

use super::{GatewayError, PaymentGateway, PaymentIntent, Verification};

pub struct ZimGateway {
    client: reqwest::Client,
    api_base: String,
    integration_id: String,
    integration_key: String,
}

impl ZimGateway {
    pub fn new(client: reqwest::Client, config: &GatewayConfig) -> Self {
        Self {
            client,
            api_base: config.zim_api_base.clone(),
            integration_id: config.zim_integration_id.clone(),
            integration_key: config.zim_integration_key.clone(),
        }
    }
}

#[async_trait]
impl PaymentGateway for ZimGateway {
    fn kind(&self) -> PaymentGatewayKind {
        PaymentGatewayKind::ZimGateway
    }

    async fn create_intent(
        &self,
        amount: &Money,
        reference: &str,
        user_id: Uuid,
    ) -> Result<PaymentIntent, GatewayError> {
        let response = self
            .client
            .post(format!("{}/transactions/initiate", self.api_base))
            .json(&json!({
                "id": self.integration_id,
                "key": self.integration_key,
                "reference": reference,
                "amount": amount.amount.to_string(),
                "currency": amount.currency.as_str(),
                "customer": user_id.to_string(),
            }))
            .send()
            .await?
            .error_for_status()?;

        let body: Value = response.json().await?;
        let poll_url = body["pollUrl"]
            .as_str()
            .ok_or_else(|| GatewayError::Fatal("missing poll url".to_string()))?
            .to_string();

        Ok(PaymentIntent {
            intent_id: reference.to_string(),
            client_payload: json!({
                "gateway": "zim_gateway",
                "poll_url": poll_url,
                "redirect_url": body["redirectUrl"],
            }),
        })
    }

    async fn verify(
        &self,
        reference: &str,
        verification_payload: &Value,
    ) -> Result<Verification, GatewayError> {
        let poll_url = verification_payload["poll_url"]
            .as_str()
            .ok_or_else(|| GatewayError::Fatal("poll_url is required".to_string()))?;
        // Polls go only to the configured gateway host.
        if !poll_url.starts_with(&self.api_base) {
            return Err(GatewayError::Fatal(
                "poll url is not on the configured gateway host".to_string(),
            ));
        }
        let (expected_amount, _) = super::expected_money(verification_payload)?;

        let response = self
            .client
            .get(poll_url)
            .send()
            .await?
            .error_for_status()?;

        let body: Value = response.json().await?;
        match body["status"].as_str() {
            Some("Paid") | Some("paid") => {
                if body["reference"].as_str() != Some(reference) {
                    return Err(GatewayError::Fatal(
                        "poll result is for another payment".to_string(),
                    ));
                }
                if poll_amount(&body) != Some(expected_amount) {
                    return Err(GatewayError::Fatal(
                        "paid amount does not match the payment".to_string(),
                    ));
                }
                let transaction_id = body["paynowReference"]
                    .as_str()
                    .unwrap_or(reference)
                    .to_string();
                Ok(Verification {
                    transaction_id,
                    raw_response: body.clone(),
                })
            }
            Some(status) => Err(GatewayError::Fatal(format!(
                "mobile money transaction is {}, not Paid",
                status
            ))),
            None => Err(GatewayError::Fatal("malformed gateway response".to_string())),
        }
    }

    async fn refund(&self, _transaction_id: &str, _amount: &Money) -> Result<String, GatewayError> {
        Err(GatewayError::Fatal(
            "mobile money refunds require a manual reversal".to_string(),
        ))
    }
}

/// The poll response reports the amount as a string or a bare number
/// depending on the gateway version.
fn poll_amount(body: &Value) -> Option<Decimal> {
    match &body["amount"] {
        Value::String(s) => Decimal::from_str_exact(s).ok(),
        Value::Number(n) => n.as_f64().and_then(|f| Decimal::try_from(f).ok()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_amount_reads_both_shapes() {
        assert_eq!(
            poll_amount(&json!({ "amount": "42.50" })),
            Some(Decimal::from_str_exact("42.50").unwrap())
        );
        assert_eq!(
            poll_amount(&json!({ "amount": 42.5 })),
            Some(Decimal::from_str_exact("42.5").unwrap())
        );
        assert_eq!(poll_amount(&json!({})), None);
    }
}
