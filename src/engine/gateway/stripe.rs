//! Stripe adapter: PaymentIntents for collection, Refunds for reversal.
//! Amounts go over the wire in minor units.

use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::config::GatewayConfig;
use crate::engine::money::Money;
use crate::models::payment::PaymentGatewayKind;

use super::{GatewayError, PaymentGateway, PaymentIntent, Verification};

pub struct StripeGateway {
    client: reqwest::Client,
    api_base: String,
    secret_key: String,
}

impl StripeGateway {
    pub fn new(client: reqwest::Client, config: &GatewayConfig) -> Self {
        Self {
            client,
            api_base: config.stripe_api_base.clone(),
            secret_key: config.stripe_secret_key.clone(),
        }
    }

    fn minor_units(amount: &Money) -> Result<i64, GatewayError> {
        (amount.amount * rust_decimal::Decimal::ONE_HUNDRED)
            .to_i64()
            .ok_or_else(|| GatewayError::Fatal("amount out of range".to_string()))
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    fn kind(&self) -> PaymentGatewayKind {
        PaymentGatewayKind::Stripe
    }

    async fn create_intent(
        &self,
        amount: &Money,
        reference: &str,
        user_id: Uuid,
    ) -> Result<PaymentIntent, GatewayError> {
        let response = self
            .client
            .post(format!("{}/v1/payment_intents", self.api_base))
            .basic_auth(&self.secret_key, Option::<&str>::None)
            .form(&[
                ("amount", Self::minor_units(amount)?.to_string()),
                ("currency", amount.currency.as_str().to_lowercase()),
                ("metadata[reference]", reference.to_string()),
                ("metadata[user_id]", user_id.to_string()),
            ])
            .send()
            .await?
            .error_for_status()?;

        let body: Value = response.json().await?;
        let intent_id = body["id"]
            .as_str()
            .ok_or_else(|| GatewayError::Fatal("missing intent id".to_string()))?
            .to_string();
        let client_secret = body["client_secret"].clone();

        Ok(PaymentIntent {
            intent_id: intent_id.clone(),
            client_payload: json!({
                "gateway": "stripe",
                "payment_intent_id": intent_id,
                "client_secret": client_secret,
            }),
        })
    }

    async fn verify(
        &self,
        reference: &str,
        verification_payload: &Value,
    ) -> Result<Verification, GatewayError> {
        let intent_id = verification_payload["payment_intent_id"]
            .as_str()
            .ok_or_else(|| GatewayError::Fatal("payment_intent_id is required".to_string()))?;
        let (expected_amount, expected_currency) = super::expected_money(verification_payload)?;

        let response = self
            .client
            .get(format!("{}/v1/payment_intents/{}", self.api_base, intent_id))
            .basic_auth(&self.secret_key, Option::<&str>::None)
            .send()
            .await?
            .error_for_status()?;

        let body: Value = response.json().await?;
        // The intent must be the one opened for this payment, for this
        // amount; a succeeded intent belonging to anything else is refused.
        if body["metadata"]["reference"].as_str() != Some(reference) {
            return Err(GatewayError::Fatal(
                "payment intent was not created for this payment".to_string(),
            ));
        }
        let expected_minor = (expected_amount * rust_decimal::Decimal::ONE_HUNDRED)
            .to_i64()
            .ok_or_else(|| GatewayError::Fatal("amount out of range".to_string()))?;
        if body["amount"].as_i64() != Some(expected_minor)
            || body["currency"].as_str() != Some(expected_currency.to_lowercase().as_str())
        {
            return Err(GatewayError::Fatal(
                "payment intent amount does not match the payment".to_string(),
            ));
        }
        match body["status"].as_str() {
            Some("succeeded") => Ok(Verification {
                transaction_id: intent_id.to_string(),
                raw_response: body,
            }),
            Some(status) => Err(GatewayError::Fatal(format!(
                "payment intent is {}, not succeeded",
                status
            ))),
            None => Err(GatewayError::Fatal("malformed gateway response".to_string())),
        }
    }

    async fn refund(&self, transaction_id: &str, amount: &Money) -> Result<String, GatewayError> {
        let response = self
            .client
            .post(format!("{}/v1/refunds", self.api_base))
            .basic_auth(&self.secret_key, Option::<&str>::None)
            .form(&[
                ("payment_intent", transaction_id.to_string()),
                ("amount", Self::minor_units(amount)?.to_string()),
            ])
            .send()
            .await?
            .error_for_status()?;

        let body: Value = response.json().await?;
        body["id"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| GatewayError::Fatal("missing refund id".to_string()))
    }
}
