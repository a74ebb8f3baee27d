//! PayPal adapter over the Orders v2 API. Each call fetches a client
//! credentials token; PayPal caches them server-side so this keeps the
//! adapter stateless.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::config::GatewayConfig;
use crate::engine::money::Money;
use crate::models::payment::PaymentGatewayKind;

use super::{GatewayError, PaymentGateway, PaymentIntent, Verification};

pub struct PaypalGateway {
    client: reqwest::Client,
    api_base: String,
    client_id: String,
    client_secret: String,
}

impl PaypalGateway {
    pub fn new(client: reqwest::Client, config: &GatewayConfig) -> Self {
        Self {
            client,
            api_base: config.paypal_api_base.clone(),
            client_id: config.paypal_client_id.clone(),
            client_secret: config.paypal_client_secret.clone(),
        }
    }

    async fn access_token(&self) -> Result<String, GatewayError> {
        let response = self
            .client
            .post(format!("{}/v1/oauth2/token", self.api_base))
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?
            .error_for_status()?;

        let body: Value = response.json().await?;
        body["access_token"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| GatewayError::Fatal("missing access token".to_string()))
    }
}

#[async_trait]
impl PaymentGateway for PaypalGateway {
    fn kind(&self) -> PaymentGatewayKind {
        PaymentGatewayKind::Paypal
    }

    async fn create_intent(
        &self,
        amount: &Money,
        reference: &str,
        _user_id: Uuid,
    ) -> Result<PaymentIntent, GatewayError> {
        let token = self.access_token().await?;
        let response = self
            .client
            .post(format!("{}/v2/checkout/orders", self.api_base))
            .bearer_auth(&token)
            .json(&json!({
                "intent": "CAPTURE",
                "purchase_units": [{
                    "reference_id": reference,
                    "amount": {
                        "currency_code": amount.currency.as_str(),
                        "value": amount.amount.to_string(),
                    },
                }],
            }))
            .send()
            .await?
            .error_for_status()?;

        let body: Value = response.json().await?;
        let order_id = body["id"]
            .as_str()
            .ok_or_else(|| GatewayError::Fatal("missing order id".to_string()))?
            .to_string();

        Ok(PaymentIntent {
            intent_id: order_id.clone(),
            client_payload: json!({
                "gateway": "paypal",
                "paypal_order_id": order_id,
                "links": body["links"],
            }),
        })
    }

    async fn verify(
        &self,
        reference: &str,
        verification_payload: &Value,
    ) -> Result<Verification, GatewayError> {
        let order_id = verification_payload["paypal_order_id"]
            .as_str()
            .ok_or_else(|| GatewayError::Fatal("paypal_order_id is required".to_string()))?;
        let (expected_amount, expected_currency) = super::expected_money(verification_payload)?;

        let token = self.access_token().await?;
        let response = self
            .client
            .post(format!(
                "{}/v2/checkout/orders/{}/capture",
                self.api_base, order_id
            ))
            .bearer_auth(&token)
            .header("Content-Type", "application/json")
            .send()
            .await?
            .error_for_status()?;

        let body: Value = response.json().await?;
        match body["status"].as_str() {
            Some("COMPLETED") => {
                let unit = &body["purchase_units"][0];
                if unit["reference_id"].as_str() != Some(reference) {
                    return Err(GatewayError::Fatal(
                        "paypal order was not created for this payment".to_string(),
                    ));
                }
                let capture = &unit["payments"]["captures"][0];
                let captured_amount = capture["amount"]["value"]
                    .as_str()
                    .and_then(|v| Decimal::from_str_exact(v).ok());
                if captured_amount != Some(expected_amount)
                    || capture["amount"]["currency_code"].as_str()
                        != Some(expected_currency.as_str())
                {
                    return Err(GatewayError::Fatal(
                        "captured amount does not match the payment".to_string(),
                    ));
                }
                let capture_id = capture["id"].as_str().unwrap_or(order_id).to_string();
                Ok(Verification {
                    transaction_id: capture_id,
                    raw_response: body.clone(),
                })
            }
            Some(status) => Err(GatewayError::Fatal(format!(
                "paypal order is {}, not COMPLETED",
                status
            ))),
            None => Err(GatewayError::Fatal("malformed gateway response".to_string())),
        }
    }

    async fn refund(&self, transaction_id: &str, amount: &Money) -> Result<String, GatewayError> {
        let token = self.access_token().await?;
        let response = self
            .client
            .post(format!(
                "{}/v2/payments/captures/{}/refund",
                self.api_base, transaction_id
            ))
            .bearer_auth(&token)
            .json(&json!({
                "amount": {
                    "currency_code": amount.currency.as_str(),
                    "value": amount.amount.to_string(),
                },
            }))
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
