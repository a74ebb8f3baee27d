//! Offline (cash / bank transfer) adapter. No network calls: intents are
//! payment instructions, verification succeeds only when an operator has
//! explicitly confirmed receipt, and refunds are book entries.

use async_trait::async_trait;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::engine::money::Money;
use crate::models::payment::PaymentGatewayKind;

use super::{GatewayError, PaymentGateway, PaymentIntent, Verification};

pub struct OfflineGateway;

impl OfflineGateway {
    pub fn new() -> Self {
        Self
    }
}

impl Default for OfflineGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PaymentGateway for OfflineGateway {
    fn kind(&self) -> PaymentGatewayKind {
        PaymentGatewayKind::Offline
    }

    async fn create_intent(
        &self,
        amount: &Money,
        reference: &str,
        _user_id: Uuid,
    ) -> Result<PaymentIntent, GatewayError> {
        Ok(PaymentIntent {
            intent_id: reference.to_string(),
            client_payload: json!({
                "gateway": "offline",
                "instructions": "Pay at the box office quoting your reference",
                "reference": reference,
                "amount": amount.amount.to_string(),
                "currency": amount.currency.as_str(),
            }),
        })
    }

    async fn verify(
        &self,
        reference: &str,
        verification_payload: &Value,
    ) -> Result<Verification, GatewayError> {
        // Success only through explicit operator action; a bare client
        // retry must never settle a cash payment.
        if verification_payload["operator_confirmed"].as_bool() != Some(true) {
            return Err(GatewayError::Fatal(
                "offline payment awaits operator confirmation".to_string(),
            ));
        }
        Ok(Verification {
            transaction_id: format!("OFFLINE-{}", reference),
            raw_response: verification_payload.clone(),
        })
    }

    async fn refund(&self, transaction_id: &str, amount: &Money) -> Result<String, GatewayError> {
        Ok(format!("OFFLINE-REFUND-{}-{}", transaction_id, amount.amount))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::money::Currency;
    use rust_decimal::Decimal;

    fn usd(s: &str) -> Money {
        Money::new(Decimal::from_str_exact(s).unwrap(), Currency::new("USD").unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_verify_requires_operator_confirmation() {
        let gw = OfflineGateway::new();
        let err = gw
            .verify("PAY-1-abc", &json!({"operator_confirmed": false}))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Fatal(_)));

        let err = gw.verify("PAY-1-abc", &json!({})).await.unwrap_err();
        assert!(matches!(err, GatewayError::Fatal(_)));
    }

    #[tokio::test]
    async fn test_operator_confirmation_yields_synthetic_transaction() {
        let gw = OfflineGateway::new();
        let v = gw
            .verify("PAY-1-abc", &json!({"operator_confirmed": true}))
            .await
            .unwrap();
        assert_eq!(v.transaction_id, "OFFLINE-PAY-1-abc");
    }

    #[tokio::test]
    async fn test_refund_is_a_book_entry() {
        let gw = OfflineGateway::new();
        let id = gw.refund("OFFLINE-PAY-1-abc", &usd("10.00")).await.unwrap();
        assert!(id.starts_with("OFFLINE-REFUND-"));
    }

    #[tokio::test]
    async fn test_intent_carries_instructions() {
        let gw = OfflineGateway::new();
        let intent = gw
            .create_intent(&usd("25.00"), "PAY-1-abc", Uuid::new_v4())
            .await
            .unwrap();
        assert_eq!(intent.intent_id, "PAY-1-abc");
        assert_eq!(intent.client_payload["gateway"], "offline");
    }
}
