use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "payment_gateway", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentGatewayKind {
    Stripe,
    Paypal,
    ZimGateway,
    Offline,
}

impl PaymentGatewayKind {
    /// Maps a client-supplied payment method string onto the gateway that
    /// services it. Cash and bank transfers settle offline.
    pub fn for_method(method: &str) -> PaymentGatewayKind {
        match method {
            "stripe" | "card" | "credit_card" | "debit_card" => PaymentGatewayKind::Stripe,
            "paypal" => PaymentGatewayKind::Paypal,
            "ecocash" | "onemoney" | "zim_gateway" | "mobile_money" => {
                PaymentGatewayKind::ZimGateway
            }
            _ => PaymentGatewayKind::Offline,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "payment_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
    PartiallyRefunded,
}

impl PaymentStatus {
    pub fn can_transition_to(self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;
        matches!(
            (self, next),
            (Pending, Completed)
                | (Pending, Failed)
                | (Completed, Refunded)
                | (Completed, PartiallyRefunded)
                | (PartiallyRefunded, Refunded)
                | (PartiallyRefunded, PartiallyRefunded)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Payment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub order_id: Option<Uuid>,
    pub gateway: PaymentGatewayKind,
    pub method: String,
    pub reference_number: String,
    pub amount: Decimal,
    pub currency: String,
    pub status: PaymentStatus,
    pub gateway_transaction_id: Option<String>,
    pub gateway_response: Option<Value>,
    pub refunded_amount: Decimal,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_routing() {
        assert_eq!(
            PaymentGatewayKind::for_method("card"),
            PaymentGatewayKind::Stripe
        );
        assert_eq!(
            PaymentGatewayKind::for_method("paypal"),
            PaymentGatewayKind::Paypal
        );
        assert_eq!(
            PaymentGatewayKind::for_method("ecocash"),
            PaymentGatewayKind::ZimGateway
        );
        assert_eq!(
            PaymentGatewayKind::for_method("cash"),
            PaymentGatewayKind::Offline
        );
    }

    #[test]
    fn test_pending_never_jumps_to_refunded() {
        use PaymentStatus::*;
        assert!(!Pending.can_transition_to(Refunded));
        assert!(Pending.can_transition_to(Completed));
        assert!(Completed.can_transition_to(Refunded));
        assert!(!Failed.can_transition_to(Completed));
    }
}
