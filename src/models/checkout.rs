use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "checkout_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CheckoutStatus {
    Pending,
    Completed,
    Cancelled,
    Expired,
}

impl CheckoutStatus {
    pub fn can_transition_to(self, next: CheckoutStatus) -> bool {
        use CheckoutStatus::*;
        matches!(
            (self, next),
            (Pending, Completed) | (Pending, Cancelled) | (Pending, Expired)
        )
    }
}

/// One priced line frozen into a checkout. The snapshot, not the live cart,
/// is what `complete` issues tickets from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutLine {
    pub event_id: Uuid,
    pub tier_id: Option<Uuid>,
    pub session_id: Option<Uuid>,
    pub quantity: i32,
    pub seat_ids: Option<Vec<Uuid>>,
    pub ticket_format: crate::models::ticket::TicketFormat,
    pub credential_format: crate::models::ticket::CredentialFormat,
    pub unit_price: Decimal,
    pub service_fee: Decimal,
}

/// A bounded, time-limited priced commitment derived from a cart.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Checkout {
    pub id: Uuid,
    pub user_id: Uuid,
    pub cart_id: Option<Uuid>,
    pub total_amount: Decimal,
    pub currency: String,
    pub payment_method: String,
    pub billing_info: Value,
    pub lines: Value,
    pub reservation_ids: Vec<Uuid>,
    pub status: CheckoutStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Checkout {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn parsed_lines(&self) -> Result<Vec<CheckoutLine>, serde_json::Error> {
        serde_json::from_value(self.lines.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_is_the_only_live_state() {
        use CheckoutStatus::*;
        assert!(Pending.can_transition_to(Completed));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Pending.can_transition_to(Expired));
        assert!(!Completed.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(Pending));
        assert!(!Expired.can_transition_to(Completed));
    }
}
