use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "order_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Reserved,
    PartiallyPaid,
    Confirmed,
    Cancelled,
    Refunded,
}

impl OrderStatus {
    /// Transition table for the order lifecycle. Anything not listed here
    /// is a `ConflictingState` at runtime.
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Reserved, PartiallyPaid)
                | (Reserved, Confirmed)
                | (Reserved, Cancelled)
                | (PartiallyPaid, PartiallyPaid)
                | (PartiallyPaid, Confirmed)
                | (PartiallyPaid, Cancelled)
                | (Confirmed, Refunded)
                | (Confirmed, Cancelled)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Cancelled | OrderStatus::Refunded)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Reserved => "reserved",
            OrderStatus::PartiallyPaid => "partially_paid",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Refunded => "refunded",
        }
    }
}

/// The persistent record resulting from a completed checkout; owns the set
/// of tickets. `amount_paid + balance_due = total_amount` at rest.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub checkout_id: Option<Uuid>,
    pub total_amount: Decimal,
    pub amount_paid: Decimal,
    pub balance_due: Decimal,
    pub currency: String,
    pub status: OrderStatus,
    pub billing_info: Value,
    pub reservation_ids: Vec<Uuid>,
    pub cancelled_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_payment_paths() {
        use OrderStatus::*;
        assert!(Reserved.can_transition_to(PartiallyPaid));
        assert!(PartiallyPaid.can_transition_to(PartiallyPaid));
        assert!(PartiallyPaid.can_transition_to(Confirmed));
        assert!(Reserved.can_transition_to(Confirmed));
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        use OrderStatus::*;
        for next in [Reserved, PartiallyPaid, Confirmed, Cancelled, Refunded] {
            assert!(!Cancelled.can_transition_to(next));
            assert!(!Refunded.can_transition_to(next));
        }
    }

    #[test]
    fn test_refund_requires_confirmed() {
        use OrderStatus::*;
        assert!(Confirmed.can_transition_to(Refunded));
        assert!(!Reserved.can_transition_to(Refunded));
        assert!(!PartiallyPaid.can_transition_to(Refunded));
    }
}
