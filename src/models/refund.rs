use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "refund_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RefundStatus {
    Pending,
    /// Claimed by an approver; the gateway call is in flight. Moves back to
    /// `pending` if the gateway refuses, forward to `approved` once booked.
    Approving,
    Approved,
    Rejected,
}

impl RefundStatus {
    pub fn can_transition_to(self, next: RefundStatus) -> bool {
        use RefundStatus::*;
        matches!(
            (self, next),
            (Pending, Approving)
                | (Pending, Rejected)
                | (Approving, Approved)
                | (Approving, Pending)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TicketRefund {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub user_id: Uuid,
    pub original_amount: Decimal,
    pub refund_amount: Decimal,
    pub currency: String,
    pub reason: String,
    pub status: RefundStatus,
    pub requested_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub approved_by: Option<Uuid>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub rejected_by: Option<Uuid>,
    pub rejection_reason: Option<String>,
    pub credit_payment_id: Option<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_approval_goes_through_a_claim() {
        use RefundStatus::*;
        assert!(Pending.can_transition_to(Approving));
        assert!(Approving.can_transition_to(Approved));
        assert!(Approving.can_transition_to(Pending));
        assert!(!Pending.can_transition_to(Approved));
        assert!(!Approving.can_transition_to(Rejected));
    }

    #[test]
    fn test_decisions_are_final() {
        use RefundStatus::*;
        assert!(Pending.can_transition_to(Rejected));
        assert!(!Approved.can_transition_to(Rejected));
        assert!(!Rejected.can_transition_to(Approved));
        assert!(!Approved.can_transition_to(Pending));
    }
}
