use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "transfer_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Pending,
    Accepted,
    Declined,
    Expired,
    Cancelled,
}

impl TransferStatus {
    pub fn can_transition_to(self, next: TransferStatus) -> bool {
        use TransferStatus::*;
        matches!(
            (self, next),
            (Pending, Accepted) | (Pending, Declined) | (Pending, Expired) | (Pending, Cancelled)
        )
    }
}

/// Peer-to-peer reassignment of a confirmed ticket. The recipient is either
/// a known user id or an email address the code was sent to.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TicketTransfer {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub from_user_id: Uuid,
    pub to_user_id: Option<Uuid>,
    pub to_email: Option<String>,
    pub transfer_code: String,
    pub status: TransferStatus,
    pub requested_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub declined_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl TicketTransfer {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_is_the_only_live_state() {
        use TransferStatus::*;
        assert!(Pending.can_transition_to(Accepted));
        assert!(Pending.can_transition_to(Declined));
        assert!(Pending.can_transition_to(Expired));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(!Accepted.can_transition_to(Declined));
        assert!(!Expired.can_transition_to(Accepted));
    }
}
