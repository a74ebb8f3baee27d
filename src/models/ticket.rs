use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "ticket_format", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TicketFormat {
    Digital,
    Physical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "credential_format", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CredentialFormat {
    QrCode,
    Nfc,
    Rfid,
    Barcode,
}

impl Default for CredentialFormat {
    fn default() -> Self {
        CredentialFormat::QrCode
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "ticket_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Reserved,
    Confirmed,
    Used,
    Cancelled,
    Transferred,
    RefundPending,
    Refunded,
}

impl TicketStatus {
    /// `used`, `refunded` and `cancelled` are terminal.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TicketStatus::Used | TicketStatus::Refunded | TicketStatus::Cancelled
        )
    }

    pub fn can_transition_to(self, next: TicketStatus) -> bool {
        use TicketStatus::*;
        matches!(
            (self, next),
            (Reserved, Confirmed)
                | (Reserved, Cancelled)
                | (Confirmed, Used)
                | (Confirmed, Cancelled)
                | (Confirmed, Transferred)
                | (Confirmed, RefundPending)
                | (Transferred, Confirmed)
                | (RefundPending, Refunded)
                | (RefundPending, Confirmed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TicketStatus::Reserved => "reserved",
            TicketStatus::Confirmed => "confirmed",
            TicketStatus::Used => "used",
            TicketStatus::Cancelled => "cancelled",
            TicketStatus::Transferred => "transferred",
            TicketStatus::RefundPending => "refund_pending",
            TicketStatus::Refunded => "refunded",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Ticket {
    pub id: Uuid,
    pub ticket_number: String,
    pub event_id: Uuid,
    pub session_id: Option<Uuid>,
    pub tier_id: Option<Uuid>,
    pub seat_id: Option<Uuid>,
    pub order_id: Option<Uuid>,
    pub line_no: Option<i32>,
    pub user_id: Uuid,
    pub ticket_format: TicketFormat,
    pub credential_format: CredentialFormat,
    pub qr_data: Option<String>,
    pub nfc_data: Option<String>,
    pub rfid_data: Option<String>,
    pub barcode_data: Option<String>,
    pub unit_price: Decimal,
    pub service_fee: Decimal,
    pub total_price: Decimal,
    pub currency: String,
    pub status: TicketStatus,
    pub valid_until: Option<DateTime<Utc>>,
    pub transfer_count: i32,
    pub stream_access_token: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(TicketStatus::Used.is_terminal());
        assert!(TicketStatus::Refunded.is_terminal());
        assert!(TicketStatus::Cancelled.is_terminal());
        assert!(!TicketStatus::Confirmed.is_terminal());
        assert!(!TicketStatus::RefundPending.is_terminal());
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        use TicketStatus::*;
        for from in [Used, Cancelled, Refunded] {
            for next in [
                Reserved,
                Confirmed,
                Used,
                Cancelled,
                Transferred,
                RefundPending,
                Refunded,
            ] {
                assert!(!from.can_transition_to(next), "{:?} -> {:?}", from, next);
            }
        }
    }

    #[test]
    fn test_refund_round_trip() {
        use TicketStatus::*;
        assert!(Confirmed.can_transition_to(RefundPending));
        assert!(RefundPending.can_transition_to(Refunded));
        assert!(RefundPending.can_transition_to(Confirmed));
        assert!(!Reserved.can_transition_to(RefundPending));
    }

    #[test]
    fn test_admission_only_from_confirmed() {
        use TicketStatus::*;
        assert!(Confirmed.can_transition_to(Used));
        assert!(!Reserved.can_transition_to(Used));
        assert!(!RefundPending.can_transition_to(Used));
    }
}
