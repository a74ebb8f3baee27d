use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "reservation_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Held,
    Confirmed,
    Expired,
    Released,
}

impl ReservationStatus {
    /// A hold can be consumed or given back exactly once.
    pub fn can_transition_to(self, next: ReservationStatus) -> bool {
        use ReservationStatus::*;
        matches!(
            (self, next),
            (Held, Confirmed) | (Held, Released) | (Held, Expired)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Reservation {
    pub id: Uuid,
    pub user_id: Uuid,
    pub event_id: Uuid,
    pub tier_id: Option<Uuid>,
    pub session_id: Option<Uuid>,
    pub quantity: i32,
    pub seat_ids: Option<Vec<Uuid>>,
    pub status: ReservationStatus,
    pub payment_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub released_at: Option<DateTime<Utc>>,
}

impl Reservation {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_held_is_the_only_live_state() {
        use ReservationStatus::*;
        assert!(Held.can_transition_to(Confirmed));
        assert!(Held.can_transition_to(Released));
        assert!(Held.can_transition_to(Expired));
        assert!(!Confirmed.can_transition_to(Released));
        assert!(!Released.can_transition_to(Confirmed));
        assert!(!Expired.can_transition_to(Held));
    }
}
