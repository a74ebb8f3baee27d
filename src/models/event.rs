use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "event_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Draft,
    PendingApproval,
    Approved,
    Rejected,
    Published,
    Cancelled,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Event {
    pub id: Uuid,
    pub organizer_id: Uuid,
    pub venue_id: Option<Uuid>,
    pub title: String,
    pub description: Option<String>,
    pub total_capacity: i32,
    pub base_price: Decimal,
    pub currency: String,
    pub sales_open: Option<DateTime<Utc>>,
    pub sales_close: Option<DateTime<Utc>>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: EventStatus,
    pub is_streaming: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Event {
    /// Sales are open when the event is published, not soft-deleted, and
    /// `now` falls inside the sales window (missing ends are unbounded).
    pub fn sales_open_at(&self, now: DateTime<Utc>) -> bool {
        if self.status != EventStatus::Published || self.deleted_at.is_some() {
            return false;
        }
        if let Some(open) = self.sales_open {
            if now < open {
                return false;
            }
        }
        if let Some(close) = self.sales_close {
            if now > close {
                return false;
            }
        }
        true
    }

    pub fn has_started(&self, now: DateTime<Utc>) -> bool {
        now >= self.start_time
    }

    pub fn has_ended(&self, now: DateTime<Utc>) -> bool {
        match self.end_time {
            Some(end) => now > end,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn event(status: EventStatus) -> Event {
        let now = Utc::now();
        Event {
            id: Uuid::new_v4(),
            organizer_id: Uuid::new_v4(),
            venue_id: None,
            title: "Test".to_string(),
            description: None,
            total_capacity: 100,
            base_price: Decimal::ZERO,
            currency: "USD".to_string(),
            sales_open: Some(now - Duration::days(1)),
            sales_close: Some(now + Duration::days(1)),
            start_time: now + Duration::days(2),
            end_time: Some(now + Duration::days(3)),
            status,
            is_streaming: false,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_sales_open_requires_published() {
        let now = Utc::now();
        assert!(event(EventStatus::Published).sales_open_at(now));
        assert!(!event(EventStatus::Draft).sales_open_at(now));
        assert!(!event(EventStatus::Cancelled).sales_open_at(now));
    }

    #[test]
    fn test_sales_window_bounds() {
        let mut e = event(EventStatus::Published);
        let now = Utc::now();
        e.sales_open = Some(now + Duration::hours(1));
        assert!(!e.sales_open_at(now));
        e.sales_open = None;
        e.sales_close = Some(now - Duration::hours(1));
        assert!(!e.sales_open_at(now));
    }

    #[test]
    fn test_soft_deleted_event_is_closed() {
        let mut e = event(EventStatus::Published);
        e.deleted_at = Some(Utc::now());
        assert!(!e.sales_open_at(Utc::now()));
    }
}
