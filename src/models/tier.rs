use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PricingTier {
    pub id: Uuid,
    pub event_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub base_price: Decimal,
    pub total_tickets: i32,
    pub available_tickets: i32,
    pub sales_open: Option<DateTime<Utc>>,
    pub sales_close: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PricingTier {
    /// Tier-level sales window, where set; otherwise the event's applies.
    pub fn window_open_at(&self, now: DateTime<Utc>) -> bool {
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
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Session {
    pub id: Uuid,
    pub event_id: Uuid,
    pub name: String,
    pub capacity: i32,
    pub available_seats: i32,
    pub base_price: Option<Decimal>,
    pub is_active: bool,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
