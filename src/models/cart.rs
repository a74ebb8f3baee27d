use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::ticket::{CredentialFormat, TicketFormat};

/// Per-user open container of intended lines. One open cart per user.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Cart {
    pub id: Uuid,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CartItem {
    pub id: Uuid,
    pub cart_id: Uuid,
    pub event_id: Uuid,
    pub tier_id: Option<Uuid>,
    pub session_id: Option<Uuid>,
    pub quantity: i32,
    pub seat_ids: Option<Vec<Uuid>>,
    pub ticket_format: TicketFormat,
    pub credential_format: CredentialFormat,
    pub created_at: DateTime<Utc>,
}
