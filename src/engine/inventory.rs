//! Inventory ledger: the authoritative per-tier and per-session counters.
//! Every decrement/increment runs on the caller's transaction with a row
//! lock on the tier or session row, so outcomes are linearizable per row
//! and no double-decrement is possible.

use serde::Serialize;
use sqlx::{PgConnection, PgPool, Row};
use uuid::Uuid;

use crate::models::event::Event;
use crate::models::venue::Seat;
use crate::utils::error::AppError;

/// Which counter a ledger operation addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InventoryTarget {
    Tier(Uuid),
    Session(Uuid),
}

/// Atomically takes `qty` units off the target counter, or fails with
/// `Insufficient` when fewer remain. Locks the counter row first; callers
/// must not read-then-write without going through here.
pub async fn decrement(
    conn: &mut PgConnection,
    target: InventoryTarget,
    qty: i32,
) -> Result<(), AppError> {
    if qty <= 0 {
        return Err(AppError::ValidationError(
            "Quantity must be greater than zero".to_string(),
        ));
    }

    match target {
        InventoryTarget::Tier(tier_id) => {
            let row =
                sqlx::query("SELECT available_tickets FROM pricing_tiers WHERE id = $1 FOR UPDATE")
                    .bind(tier_id)
                    .fetch_optional(&mut *conn)
                    .await?
                    .ok_or_else(|| AppError::NotFound("Pricing tier not found".to_string()))?;
            let available: i32 = row.get("available_tickets");
            if available < qty {
                return Err(AppError::Insufficient(format!(
                    "Only {} ticket(s) remaining in tier",
                    available
                )));
            }
            sqlx::query(
                "UPDATE pricing_tiers
                 SET available_tickets = available_tickets - $2, updated_at = now()
                 WHERE id = $1",
            )
            .bind(tier_id)
            .bind(qty)
            .execute(&mut *conn)
            .await?;
        }
        InventoryTarget::Session(session_id) => {
            let row = sqlx::query(
                "SELECT available_seats FROM sessions
                 WHERE id = $1 AND is_active FOR UPDATE",
            )
            .bind(session_id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| AppError::NotFound("Session not found".to_string()))?;
            let available: i32 = row.get("available_seats");
            if available < qty {
                return Err(AppError::Insufficient(format!(
                    "Only {} seat(s) remaining in session",
                    available
                )));
            }
            sqlx::query(
                "UPDATE sessions
                 SET available_seats = available_seats - $2, updated_at = now()
                 WHERE id = $1",
            )
            .bind(session_id)
            .bind(qty)
            .execute(&mut *conn)
            .await?;
        }
    }
    Ok(())
}

/// Gives `qty` units back. Unconditional, but the counter is capped at the
/// configured total so a stray double-release cannot overshoot.
pub async fn increment(
    conn: &mut PgConnection,
    target: InventoryTarget,
    qty: i32,
) -> Result<(), AppError> {
    if qty <= 0 {
        return Err(AppError::ValidationError(
            "Quantity must be greater than zero".to_string(),
        ));
    }

    match target {
        InventoryTarget::Tier(tier_id) => {
            sqlx::query(
                "UPDATE pricing_tiers
                 SET available_tickets = LEAST(available_tickets + $2, total_tickets),
                     updated_at = now()
                 WHERE id = $1",
            )
            .bind(tier_id)
            .bind(qty)
            .execute(&mut *conn)
            .await?;
        }
        InventoryTarget::Session(session_id) => {
            sqlx::query(
                "UPDATE sessions
                 SET available_seats = LEAST(available_seats + $2, capacity),
                     updated_at = now()
                 WHERE id = $1",
            )
            .bind(session_id)
            .bind(qty)
            .execute(&mut *conn)
            .await?;
        }
    }
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct TierCount {
    pub tier_id: Uuid,
    pub name: String,
    pub total_tickets: i32,
    pub available_tickets: i32,
}

#[derive(Debug, Serialize)]
pub struct SessionCount {
    pub session_id: Uuid,
    pub name: String,
    pub capacity: i32,
    pub available_seats: i32,
}

#[derive(Debug, Serialize)]
pub struct InventorySnapshot {
    pub event_id: Uuid,
    pub tiers: Vec<TierCount>,
    pub sessions: Vec<SessionCount>,
}

/// Checks that every picked seat exists and sits in the event's venue.
/// Double-booking of a seat is caught later by the hold, not here.
pub async fn verify_seats(
    pool: &PgPool,
    event: &Event,
    seat_ids: &[Uuid],
) -> Result<Vec<Seat>, AppError> {
    let venue_id = event.venue_id.ok_or_else(|| {
        AppError::ValidationError("Event has no seated venue".to_string())
    })?;
    let seats: Vec<Seat> = sqlx::query_as(
        r#"
        SELECT s.* FROM seats s
        JOIN sections sec ON sec.id = s.section_id
        WHERE sec.venue_id = $1 AND s.id = ANY($2)
        "#,
    )
    .bind(venue_id)
    .bind(seat_ids)
    .fetch_all(pool)
    .await?;
    if seats.len() != seat_ids.len() {
        return Err(AppError::ValidationError(
            "One or more seats do not exist at this venue".to_string(),
        ));
    }
    Ok(seats)
}

/// Point-in-time counts for an event. Reads without locks; only useful for
/// display, never as a purchase precondition.
pub async fn snapshot(pool: &PgPool, event_id: Uuid) -> Result<InventorySnapshot, AppError> {
    let tiers = sqlx::query(
        "SELECT id, name, total_tickets, available_tickets
         FROM pricing_tiers WHERE event_id = $1 ORDER BY name",
    )
    .bind(event_id)
    .fetch_all(pool)
    .await?
    .into_iter()
    .map(|row| TierCount {
        tier_id: row.get("id"),
        name: row.get("name"),
        total_tickets: row.get("total_tickets"),
        available_tickets: row.get("available_tickets"),
    })
    .collect();

    let sessions = sqlx::query(
        "SELECT id, name, capacity, available_seats
         FROM sessions WHERE event_id = $1 ORDER BY name",
    )
    .bind(event_id)
    .fetch_all(pool)
    .await?
    .into_iter()
    .map(|row| SessionCount {
        session_id: row.get("id"),
        name: row.get("name"),
        capacity: row.get("capacity"),
        available_seats: row.get("available_seats"),
    })
    .collect();

    Ok(InventorySnapshot {
        event_id,
        tiers,
        sessions,
    })
}
