//! Reservation manager: short-lived holds of tier/session capacity on behalf
//! of an in-flight cart or checkout, plus the expiry sweep that gives
//! abandoned holds back to the ledger.

use chrono::{DateTime, Duration, Utc};
use sqlx::{PgConnection, PgPool, Row};
use tracing::{debug, info};
use uuid::Uuid;

use crate::engine::inventory::{self, InventoryTarget};
use crate::models::reservation::{Reservation, ReservationStatus};
use crate::utils::error::AppError;

/// Holds expire 15 minutes after creation unless the caller overrides.
pub const DEFAULT_HOLD_TTL_MINUTES: i64 = 15;

/// Sweep batches are capped so a backlog never pins one transaction.
const SWEEP_BATCH_SIZE: i64 = 100;

/// One line of capacity to hold: a tier or a session, optionally with the
/// specific seats the buyer picked.
#[derive(Debug, Clone)]
pub struct HoldLine {
    pub event_id: Uuid,
    pub tier_id: Option<Uuid>,
    pub session_id: Option<Uuid>,
    pub quantity: i32,
    pub seat_ids: Option<Vec<Uuid>>,
}

impl HoldLine {
    pub fn target(&self) -> Result<InventoryTarget, AppError> {
        match (self.tier_id, self.session_id) {
            (Some(tier), _) => Ok(InventoryTarget::Tier(tier)),
            (None, Some(session)) => Ok(InventoryTarget::Session(session)),
            (None, None) => Err(AppError::ValidationError(
                "A reservation line needs a tier or a session".to_string(),
            )),
        }
    }
}

/// Atomically decrements the ledger for every line and writes the matching
/// reservations, all in one transaction. Any `Insufficient` rolls the whole
/// hold back.
pub async fn hold(
    pool: &PgPool,
    user_id: Uuid,
    lines: &[HoldLine],
    ttl: Option<Duration>,
) -> Result<Vec<Uuid>, AppError> {
    if lines.is_empty() {
        return Err(AppError::ValidationError(
            "Nothing to reserve".to_string(),
        ));
    }
    let expires_at = Utc::now() + ttl.unwrap_or_else(|| Duration::minutes(DEFAULT_HOLD_TTL_MINUTES));

    let mut tx = pool.begin().await?;
    let mut ids = Vec::with_capacity(lines.len());
    for line in lines {
        let id = hold_line(&mut tx, user_id, line, expires_at).await?;
        ids.push(id);
    }
    tx.commit().await?;

    debug!(user_id = %user_id, count = ids.len(), "Inventory held");
    Ok(ids)
}

/// Same as [`hold`] but on the caller's transaction.
pub async fn hold_line(
    conn: &mut PgConnection,
    user_id: Uuid,
    line: &HoldLine,
    expires_at: DateTime<Utc>,
) -> Result<Uuid, AppError> {
    inventory::decrement(conn, line.target()?, line.quantity).await?;

    let row = sqlx::query(
        r#"
        INSERT INTO reservations (user_id, event_id, tier_id, session_id, quantity, seat_ids, expires_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING id
        "#,
    )
    .bind(user_id)
    .bind(line.event_id)
    .bind(line.tier_id)
    .bind(line.session_id)
    .bind(line.quantity)
    .bind(&line.seat_ids)
    .bind(expires_at)
    .fetch_one(conn)
    .await?;

    Ok(row.get("id"))
}

/// Marks a held reservation consumed. The tickets issued alongside now stand
/// in place of the hold, so the ledger is untouched. Confirmation after
/// expiry is rejected and the hold is given back.
pub async fn confirm(
    conn: &mut PgConnection,
    reservation_id: Uuid,
    payment_id: Option<Uuid>,
    user_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Reservation, AppError> {
    let reservation = lock(conn, reservation_id).await?;

    if reservation.user_id != user_id {
        return Err(AppError::Forbidden(
            "Reservation belongs to another user".to_string(),
        ));
    }
    if reservation.status != ReservationStatus::Held {
        return Err(AppError::ConflictingState(format!(
            "Reservation is already {:?}",
            reservation.status
        )));
    }
    if reservation.is_expired(now) {
        // The hold lapsed before payment; give the capacity back now rather
        // than waiting on the sweeper.
        give_back(conn, &reservation).await?;
        sqlx::query(
            "UPDATE reservations SET status = 'expired', released_at = now() WHERE id = $1",
        )
        .bind(reservation_id)
        .execute(conn)
        .await?;
        return Err(AppError::Expired("Reservation has expired".to_string()));
    }

    let confirmed = sqlx::query_as::<_, Reservation>(
        r#"
        UPDATE reservations
        SET status = 'confirmed', payment_id = $2, confirmed_at = now()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(reservation_id)
    .bind(payment_id)
    .fetch_one(conn)
    .await?;

    Ok(confirmed)
}

/// Gives a held reservation back to the ledger. Idempotent: anything not
/// `held` is left alone and reported as not released.
pub async fn release(conn: &mut PgConnection, reservation_id: Uuid) -> Result<bool, AppError> {
    let reservation = lock(conn, reservation_id).await?;
    if reservation.status != ReservationStatus::Held {
        return Ok(false);
    }

    give_back(conn, &reservation).await?;
    sqlx::query("UPDATE reservations SET status = 'released', released_at = now() WHERE id = $1")
        .bind(reservation_id)
        .execute(conn)
        .await?;
    Ok(true)
}

/// Background sweep: releases every held reservation whose `expires_at` has
/// passed. Batches are claimed with `FOR UPDATE SKIP LOCKED` so concurrent
/// sweepers partition the backlog instead of colliding.
pub async fn sweep(pool: &PgPool, now: DateTime<Utc>) -> Result<u64, AppError> {
    let mut released = 0u64;
    loop {
        let mut tx = pool.begin().await?;
        let batch = sqlx::query_as::<_, Reservation>(
            r#"
            SELECT * FROM reservations
            WHERE status = 'held' AND expires_at <= $1
            ORDER BY expires_at
            LIMIT $2
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(now)
        .bind(SWEEP_BATCH_SIZE)
        .fetch_all(&mut *tx)
        .await?;

        if batch.is_empty() {
            tx.rollback().await?;
            break;
        }

        for reservation in &batch {
            give_back(&mut tx, reservation).await?;
            sqlx::query(
                "UPDATE reservations SET status = 'released', released_at = now() WHERE id = $1",
            )
            .bind(reservation.id)
            .execute(&mut *tx)
            .await?;
        }
        released += batch.len() as u64;
        tx.commit().await?;
    }

    if released > 0 {
        info!(released, "Reservation sweep released expired holds");
    }
    Ok(released)
}

async fn lock(conn: &mut PgConnection, reservation_id: Uuid) -> Result<Reservation, AppError> {
    sqlx::query_as::<_, Reservation>("SELECT * FROM reservations WHERE id = $1 FOR UPDATE")
        .bind(reservation_id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| AppError::NotFound("Reservation not found".to_string()))
}

async fn give_back(conn: &mut PgConnection, reservation: &Reservation) -> Result<(), AppError> {
    let target = match (reservation.tier_id, reservation.session_id) {
        (Some(tier), _) => InventoryTarget::Tier(tier),
        (None, Some(session)) => InventoryTarget::Session(session),
        (None, None) => return Ok(()),
    };
    inventory::increment(conn, target, reservation.quantity).await
}
