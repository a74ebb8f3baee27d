//! Peer-to-peer ticket transfers. A confirmed ticket is offered to a named
//! user or to whoever holds the emailed transfer code; acceptance reassigns
//! ownership atomically, and offers lapse after seven days via the sweep.

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::json;
use sqlx::{PgConnection, PgPool};
use tracing::info;
use uuid::Uuid;

use crate::engine::audit::{self, AuditEntry};
use crate::engine::ids;
use crate::models::ticket::{Ticket, TicketStatus};
use crate::models::transfer::{TicketTransfer, TransferStatus};
use crate::utils::error::AppError;

/// A pending offer lapses a week after it was made.
pub const TRANSFER_TTL_DAYS: i64 = 7;

const SWEEP_BATCH_SIZE: i64 = 100;

#[derive(Debug, Deserialize)]
pub struct InitiateTransferRequest {
    pub ticket_id: Uuid,
    pub to_user_id: Option<Uuid>,
    pub to_email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AcceptTransferRequest {
    pub transfer_code: Option<String>,
}

/// Offers a confirmed ticket to another user. The ticket stays with the
/// sender (and stays valid) until the offer is accepted.
pub async fn initiate(
    pool: &PgPool,
    user_id: Uuid,
    req: InitiateTransferRequest,
) -> Result<TicketTransfer, AppError> {
    if req.to_user_id.is_none() && req.to_email.is_none() {
        return Err(AppError::ValidationError(
            "A recipient user id or email is required".to_string(),
        ));
    }
    if let Some(to_user) = req.to_user_id {
        if to_user == user_id {
            return Err(AppError::ValidationError(
                "Cannot transfer a ticket to yourself".to_string(),
            ));
        }
    }

    let now = Utc::now();
    let mut tx = pool.begin().await?;
    let ticket = lock_ticket(&mut tx, req.ticket_id).await?;
    if ticket.user_id != user_id {
        return Err(AppError::Forbidden(
            "Ticket belongs to another user".to_string(),
        ));
    }
    if ticket.status != TicketStatus::Confirmed {
        return Err(AppError::ConflictingState(format!(
            "Ticket is {}",
            ticket.status.as_str()
        )));
    }
    let event = super::checkout::fetch_event_on(&mut tx, ticket.event_id).await?;
    if event.has_started(now) {
        return Err(AppError::ConflictingState(
            "Event has already started".to_string(),
        ));
    }

    let open: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM ticket_transfers WHERE ticket_id = $1 AND status = 'pending'",
    )
    .bind(ticket.id)
    .fetch_one(&mut *tx)
    .await?;
    if open > 0 {
        return Err(AppError::ConflictingState(
            "Ticket already has a pending transfer".to_string(),
        ));
    }

    let transfer = sqlx::query_as::<_, TicketTransfer>(
        r#"
        INSERT INTO ticket_transfers
            (ticket_id, from_user_id, to_user_id, to_email, transfer_code, expires_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING *
        "#,
    )
    .bind(ticket.id)
    .bind(user_id)
    .bind(req.to_user_id)
    .bind(&req.to_email)
    .bind(ids::transfer_code())
    .bind(now + Duration::days(TRANSFER_TTL_DAYS))
    .fetch_one(&mut *tx)
    .await?;
    tx.commit().await?;

    audit::record(
        pool,
        AuditEntry::new("TRANSFER_INITIATED", "ticket_transfer", transfer.id.to_string())
            .actor(user_id)
            .metadata(json!({
                "ticket_id": ticket.id,
                "to_user_id": req.to_user_id,
                "to_email": req.to_email,
            })),
    )
    .await;
    info!(transfer_id = %transfer.id, ticket_id = %ticket.id, "Transfer initiated");
    Ok(transfer)
}

/// Accepts a pending offer: ownership moves to the caller and the ticket's
/// transfer count goes up. Accepting an offer the caller already accepted
/// returns it unchanged rather than failing a retry.
pub async fn accept(
    pool: &PgPool,
    user_id: Uuid,
    transfer_id: Uuid,
    req: AcceptTransferRequest,
) -> Result<(TicketTransfer, Ticket), AppError> {
    let now = Utc::now();
    let mut tx = pool.begin().await?;
    let transfer = lock_transfer(&mut tx, transfer_id).await?;

    match vet_acceptance(&transfer, user_id, req.transfer_code.as_deref(), now) {
        Ok(true) => {
            let ticket = lock_ticket(&mut tx, transfer.ticket_id).await?;
            tx.commit().await?;
            return Ok((transfer, ticket));
        }
        Ok(false) => {}
        Err(AppError::Expired(msg)) => {
            sqlx::query("UPDATE ticket_transfers SET status = 'expired' WHERE id = $1")
                .bind(transfer_id)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            return Err(AppError::Expired(msg));
        }
        Err(e) => return Err(e),
    }

    let ticket = lock_ticket(&mut tx, transfer.ticket_id).await?;
    if ticket.status != TicketStatus::Confirmed {
        return Err(AppError::ConflictingState(format!(
            "Ticket is {}",
            ticket.status.as_str()
        )));
    }

    let ticket = sqlx::query_as::<_, Ticket>(
        r#"
        UPDATE tickets
        SET user_id = $2, transfer_count = transfer_count + 1, updated_at = now()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(ticket.id)
    .bind(user_id)
    .fetch_one(&mut *tx)
    .await?;

    let transfer = sqlx::query_as::<_, TicketTransfer>(
        r#"
        UPDATE ticket_transfers
        SET status = 'accepted', to_user_id = $2, accepted_at = now()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(transfer_id)
    .bind(user_id)
    .fetch_one(&mut *tx)
    .await?;
    tx.commit().await?;

    audit::record(
        pool,
        AuditEntry::new("TRANSFER_ACCEPTED", "ticket_transfer", transfer_id.to_string())
            .actor(user_id)
            .after(json!({
                "ticket_id": ticket.id,
                "from_user_id": transfer.from_user_id,
                "to_user_id": user_id,
            })),
    )
    .await;
    info!(transfer_id = %transfer_id, ticket_id = %ticket.id, "Transfer accepted");
    Ok((transfer, ticket))
}

/// Declines a pending offer. The sender withdrawing and the recipient
/// refusing both land here; the offer closes and the ticket stays put.
pub async fn decline(
    pool: &PgPool,
    user_id: Uuid,
    transfer_id: Uuid,
    transfer_code: Option<&str>,
) -> Result<TicketTransfer, AppError> {
    let mut tx = pool.begin().await?;
    let transfer = lock_transfer(&mut tx, transfer_id).await?;
    if transfer.status != TransferStatus::Pending {
        return Err(AppError::ConflictingState(format!(
            "Transfer is {:?}",
            transfer.status
        )));
    }

    let (next, stamp) = if transfer.from_user_id == user_id {
        (TransferStatus::Cancelled, "cancelled_at")
    } else {
        authorize_recipient(&transfer, user_id, transfer_code)?;
        (TransferStatus::Declined, "declined_at")
    };

    let query = format!(
        "UPDATE ticket_transfers SET status = $2, {} = now() WHERE id = $1 RETURNING *",
        stamp
    );
    let transfer = sqlx::query_as::<_, TicketTransfer>(&query)
        .bind(transfer_id)
        .bind(next)
        .fetch_one(&mut *tx)
        .await?;
    tx.commit().await?;

    audit::record(
        pool,
        AuditEntry::new("TRANSFER_CLOSED", "ticket_transfer", transfer_id.to_string())
            .actor(user_id)
            .metadata(json!({ "status": transfer.status })),
    )
    .await;
    Ok(transfer)
}

/// Background sweep for offers past their expiry, same batching discipline
/// as the reservation sweep.
pub async fn sweep(pool: &PgPool, now: DateTime<Utc>) -> Result<u64, AppError> {
    let mut expired = 0u64;
    loop {
        let mut tx = pool.begin().await?;
        let batch: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT id FROM ticket_transfers
            WHERE status = 'pending' AND expires_at <= $1
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
        sqlx::query("UPDATE ticket_transfers SET status = 'expired' WHERE id = ANY($1)")
            .bind(&batch)
            .execute(&mut *tx)
            .await?;
        expired += batch.len() as u64;
        tx.commit().await?;
    }

    if expired > 0 {
        info!(expired, "Transfer sweep closed lapsed offers");
    }
    Ok(expired)
}

/// Screens an acceptance attempt before any rows change. `Ok(true)` means
/// the caller already accepted this offer and the retry is a no-op. The
/// caller's standing is settled before the offer's state, so the sender or
/// a stranger probing a settled offer sees `Forbidden`, not the state.
fn vet_acceptance(
    transfer: &TicketTransfer,
    user_id: Uuid,
    code: Option<&str>,
    now: DateTime<Utc>,
) -> Result<bool, AppError> {
    if transfer.status == TransferStatus::Accepted && transfer.to_user_id == Some(user_id) {
        return Ok(true);
    }
    authorize_recipient(transfer, user_id, code)?;
    if transfer.status != TransferStatus::Pending {
        return Err(AppError::ConflictingState(format!(
            "Transfer is {:?}",
            transfer.status
        )));
    }
    if transfer.is_expired(now) {
        return Err(AppError::Expired("Transfer offer has expired".to_string()));
    }
    Ok(false)
}

/// A recipient qualifies by being the named user, or by presenting the code
/// for an offer addressed to an email instead of a user id.
fn authorize_recipient(
    transfer: &TicketTransfer,
    user_id: Uuid,
    code: Option<&str>,
) -> Result<(), AppError> {
    match transfer.to_user_id {
        Some(to_user) if to_user == user_id => Ok(()),
        Some(_) => Err(AppError::Forbidden(
            "Transfer is addressed to another user".to_string(),
        )),
        None => match code {
            Some(code) if code == transfer.transfer_code => Ok(()),
            _ => Err(AppError::Forbidden(
                "A valid transfer code is required".to_string(),
            )),
        },
    }
}

async fn lock_transfer(
    conn: &mut PgConnection,
    transfer_id: Uuid,
) -> Result<TicketTransfer, AppError> {
    sqlx::query_as::<_, TicketTransfer>(
        "SELECT * FROM ticket_transfers WHERE id = $1 FOR UPDATE",
    )
    .bind(transfer_id)
    .fetch_optional(conn)
    .await?
    .ok_or_else(|| AppError::NotFound("Transfer not found".to_string()))
}

async fn lock_ticket(conn: &mut PgConnection, ticket_id: Uuid) -> Result<Ticket, AppError> {
    sqlx::query_as::<_, Ticket>("SELECT * FROM tickets WHERE id = $1 FOR UPDATE")
        .bind(ticket_id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| AppError::NotFound("Ticket not found".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn transfer(to_user_id: Option<Uuid>) -> TicketTransfer {
        TicketTransfer {
            id: Uuid::new_v4(),
            ticket_id: Uuid::new_v4(),
            from_user_id: Uuid::new_v4(),
            to_user_id,
            to_email: None,
            transfer_code: "ABCD1234EFGH5678".to_string(),
            status: TransferStatus::Pending,
            requested_at: Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
            expires_at: Utc.with_ymd_and_hms(2025, 6, 8, 12, 0, 0).unwrap(),
            accepted_at: None,
            declined_at: None,
            cancelled_at: None,
        }
    }

    #[test]
    fn test_named_recipient_needs_no_code() {
        let user = Uuid::new_v4();
        let t = transfer(Some(user));
        assert!(authorize_recipient(&t, user, None).is_ok());
    }

    #[test]
    fn test_wrong_user_is_rejected_even_with_code() {
        let t = transfer(Some(Uuid::new_v4()));
        let err = authorize_recipient(&t, Uuid::new_v4(), Some("ABCD1234EFGH5678"));
        assert!(matches!(err, Err(AppError::Forbidden(_))));
    }

    #[test]
    fn test_open_offer_requires_the_exact_code() {
        let t = transfer(None);
        assert!(authorize_recipient(&t, Uuid::new_v4(), Some("ABCD1234EFGH5678")).is_ok());
        assert!(authorize_recipient(&t, Uuid::new_v4(), Some("wrong")).is_err());
        assert!(authorize_recipient(&t, Uuid::new_v4(), None).is_err());
    }

    #[test]
    fn test_sender_retry_after_acceptance_is_forbidden() {
        let sender = Uuid::new_v4();
        let recipient = Uuid::new_v4();
        let mut t = transfer(Some(recipient));
        t.from_user_id = sender;
        t.status = TransferStatus::Accepted;
        let now = Utc.with_ymd_and_hms(2025, 6, 2, 12, 0, 0).unwrap();

        let err = vet_acceptance(&t, sender, None, now);
        assert!(matches!(err, Err(AppError::Forbidden(_))));
    }

    #[test]
    fn test_recipient_accept_retry_is_a_no_op() {
        let recipient = Uuid::new_v4();
        let mut t = transfer(Some(recipient));
        t.status = TransferStatus::Accepted;
        let now = Utc.with_ymd_and_hms(2025, 6, 2, 12, 0, 0).unwrap();

        assert_eq!(vet_acceptance(&t, recipient, None, now).unwrap(), true);
    }

    #[test]
    fn test_standing_is_settled_before_offer_state() {
        // A stranger probing a declined offer learns nothing about it.
        let mut t = transfer(Some(Uuid::new_v4()));
        t.status = TransferStatus::Declined;
        let now = Utc.with_ymd_and_hms(2025, 6, 2, 12, 0, 0).unwrap();

        let err = vet_acceptance(&t, Uuid::new_v4(), None, now);
        assert!(matches!(err, Err(AppError::Forbidden(_))));
    }

    #[test]
    fn test_lapsed_offer_cannot_be_accepted() {
        let recipient = Uuid::new_v4();
        let t = transfer(Some(recipient));
        let after_expiry = Utc.with_ymd_and_hms(2025, 6, 9, 12, 0, 0).unwrap();

        let err = vet_acceptance(&t, recipient, None, after_expiry);
        assert!(matches!(err, Err(AppError::Expired(_))));
    }

    #[test]
    fn test_offer_expiry_boundary() {
        let t = transfer(None);
        assert!(!t.is_expired(Utc.with_ymd_and_hms(2025, 6, 8, 11, 59, 59).unwrap()));
        assert!(t.is_expired(Utc.with_ymd_and_hms(2025, 6, 8, 12, 0, 0).unwrap()));
    }
}
