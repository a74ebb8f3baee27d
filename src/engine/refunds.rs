//! Refund engine. A holder requests a refund against a confirmed ticket;
//! while the request is pending the ticket is parked in `refund_pending`
//! and cannot be validated or transferred. Approval pushes the money back
//! through the original gateway and books a negative credit payment;
//! rejection returns the ticket to `confirmed`.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use sqlx::{PgConnection, PgPool};
use tracing::info;
use uuid::Uuid;

use crate::engine::audit::{self, AuditEntry};
use crate::engine::gateway::GatewayRegistry;
use crate::engine::ids;
use crate::engine::money::{Currency, Money};
use crate::models::order::OrderStatus;
use crate::models::payment::Payment;
use crate::models::refund::{RefundStatus, TicketRefund};
use crate::models::ticket::{Ticket, TicketStatus};
use crate::utils::error::AppError;

/// Requests close this many hours before the event starts.
pub const REFUND_CUTOFF_HOURS: i64 = 24;

#[derive(Debug, Deserialize)]
pub struct RefundRequest {
    pub ticket_id: Uuid,
    /// Defaults to the full amount paid for the ticket.
    pub refund_amount: Option<Decimal>,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct RejectRequest {
    #[serde(default)]
    pub rejection_reason: Option<String>,
}

/// Opens a refund request. The ticket must be confirmed and the event more
/// than the cutoff away; the amount may not exceed what was paid.
pub async fn request(
    pool: &PgPool,
    user_id: Uuid,
    req: RefundRequest,
) -> Result<TicketRefund, AppError> {
    if req.reason.trim().is_empty() {
        return Err(AppError::ValidationError(
            "A refund reason is required".to_string(),
        ));
    }

    let now = Utc::now();
    let mut tx = pool.begin().await?;
    let ticket = lock_ticket(&mut tx, req.ticket_id).await?;
    if ticket.user_id != user_id {
        return Err(AppError::Forbidden(
            "Ticket belongs to another user".to_string(),
        ));
    }
    if !ticket.status.can_transition_to(TicketStatus::RefundPending) {
        return Err(AppError::ConflictingState(format!(
            "Ticket is {}",
            ticket.status.as_str()
        )));
    }
    let event = super::checkout::fetch_event_on(&mut tx, ticket.event_id).await?;
    if !refund_window_open(event.start_time, now) {
        return Err(AppError::ValidationError(format!(
            "Refunds close {} hours before the event",
            REFUND_CUTOFF_HOURS
        )));
    }

    let currency = Currency::new(&ticket.currency)?;
    let paid = Money::new(ticket.total_price, currency.clone())?;
    let amount = match req.refund_amount {
        Some(amount) => {
            let requested = Money::new(amount, currency)?;
            if requested.is_zero() {
                return Err(AppError::ValidationError(
                    "Refund amount must be greater than zero".to_string(),
                ));
            }
            if requested.checked_cmp(&paid)? == std::cmp::Ordering::Greater {
                return Err(AppError::ValidationError(
                    "Refund amount exceeds the amount paid".to_string(),
                ));
            }
            requested
        }
        None => paid.clone(),
    };

    sqlx::query("UPDATE tickets SET status = 'refund_pending', updated_at = now() WHERE id = $1")
        .bind(ticket.id)
        .execute(&mut *tx)
        .await?;
    let refund = sqlx::query_as::<_, TicketRefund>(
        r#"
        INSERT INTO ticket_refunds
            (ticket_id, user_id, original_amount, refund_amount, currency, reason)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING *
        "#,
    )
    .bind(ticket.id)
    .bind(user_id)
    .bind(paid.amount)
    .bind(amount.amount)
    .bind(ticket.currency.as_str())
    .bind(req.reason.trim())
    .fetch_one(&mut *tx)
    .await?;
    tx.commit().await?;

    audit::record(
        pool,
        AuditEntry::new("REFUND_REQUESTED", "ticket_refund", refund.id.to_string())
            .actor(user_id)
            .metadata(json!({
                "ticket_id": ticket.id,
                "refund_amount": refund.refund_amount,
            })),
    )
    .await;
    info!(refund_id = %refund.id, ticket_id = %ticket.id, "Refund requested");
    Ok(refund)
}

/// Approves a pending request: the money goes back through the gateway that
/// took it, a negative credit payment is booked against the order, and the
/// order's paid/refunded counters move. The request is claimed (`pending`
/// → `approving`) before the gateway is called, so two approvers can never
/// both push money out; a gateway failure releases the claim.
pub async fn approve(
    pool: &PgPool,
    gateways: &GatewayRegistry,
    approver_id: Uuid,
    refund_id: Uuid,
) -> Result<TicketRefund, AppError> {
    let refund = fetch_refund(pool, refund_id).await?;
    if refund.status != RefundStatus::Pending {
        return Err(AppError::ConflictingState(format!(
            "Refund is {:?}",
            refund.status
        )));
    }
    let refund = sqlx::query_as::<_, TicketRefund>(
        "UPDATE ticket_refunds SET status = 'approving' WHERE id = $1 AND status = 'pending'
         RETURNING *",
    )
    .bind(refund_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| {
        AppError::ConflictingState("Refund is already being settled".to_string())
    })?;

    let ticket = super::tickets::fetch_ticket(pool, refund.ticket_id).await?;
    if ticket.status != TicketStatus::RefundPending {
        release_claim(pool, refund_id).await?;
        return Err(AppError::ConflictingState(format!(
            "Ticket is {}",
            ticket.status.as_str()
        )));
    }
    let original = match find_settled_payment(pool, &ticket).await {
        Ok(payment) => payment,
        Err(e) => {
            release_claim(pool, refund_id).await?;
            return Err(e);
        }
    };

    // Gateway call next, outside any transaction, holding only the claim.
    let adapter = gateways.get(original.gateway)?;
    let currency = Currency::new(&refund.currency)?;
    let amount = Money::new(refund.refund_amount, currency)?;
    let reference = original
        .gateway_transaction_id
        .clone()
        .unwrap_or_else(|| original.reference_number.clone());
    let gateway_refund_id = match adapter.refund(&reference, &amount).await {
        Ok(id) => id,
        Err(e) => {
            release_claim(pool, refund_id).await?;
            return Err(e.into());
        }
    };

    let mut tx = pool.begin().await?;
    // Order before ticket, matching the lock order everywhere else.
    let order = match ticket.order_id {
        Some(order_id) => Some(super::orders::lock_order(&mut tx, order_id).await?),
        None => None,
    };
    let ticket = lock_ticket(&mut tx, refund.ticket_id).await?;
    if ticket.status != TicketStatus::RefundPending {
        return Err(AppError::ConflictingState(format!(
            "Ticket is {}",
            ticket.status.as_str()
        )));
    }

    sqlx::query("UPDATE tickets SET status = 'refunded', updated_at = now() WHERE id = $1")
        .bind(ticket.id)
        .execute(&mut *tx)
        .await?;

    // The credit is a negative payment row, so the payments table remains a
    // complete signed ledger of money in and out.
    let credit = sqlx::query_as::<_, Payment>(
        r#"
        INSERT INTO payments
            (user_id, order_id, gateway, method, reference_number, amount,
             currency, status, gateway_transaction_id)
        VALUES ($1, $2, $3, $4, $5, $6, $7, 'refunded', $8)
        RETURNING *
        "#,
    )
    .bind(refund.user_id)
    .bind(ticket.order_id)
    .bind(original.gateway)
    .bind(&original.method)
    .bind(ids::payment_reference())
    .bind(-refund.refund_amount)
    .bind(refund.currency.as_str())
    .bind(&reference)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query(
        "UPDATE payments SET refunded_amount = refunded_amount + $2, updated_at = now()
         WHERE id = $1",
    )
    .bind(original.id)
    .bind(refund.refund_amount)
    .execute(&mut *tx)
    .await?;

    if let Some(order) = &order {
        // An order whose paid amount reaches zero has been refunded in full.
        let remaining_paid = order.amount_paid - refund.refund_amount;
        let next_status = order_status_after_refund(order.status, remaining_paid);
        sqlx::query(
            r#"
            UPDATE orders
            SET amount_paid = amount_paid - $2,
                total_amount = total_amount - $2,
                status = $3,
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(order.id)
        .bind(refund.refund_amount)
        .bind(next_status)
        .execute(&mut *tx)
        .await?;
    }

    let refund = sqlx::query_as::<_, TicketRefund>(
        r#"
        UPDATE ticket_refunds
        SET status = 'approved', approved_at = now(), approved_by = $2, credit_payment_id = $3
        WHERE id = $1 AND status = 'approving'
        RETURNING *
        "#,
    )
    .bind(refund_id)
    .bind(approver_id)
    .bind(credit.id)
    .fetch_one(&mut *tx)
    .await?;
    tx.commit().await?;

    audit::record(
        pool,
        AuditEntry::new("REFUND_APPROVED", "ticket_refund", refund_id.to_string())
            .actor(approver_id)
            .after(json!({
                "ticket_id": ticket.id,
                "refund_amount": refund.refund_amount,
                "credit_payment_id": credit.id,
                "gateway_refund_id": gateway_refund_id,
            })),
    )
    .await;
    info!(refund_id = %refund_id, amount = %refund.refund_amount, "Refund approved");
    Ok(refund)
}

/// Rejects a pending request; the ticket goes back to `confirmed` and stays
/// usable.
pub async fn reject(
    pool: &PgPool,
    approver_id: Uuid,
    refund_id: Uuid,
    req: RejectRequest,
) -> Result<TicketRefund, AppError> {
    let mut tx = pool.begin().await?;
    let refund = lock_refund(&mut tx, refund_id).await?;
    if refund.status != RefundStatus::Pending {
        return Err(AppError::ConflictingState(format!(
            "Refund is {:?}",
            refund.status
        )));
    }
    let ticket = lock_ticket(&mut tx, refund.ticket_id).await?;
    if ticket.status == TicketStatus::RefundPending {
        sqlx::query("UPDATE tickets SET status = 'confirmed', updated_at = now() WHERE id = $1")
            .bind(ticket.id)
            .execute(&mut *tx)
            .await?;
    }

    let refund = sqlx::query_as::<_, TicketRefund>(
        r#"
        UPDATE ticket_refunds
        SET status = 'rejected', rejected_at = now(), rejected_by = $2, rejection_reason = $3
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(refund_id)
    .bind(approver_id)
    .bind(&req.rejection_reason)
    .fetch_one(&mut *tx)
    .await?;
    tx.commit().await?;

    audit::record(
        pool,
        AuditEntry::new("REFUND_REJECTED", "ticket_refund", refund_id.to_string())
            .actor(approver_id)
            .metadata(json!({ "reason": req.rejection_reason })),
    )
    .await;
    Ok(refund)
}

/// Requests are accepted only while the event start is more than the
/// cutoff away.
fn refund_window_open(event_start: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    event_start > now + Duration::hours(REFUND_CUTOFF_HOURS)
}

/// An order fully drained of paid money moves to `refunded`; a partial
/// refund leaves the status alone.
fn order_status_after_refund(current: OrderStatus, remaining_paid: Decimal) -> OrderStatus {
    if remaining_paid <= Decimal::ZERO && current.can_transition_to(OrderStatus::Refunded) {
        OrderStatus::Refunded
    } else {
        current
    }
}

/// Hands a claimed request back to `pending` so it can be retried.
async fn release_claim(pool: &PgPool, refund_id: Uuid) -> Result<(), AppError> {
    sqlx::query(
        "UPDATE ticket_refunds SET status = 'pending' WHERE id = $1 AND status = 'approving'",
    )
    .bind(refund_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// The settled payment the money originally arrived on. The most recent
/// completed payment for the ticket's order wins when there are several.
async fn find_settled_payment(pool: &PgPool, ticket: &Ticket) -> Result<Payment, AppError> {
    let order_id = ticket.order_id.ok_or_else(|| {
        AppError::ConflictingState("Ticket is not attached to an order".to_string())
    })?;
    sqlx::query_as::<_, Payment>(
        r#"
        SELECT * FROM payments
        WHERE order_id = $1 AND status = 'completed' AND amount > 0
        ORDER BY created_at DESC
        LIMIT 1
        "#,
    )
    .bind(order_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| {
        AppError::ConflictingState("No settled payment to refund against".to_string())
    })
}

async fn fetch_refund(pool: &PgPool, refund_id: Uuid) -> Result<TicketRefund, AppError> {
    sqlx::query_as::<_, TicketRefund>("SELECT * FROM ticket_refunds WHERE id = $1")
        .bind(refund_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Refund not found".to_string()))
}

async fn lock_refund(conn: &mut PgConnection, refund_id: Uuid) -> Result<TicketRefund, AppError> {
    sqlx::query_as::<_, TicketRefund>("SELECT * FROM ticket_refunds WHERE id = $1 FOR UPDATE")
        .bind(refund_id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| AppError::NotFound("Refund not found".to_string()))
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

    #[test]
    fn test_refund_window_boundaries() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        // Event in 12 hours: inside the cutoff, refused.
        assert!(!refund_window_open(now + Duration::hours(12), now));
        // Exactly at the cutoff still counts as closed.
        assert!(!refund_window_open(now + Duration::hours(24), now));
        // Event in 48 hours: open.
        assert!(refund_window_open(now + Duration::hours(48), now));
    }

    #[test]
    fn test_full_refund_moves_order_to_refunded() {
        assert_eq!(
            order_status_after_refund(OrderStatus::Confirmed, Decimal::ZERO),
            OrderStatus::Refunded
        );
    }

    #[test]
    fn test_partial_refund_keeps_order_status() {
        assert_eq!(
            order_status_after_refund(
                OrderStatus::Confirmed,
                Decimal::from_str_exact("50.00").unwrap()
            ),
            OrderStatus::Confirmed
        );
        assert_eq!(
            order_status_after_refund(OrderStatus::PartiallyPaid, Decimal::ZERO),
            OrderStatus::PartiallyPaid
        );
    }
}
