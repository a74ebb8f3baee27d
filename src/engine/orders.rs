//! Order operations after checkout: retrieval, listing, applying further
//! payments to a balance, and pre-event cancellation. Every mutation locks
//! the order row and consults the transition table before moving.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::{PgConnection, PgPool, Row};
use tracing::info;
use uuid::Uuid;

use crate::engine::audit::{self, AuditEntry};
use crate::engine::inventory::{self, InventoryTarget};
use crate::engine::money::{Currency, Money};
use crate::engine::ids;
use crate::models::order::{Order, OrderStatus};
use crate::models::payment::{Payment, PaymentGatewayKind};
use crate::models::ticket::Ticket;
use crate::utils::error::AppError;
use crate::utils::response::Paginated;

const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, Deserialize)]
pub struct ApplyPaymentRequest {
    pub amount_paid: Decimal,
    pub payment_method: String,
    #[serde(default)]
    pub gateway_response: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<OrderStatus>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

pub async fn get(pool: &PgPool, user_id: Uuid, order_id: Uuid) -> Result<(Order, Vec<Ticket>), AppError> {
    let order = fetch_order(pool, order_id).await?;
    if order.user_id != user_id {
        return Err(AppError::Forbidden("Order belongs to another user".to_string()));
    }
    let tickets = sqlx::query_as::<_, Ticket>(
        "SELECT * FROM tickets WHERE order_id = $1 ORDER BY line_no",
    )
    .bind(order_id)
    .fetch_all(pool)
    .await?;
    Ok((order, tickets))
}

pub async fn list(
    pool: &PgPool,
    user_id: Uuid,
    query: ListQuery,
) -> Result<Paginated<Order>, AppError> {
    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(20).clamp(1, MAX_PAGE_SIZE);
    let offset = (page - 1) * limit;

    let orders = sqlx::query_as::<_, Order>(
        r#"
        SELECT * FROM orders
        WHERE user_id = $1 AND ($2::order_status IS NULL OR status = $2)
        ORDER BY created_at DESC
        LIMIT $3 OFFSET $4
        "#,
    )
    .bind(user_id)
    .bind(query.status)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    let total: i64 = sqlx::query(
        "SELECT COUNT(*) AS count FROM orders
         WHERE user_id = $1 AND ($2::order_status IS NULL OR status = $2)",
    )
    .bind(user_id)
    .bind(query.status)
    .fetch_one(pool)
    .await?
    .get("count");

    Ok(Paginated {
        items: orders,
        page,
        limit,
        total,
    })
}

/// Applies a further payment to an order carrying a balance. The amount is
/// clamped to the balance due; on full payment the order confirms and its
/// reserved tickets with it. Partial top-ups land back in `partially_paid`,
/// so partial-then-top-up and single-full-payment converge on the same
/// final state.
pub async fn apply_payment(
    pool: &PgPool,
    user_id: Uuid,
    order_id: Uuid,
    req: ApplyPaymentRequest,
) -> Result<(Order, Payment), AppError> {
    if req.amount_paid <= Decimal::ZERO {
        return Err(AppError::ValidationError(
            "Paid amount must be greater than zero".to_string(),
        ));
    }

    let mut tx = pool.begin().await?;
    let order = lock_order(&mut tx, order_id).await?;
    if order.user_id != user_id {
        return Err(AppError::Forbidden("Order belongs to another user".to_string()));
    }
    match order.status {
        OrderStatus::Reserved | OrderStatus::PartiallyPaid => {}
        OrderStatus::Confirmed => {
            return Err(AppError::ConflictingState(
                "Order is already fully paid".to_string(),
            ))
        }
        status => {
            return Err(AppError::ConflictingState(format!(
                "Order is {}",
                status.as_str()
            )))
        }
    }

    let currency = Currency::new(&order.currency)?;
    let balance = Money::new(order.balance_due, currency.clone())?;
    let applied = Money::new(req.amount_paid, currency.clone())?.clamp_to(&balance)?;
    let new_paid = Money::new(order.amount_paid, currency.clone())?.checked_add(&applied)?;
    let new_balance = balance.checked_sub(&applied)?;

    let next_status = if new_balance.is_zero() {
        OrderStatus::Confirmed
    } else {
        OrderStatus::PartiallyPaid
    };
    if !order.status.can_transition_to(next_status) {
        return Err(AppError::ConflictingState(format!(
            "Order is {}",
            order.status.as_str()
        )));
    }

    let payment = sqlx::query_as::<_, Payment>(
        r#"
        INSERT INTO payments
            (user_id, order_id, gateway, method, reference_number, amount,
             currency, status, gateway_response)
        VALUES ($1, $2, $3, $4, $5, $6, $7, 'completed', $8)
        RETURNING *
        "#,
    )
    .bind(user_id)
    .bind(order_id)
    .bind(PaymentGatewayKind::for_method(&req.payment_method))
    .bind(&req.payment_method)
    .bind(ids::payment_reference())
    .bind(applied.amount)
    .bind(currency.as_str())
    .bind(&req.gateway_response)
    .fetch_one(&mut *tx)
    .await?;

    let order = sqlx::query_as::<_, Order>(
        r#"
        UPDATE orders
        SET amount_paid = $2, balance_due = $3, status = $4, updated_at = now()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(order_id)
    .bind(new_paid.amount)
    .bind(new_balance.amount)
    .bind(next_status)
    .fetch_one(&mut *tx)
    .await?;

    if next_status == OrderStatus::Confirmed {
        confirm_order_collateral(&mut tx, &order, payment.id).await?;
    }
    tx.commit().await?;

    let action = if next_status == OrderStatus::Confirmed {
        "ORDER_CONFIRMED"
    } else {
        "ORDER_PAYMENT_APPLIED"
    };
    audit::record(
        pool,
        AuditEntry::new(action, "order", order_id.to_string())
            .actor(user_id)
            .after(json!({
                "amount_paid": order.amount_paid,
                "balance_due": order.balance_due,
                "status": order.status,
            })),
    )
    .await;
    info!(order_id = %order_id, applied = %applied, status = ?order.status, "Payment applied");
    Ok((order, payment))
}

/// Cancels an order before any of its events start: tickets are voided,
/// their inventory goes back to the ledger, and unpaid payments fail.
pub async fn cancel(
    pool: &PgPool,
    user_id: Uuid,
    order_id: Uuid,
    reason: Option<String>,
) -> Result<Order, AppError> {
    let now = Utc::now();
    let mut tx = pool.begin().await?;
    let order = lock_order(&mut tx, order_id).await?;
    if order.user_id != user_id {
        return Err(AppError::Forbidden("Order belongs to another user".to_string()));
    }
    if !order.status.can_transition_to(OrderStatus::Cancelled) {
        return Err(AppError::ConflictingState(format!(
            "Order is {}",
            order.status.as_str()
        )));
    }

    let tickets = sqlx::query_as::<_, Ticket>(
        "SELECT * FROM tickets WHERE order_id = $1 FOR UPDATE",
    )
    .bind(order_id)
    .fetch_all(&mut *tx)
    .await?;

    for ticket in &tickets {
        let event = super::checkout::fetch_event_on(&mut tx, ticket.event_id).await?;
        if event.has_started(now) {
            return Err(AppError::ConflictingState(
                "Order covers an event that has already started".to_string(),
            ));
        }
    }

    // Tier locks are acquired in one global order across callers.
    let mut live: Vec<&Ticket> = tickets.iter().filter(|t| !t.status.is_terminal()).collect();
    live.sort_by_key(|t| (t.tier_id, t.session_id));
    for ticket in live {
        sqlx::query(
            "UPDATE tickets SET status = 'cancelled', updated_at = now() WHERE id = $1",
        )
        .bind(ticket.id)
        .execute(&mut *tx)
        .await?;
        give_back_ticket_inventory(&mut tx, ticket).await?;
    }

    sqlx::query(
        "UPDATE payments SET status = 'failed', updated_at = now()
         WHERE order_id = $1 AND status = 'pending'",
    )
    .bind(order_id)
    .execute(&mut *tx)
    .await?;

    let order = sqlx::query_as::<_, Order>(
        r#"
        UPDATE orders
        SET status = 'cancelled', cancelled_reason = $2, updated_at = now()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(order_id)
    .bind(&reason)
    .fetch_one(&mut *tx)
    .await?;
    tx.commit().await?;

    audit::record(
        pool,
        AuditEntry::new("ORDER_CANCELLED", "order", order_id.to_string())
            .actor(user_id)
            .metadata(json!({ "reason": reason, "tickets_voided": tickets.len() })),
    )
    .await;
    Ok(order)
}

/// On full payment, the order's reserved tickets confirm and any hold still
/// pending against it is consumed.
pub(crate) async fn confirm_order_collateral(
    conn: &mut PgConnection,
    order: &Order,
    payment_id: Uuid,
) -> Result<(), AppError> {
    sqlx::query(
        "UPDATE tickets SET status = 'confirmed', updated_at = now()
         WHERE order_id = $1 AND status = 'reserved'",
    )
    .bind(order.id)
    .execute(&mut *conn)
    .await?;
    sqlx::query(
        "UPDATE reservations SET status = 'confirmed', payment_id = $2, confirmed_at = now()
         WHERE id = ANY($1) AND status = 'held'",
    )
    .bind(&order.reservation_ids)
    .bind(payment_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Returns a voided ticket's unit of capacity to its tier or session.
pub(crate) async fn give_back_ticket_inventory(
    conn: &mut PgConnection,
    ticket: &Ticket,
) -> Result<(), AppError> {
    let target = match (ticket.tier_id, ticket.session_id) {
        (Some(tier), _) => InventoryTarget::Tier(tier),
        (None, Some(session)) => InventoryTarget::Session(session),
        (None, None) => return Ok(()),
    };
    inventory::increment(conn, target, 1).await
}

pub(crate) async fn fetch_order(pool: &PgPool, order_id: Uuid) -> Result<Order, AppError> {
    sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1")
        .bind(order_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Order not found".to_string()))
}

pub(crate) async fn lock_order(conn: &mut PgConnection, order_id: Uuid) -> Result<Order, AppError> {
    sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1 FOR UPDATE")
        .bind(order_id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| AppError::NotFound("Order not found".to_string()))
}
