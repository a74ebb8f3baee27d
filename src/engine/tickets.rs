//! Ticket-centric operations: the legacy direct purchase path, payment
//! confirmation against an order balance, voluntary cancellation, and the
//! QR payload for client-side rendering.
//!
//! Direct purchase goes through the same reservation manager as the cart
//! path: capacity is held, the hold is consumed in the same transaction,
//! and the minted tickets stand in its place with the order carrying the
//! full balance until payment lands.

use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::audit::{self, AuditEntry};
use crate::engine::checkout::{self, fetch_event, fetch_session, fetch_tier};
use crate::engine::gateway::{self, GatewayRegistry};
use crate::engine::ids;
use crate::engine::issuer::{self, IssueLine};
use crate::engine::money::Money;
use crate::engine::orders;
use crate::engine::pricing;
use crate::engine::reservations::{self, HoldLine, DEFAULT_HOLD_TTL_MINUTES};
use crate::models::order::{Order, OrderStatus};
use crate::models::payment::{Payment, PaymentGatewayKind};
use crate::models::ticket::{CredentialFormat, Ticket, TicketFormat, TicketStatus};
use crate::models::tier::PricingTier;
use crate::utils::error::{AppError, FieldError};

#[derive(Debug, Deserialize)]
pub struct PurchaseRequest {
    pub event_id: Uuid,
    pub tier_id: Option<Uuid>,
    /// Tier looked up by name when no id is given ("VIP", "General", ...).
    pub ticket_type: Option<String>,
    pub session_id: Option<Uuid>,
    pub quantity: i32,
    pub seat_ids: Option<Vec<Uuid>>,
    /// Routes the pending payment to a gateway; settles offline when absent.
    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub ticket_format: Option<TicketFormat>,
    #[serde(default)]
    pub credential_format: Option<CredentialFormat>,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmPaymentRequest {
    #[serde(default)]
    pub gateway_response: Option<Value>,
}

#[derive(Debug, serde::Serialize)]
pub struct PurchaseOutcome {
    pub order: Order,
    pub tickets: Vec<Ticket>,
    pub payment: Payment,
    pub client_payload: Value,
}

/// Direct purchase: hold, consume the hold, mint reserved tickets and open
/// an order for the full balance, all in one transaction. A pending payment
/// with gateway intent material is opened afterwards; `confirm_payment`
/// verifies against that material.
pub async fn purchase(
    pool: &PgPool,
    gateways: &GatewayRegistry,
    user_id: Uuid,
    req: PurchaseRequest,
) -> Result<PurchaseOutcome, AppError> {
    let now = Utc::now();
    let mut fields = Vec::new();
    if req.quantity <= 0 {
        fields.push(FieldError::new("quantity", "must be greater than zero"));
    }
    if let Some(seats) = &req.seat_ids {
        if seats.len() != req.quantity as usize {
            fields.push(FieldError::new(
                "seat_ids",
                "must match quantity when seats are chosen",
            ));
        }
    }
    if !fields.is_empty() {
        return Err(AppError::ValidationErrors(fields));
    }

    let event = fetch_event(pool, req.event_id).await?;
    if !event.sales_open_at(now) {
        return Err(AppError::ValidationError(
            "Ticket sales are not open for this event".to_string(),
        ));
    }
    let tier = resolve_tier(pool, &req, event.id).await?;
    if let Some(tier) = &tier {
        if !tier.window_open_at(now) {
            return Err(AppError::ValidationError(
                "Ticket sales are not open for this tier".to_string(),
            ));
        }
    }
    let session = match req.session_id {
        Some(id) => {
            let session = fetch_session(pool, id).await?;
            if session.event_id != event.id {
                return Err(AppError::ValidationError(
                    "Session does not belong to this event".to_string(),
                ));
            }
            Some(session)
        }
        None => None,
    };
    if let Some(seat_ids) = &req.seat_ids {
        crate::engine::inventory::verify_seats(pool, &event, seat_ids).await?;
    }

    let priced = pricing::resolve(&event, tier.as_ref(), session.as_ref(), req.quantity, None)?;
    let total = priced
        .unit_price
        .checked_add(&priced.service_fee)?
        .checked_mul(i64::from(req.quantity))?;

    let mut tx = pool.begin().await?;
    let hold = HoldLine {
        event_id: event.id,
        tier_id: tier.as_ref().map(|t| t.id),
        session_id: session.as_ref().map(|s| s.id),
        quantity: req.quantity,
        seat_ids: req.seat_ids.clone(),
    };
    let expires_at = now + Duration::minutes(DEFAULT_HOLD_TTL_MINUTES);
    let reservation_id = reservations::hold_line(&mut tx, user_id, &hold, expires_at).await?;

    let order = sqlx::query_as::<_, Order>(
        r#"
        INSERT INTO orders
            (user_id, total_amount, amount_paid, balance_due, currency, status, reservation_ids)
        VALUES ($1, $2, 0, $2, $3, 'reserved', $4)
        RETURNING *
        "#,
    )
    .bind(user_id)
    .bind(total.amount)
    .bind(total.currency.as_str())
    .bind(vec![reservation_id])
    .fetch_one(&mut *tx)
    .await?;

    // The tickets stand in place of the hold from here on.
    reservations::confirm(&mut tx, reservation_id, None, user_id, now).await?;
    let issue = IssueLine {
        event: &event,
        tier_id: hold.tier_id,
        session_id: hold.session_id,
        seat_ids: req.seat_ids.as_deref(),
        ticket_format: req.ticket_format.unwrap_or(TicketFormat::Digital),
        credential_format: req.credential_format.unwrap_or_default(),
        priced: &priced,
    };
    let tickets =
        issuer::issue(&mut tx, order.id, user_id, 0, &issue, TicketStatus::Reserved).await?;
    tx.commit().await?;

    let method = req.payment_method.clone().unwrap_or_else(|| "cash".to_string());
    let gateway_kind = PaymentGatewayKind::for_method(&method);
    let payment = insert_order_payment(pool, user_id, order.id, gateway_kind, &method, &total)
        .await?;

    // Gateway intent, outside the transaction. A failure leaves the order
    // reserved with a bare pending payment; the buyer can cancel or retry
    // through the order's pay endpoint.
    let adapter = gateways.get(gateway_kind)?;
    let (payment, client_payload) = match gateway::create_intent_with_retry(
        adapter.as_ref(),
        &total,
        &payment.reference_number,
        user_id,
    )
    .await
    {
        Ok(intent) => {
            let payment = checkout::attach_intent(pool, payment.id, &intent).await?;
            (payment, intent.client_payload)
        }
        Err(e) => {
            warn!(
                order_id = %order.id,
                error = %e,
                "Gateway intent failed after direct purchase"
            );
            (payment, json!({}))
        }
    };

    audit::record(
        pool,
        AuditEntry::new("TICKETS_PURCHASED", "order", order.id.to_string())
            .actor(user_id)
            .after(json!({
                "event_id": event.id,
                "quantity": req.quantity,
                "total_amount": order.total_amount,
            })),
    )
    .await;
    info!(order_id = %order.id, quantity = req.quantity, "Direct purchase reserved");
    Ok(PurchaseOutcome {
        order,
        tickets,
        payment,
        client_payload,
    })
}

/// Settles the order behind a reserved ticket. The gateway the payment was
/// opened with verifies against the intent material captured at purchase;
/// the caller's `gateway_response` cannot override it. The order and its
/// tickets confirm in a second, conditional transaction.
pub async fn confirm_payment(
    pool: &PgPool,
    gateways: &GatewayRegistry,
    user_id: Uuid,
    ticket_id: Uuid,
    req: ConfirmPaymentRequest,
) -> Result<(Order, Payment), AppError> {
    let ticket = fetch_ticket(pool, ticket_id).await?;
    if ticket.user_id != user_id {
        return Err(AppError::Forbidden(
            "Ticket belongs to another user".to_string(),
        ));
    }
    let order_id = ticket.order_id.ok_or_else(|| {
        AppError::ConflictingState("Ticket is not attached to an order".to_string())
    })?;
    let payment = fetch_order_payment(pool, order_id).await?;

    let adapter = gateways.get(payment.gateway)?;
    let payload = checkout::build_verification_payload(req.gateway_response.as_ref(), &payment);
    let verification = adapter
        .verify(&payment.reference_number, &payload)
        .await
        .map_err(AppError::from)?;

    settle(pool, user_id, order_id, &payment, &verification).await
}

/// Applies a verified full payment to a reserved order: the pending payment
/// completes, the balance clears, and the reserved collateral confirms.
async fn settle(
    pool: &PgPool,
    user_id: Uuid,
    order_id: Uuid,
    payment: &Payment,
    verification: &gateway::Verification,
) -> Result<(Order, Payment), AppError> {
    let mut tx = pool.begin().await?;
    let order = orders::lock_order(&mut tx, order_id).await?;
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

    let payment = sqlx::query_as::<_, Payment>(
        r#"
        UPDATE payments
        SET status = 'completed', amount = $2, gateway_transaction_id = $3,
            gateway_response = $4, updated_at = now()
        WHERE id = $1 AND status = 'pending'
        RETURNING *
        "#,
    )
    .bind(payment.id)
    .bind(order.balance_due)
    .bind(&verification.transaction_id)
    .bind(&verification.raw_response)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| AppError::ConflictingState("Payment is no longer pending".to_string()))?;

    let order = sqlx::query_as::<_, Order>(
        r#"
        UPDATE orders
        SET amount_paid = total_amount, balance_due = 0, status = 'confirmed', updated_at = now()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(order_id)
    .fetch_one(&mut *tx)
    .await?;
    orders::confirm_order_collateral(&mut tx, &order, payment.id).await?;
    tx.commit().await?;

    audit::record(
        pool,
        AuditEntry::new("ORDER_CONFIRMED", "order", order_id.to_string())
            .actor(user_id)
            .after(json!({
                "amount_paid": order.amount_paid,
                "transaction_id": verification.transaction_id,
            })),
    )
    .await;
    info!(order_id = %order_id, "Direct purchase settled");
    Ok((order, payment))
}

/// Voids a reserved or confirmed ticket before the event starts and gives
/// its capacity back.
pub async fn cancel(pool: &PgPool, user_id: Uuid, ticket_id: Uuid) -> Result<Ticket, AppError> {
    let now = Utc::now();
    let mut tx = pool.begin().await?;
    let ticket = sqlx::query_as::<_, Ticket>("SELECT * FROM tickets WHERE id = $1 FOR UPDATE")
        .bind(ticket_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Ticket not found".to_string()))?;

    if ticket.user_id != user_id {
        return Err(AppError::Forbidden(
            "Ticket belongs to another user".to_string(),
        ));
    }
    if !ticket.status.can_transition_to(TicketStatus::Cancelled) {
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

    let ticket = sqlx::query_as::<_, Ticket>(
        "UPDATE tickets SET status = 'cancelled', updated_at = now() WHERE id = $1 RETURNING *",
    )
    .bind(ticket_id)
    .fetch_one(&mut *tx)
    .await?;
    orders::give_back_ticket_inventory(&mut tx, &ticket).await?;
    tx.commit().await?;

    audit::record(
        pool,
        AuditEntry::new("TICKET_CANCELLED", "ticket", ticket_id.to_string()).actor(user_id),
    )
    .await;
    Ok(ticket)
}

/// The QR credential payload, for the client to render. Owners only.
pub async fn qr_payload(pool: &PgPool, user_id: Uuid, ticket_id: Uuid) -> Result<String, AppError> {
    let ticket = fetch_ticket(pool, ticket_id).await?;
    if ticket.user_id != user_id {
        return Err(AppError::Forbidden(
            "Ticket belongs to another user".to_string(),
        ));
    }
    ticket
        .qr_data
        .ok_or_else(|| AppError::NotFound("Ticket has no QR credential".to_string()))
}

async fn resolve_tier(
    pool: &PgPool,
    req: &PurchaseRequest,
    event_id: Uuid,
) -> Result<Option<PricingTier>, AppError> {
    if let Some(tier_id) = req.tier_id {
        let tier = fetch_tier(pool, tier_id).await?;
        if tier.event_id != event_id {
            return Err(AppError::ValidationError(
                "Pricing tier does not belong to this event".to_string(),
            ));
        }
        return Ok(Some(tier));
    }
    if let Some(name) = &req.ticket_type {
        let tier = sqlx::query_as::<_, PricingTier>(
            "SELECT * FROM pricing_tiers WHERE event_id = $1 AND LOWER(name) = LOWER($2)",
        )
        .bind(event_id)
        .bind(name)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| {
            AppError::NotFound(format!("No '{}' tier for this event", name))
        })?;
        return Ok(Some(tier));
    }
    Ok(None)
}

async fn insert_order_payment(
    pool: &PgPool,
    user_id: Uuid,
    order_id: Uuid,
    gateway: PaymentGatewayKind,
    method: &str,
    amount: &Money,
) -> Result<Payment, AppError> {
    let payment = sqlx::query_as::<_, Payment>(
        r#"
        INSERT INTO payments
            (user_id, order_id, gateway, method, reference_number, amount, currency)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING *
        "#,
    )
    .bind(user_id)
    .bind(order_id)
    .bind(gateway)
    .bind(method)
    .bind(ids::payment_reference())
    .bind(amount.amount)
    .bind(amount.currency.as_str())
    .fetch_one(pool)
    .await?;
    Ok(payment)
}

async fn fetch_order_payment(pool: &PgPool, order_id: Uuid) -> Result<Payment, AppError> {
    sqlx::query_as::<_, Payment>(
        r#"
        SELECT * FROM payments
        WHERE order_id = $1 AND status = 'pending'
        ORDER BY created_at DESC
        LIMIT 1
        "#,
    )
    .bind(order_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound("No pending payment for order".to_string()))
}

pub(crate) async fn fetch_ticket(pool: &PgPool, ticket_id: Uuid) -> Result<Ticket, AppError> {
    sqlx::query_as::<_, Ticket>("SELECT * FROM tickets WHERE id = $1")
        .bind(ticket_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Ticket not found".to_string()))
}
