//! Checkout lifecycle: cart management, `initiate`, `complete`, `cancel`
//! and `get`. A checkout freezes the priced cart into a snapshot, holds
//! inventory through the reservation manager, and hands the money side to
//! a gateway adapter. Gateway calls never run inside a database
//! transaction: verification outcomes are applied in a second, short,
//! conditional transaction.

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::{PgConnection, PgPool};
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::audit::{self, AuditEntry};
use crate::engine::gateway::{self, GatewayRegistry, PaymentIntent};
use crate::engine::issuer::{self, IssueLine};
use crate::engine::money::{Currency, Money};
use crate::engine::pricing::{self, PricedLine};
use crate::engine::reservations;
use crate::engine::ids;
use crate::models::cart::{Cart, CartItem};
use crate::models::checkout::{Checkout, CheckoutLine, CheckoutStatus};
use crate::models::event::Event;
use crate::models::order::{Order, OrderStatus};
use crate::models::payment::{Payment, PaymentGatewayKind, PaymentStatus};
use crate::models::ticket::{CredentialFormat, Ticket, TicketFormat, TicketStatus};
use crate::models::tier::{PricingTier, Session};
use crate::utils::error::{AppError, FieldError};

/// Checkouts expire 15 minutes after initiation.
pub const CHECKOUT_TTL_MINUTES: i64 = 15;

#[derive(Debug, Deserialize)]
pub struct AddItemRequest {
    pub event_id: Uuid,
    pub tier_id: Option<Uuid>,
    pub session_id: Option<Uuid>,
    pub quantity: i32,
    pub seat_ids: Option<Vec<Uuid>>,
    #[serde(default)]
    pub ticket_format: Option<TicketFormat>,
    #[serde(default)]
    pub credential_format: Option<CredentialFormat>,
}

#[derive(Debug, Deserialize)]
pub struct InitiateRequest {
    pub payment_method: String,
    #[serde(default)]
    pub billing_info: Value,
}

#[derive(Debug, Deserialize)]
pub struct CompleteRequest {
    pub checkout_id: Uuid,
    pub payment_intent_id: Option<String>,
    pub stripe_token: Option<String>,
    pub payment_method: Option<String>,
    pub amount_paid: Option<Decimal>,
    #[serde(default)]
    pub gateway_response: Option<Value>,
}

#[derive(Debug, serde::Serialize)]
pub struct InitiateOutcome {
    pub checkout: Checkout,
    pub payment: Payment,
    pub client_payload: Value,
}

#[derive(Debug, serde::Serialize)]
pub struct CompleteOutcome {
    pub order: Order,
    pub tickets: Vec<Ticket>,
    pub payment: Payment,
}

/// Returns the user's open cart, creating it on first use.
pub async fn get_or_create_cart(pool: &PgPool, user_id: Uuid) -> Result<Cart, AppError> {
    let cart = sqlx::query_as::<_, Cart>(
        r#"
        INSERT INTO carts (user_id) VALUES ($1)
        ON CONFLICT (user_id) DO UPDATE SET updated_at = now()
        RETURNING *
        "#,
    )
    .bind(user_id)
    .fetch_one(pool)
    .await?;
    Ok(cart)
}

/// Adds a line to the cart after checking the event is on sale. No
/// inventory is held at this point; holds happen at `initiate`.
pub async fn add_item(
    pool: &PgPool,
    user_id: Uuid,
    req: AddItemRequest,
) -> Result<CartItem, AppError> {
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

    let now = Utc::now();
    let event = fetch_event(pool, req.event_id).await?;
    if !event.sales_open_at(now) {
        return Err(AppError::ValidationError(
            "Ticket sales are not open for this event".to_string(),
        ));
    }
    if let Some(tier_id) = req.tier_id {
        let tier = fetch_tier(pool, tier_id).await?;
        if tier.event_id != event.id {
            return Err(AppError::ValidationError(
                "Pricing tier does not belong to this event".to_string(),
            ));
        }
        if !tier.window_open_at(now) {
            return Err(AppError::ValidationError(
                "Ticket sales are not open for this tier".to_string(),
            ));
        }
    }
    if let Some(session_id) = req.session_id {
        let session = fetch_session(pool, session_id).await?;
        if session.event_id != event.id {
            return Err(AppError::ValidationError(
                "Session does not belong to this event".to_string(),
            ));
        }
    }
    if let Some(seat_ids) = &req.seat_ids {
        crate::engine::inventory::verify_seats(pool, &event, seat_ids).await?;
    }

    let cart = get_or_create_cart(pool, user_id).await?;
    let item = sqlx::query_as::<_, CartItem>(
        r#"
        INSERT INTO cart_items
            (cart_id, event_id, tier_id, session_id, quantity, seat_ids, ticket_format, credential_format)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING *
        "#,
    )
    .bind(cart.id)
    .bind(req.event_id)
    .bind(req.tier_id)
    .bind(req.session_id)
    .bind(req.quantity)
    .bind(&req.seat_ids)
    .bind(req.ticket_format.unwrap_or(TicketFormat::Digital))
    .bind(req.credential_format.unwrap_or_default())
    .fetch_one(pool)
    .await?;

    Ok(item)
}

pub async fn cart_items(pool: &PgPool, cart_id: Uuid) -> Result<Vec<CartItem>, AppError> {
    let items = sqlx::query_as::<_, CartItem>(
        "SELECT * FROM cart_items WHERE cart_id = $1 ORDER BY created_at, id",
    )
    .bind(cart_id)
    .fetch_all(pool)
    .await?;
    Ok(items)
}

pub async fn clear_cart(pool: &PgPool, user_id: Uuid) -> Result<u64, AppError> {
    let result = sqlx::query(
        "DELETE FROM cart_items WHERE cart_id IN (SELECT id FROM carts WHERE user_id = $1)",
    )
    .bind(user_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Opens a checkout from the user's cart: prices every line, rejects mixed
/// currencies, holds inventory, writes the checkout snapshot and a pending
/// payment, then asks the gateway for an intent. A gateway failure after
/// the holds releases everything before surfacing.
pub async fn initiate(
    pool: &PgPool,
    gateways: &GatewayRegistry,
    user_id: Uuid,
    req: InitiateRequest,
) -> Result<InitiateOutcome, AppError> {
    let now = Utc::now();
    let cart = get_or_create_cart(pool, user_id).await?;
    let items = cart_items(pool, cart.id).await?;
    if items.is_empty() {
        return Err(AppError::ValidationError("Cart is empty".to_string()));
    }

    // Price every line; a single currency across the whole cart is required.
    let mut priced: Vec<(CartItem, Event, PricedLine)> = Vec::with_capacity(items.len());
    let mut currency: Option<Currency> = None;
    for item in items {
        let event = fetch_event(pool, item.event_id).await?;
        if !event.sales_open_at(now) {
            return Err(AppError::ValidationError(format!(
                "Ticket sales are not open for '{}'",
                event.title
            )));
        }
        let tier = match item.tier_id {
            Some(id) => Some(fetch_tier(pool, id).await?),
            None => None,
        };
        let session = match item.session_id {
            Some(id) => Some(fetch_session(pool, id).await?),
            None => None,
        };
        let line = pricing::resolve(&event, tier.as_ref(), session.as_ref(), item.quantity, None)?;
        match &currency {
            None => currency = Some(line.total.currency.clone()),
            Some(c) if *c != line.total.currency => {
                return Err(AppError::ValidationErrors(vec![FieldError::new(
                    "currency",
                    "cart mixes currencies; check out separately per currency",
                )]));
            }
            _ => {}
        }
        priced.push((item, event, line));
    }
    let currency = currency.ok_or_else(|| {
        AppError::InternalServerError("Priced cart has no currency".to_string())
    })?;

    let mut total = Money::zero(currency.clone());
    for (_, _, line) in &priced {
        total = total.checked_add(&line.total)?;
    }

    // Transaction one: hold inventory and write the checkout snapshot.
    // Locks are taken tier-first inside each hold, never during a gateway
    // call. Lines are sorted so concurrent multi-tier holds acquire tier
    // locks in one global order.
    priced.sort_by_key(|(item, _, _)| (item.tier_id, item.session_id));
    let mut tx = pool.begin().await?;
    let expires_at = now + Duration::minutes(CHECKOUT_TTL_MINUTES);
    let mut reservation_ids = Vec::with_capacity(priced.len());
    let mut lines = Vec::with_capacity(priced.len());
    for (item, _event, line) in &priced {
        let hold = reservations::HoldLine {
            event_id: item.event_id,
            tier_id: item.tier_id,
            session_id: item.session_id,
            quantity: item.quantity,
            seat_ids: item.seat_ids.clone(),
        };
        let reservation_id =
            reservations::hold_line(&mut tx, user_id, &hold, expires_at).await?;
        reservation_ids.push(reservation_id);
        lines.push(CheckoutLine {
            event_id: item.event_id,
            tier_id: item.tier_id,
            session_id: item.session_id,
            quantity: item.quantity,
            seat_ids: item.seat_ids.clone(),
            ticket_format: item.ticket_format,
            credential_format: item.credential_format,
            unit_price: line.unit_price.amount,
            service_fee: line.service_fee.amount,
        });
    }

    let checkout = sqlx::query_as::<_, Checkout>(
        r#"
        INSERT INTO checkouts
            (user_id, cart_id, total_amount, currency, payment_method,
             billing_info, lines, reservation_ids, expires_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING *
        "#,
    )
    .bind(user_id)
    .bind(cart.id)
    .bind(total.amount)
    .bind(currency.as_str())
    .bind(&req.payment_method)
    .bind(&req.billing_info)
    .bind(serde_json::to_value(&lines).map_err(|e| {
        AppError::InternalServerError(format!("Failed to encode checkout lines: {}", e))
    })?)
    .bind(&reservation_ids)
    .bind(expires_at)
    .fetch_one(&mut *tx)
    .await?;

    let gateway_kind = PaymentGatewayKind::for_method(&req.payment_method);
    let payment = insert_pending_payment(
        &mut tx,
        user_id,
        checkout.id,
        gateway_kind,
        &req.payment_method,
        &total,
    )
    .await?;
    tx.commit().await?;

    // Gateway intent, outside any transaction, with retry on transient
    // failures. If it still fails the holds are released right away.
    let adapter = gateways.get(gateway_kind)?;
    let intent = match gateway::create_intent_with_retry(
        adapter.as_ref(),
        &total,
        &payment.reference_number,
        user_id,
    )
    .await
    {
        Ok(intent) => intent,
        Err(e) => {
            if let Err(release_err) = abandon_checkout(pool, checkout.id).await {
                warn!(
                    checkout_id = %checkout.id,
                    error = ?release_err,
                    "Failed to release holds after gateway intent failure"
                );
            }
            return Err(e.into());
        }
    };
    let payment = attach_intent(pool, payment.id, &intent).await?;

    audit::record(
        pool,
        AuditEntry::new("CHECKOUT_INITIATED", "checkout", checkout.id.to_string())
            .actor(user_id)
            .after(json!({
                "total_amount": checkout.total_amount,
                "currency": checkout.currency,
                "payment_method": checkout.payment_method,
                "reservations": reservation_ids.len(),
            })),
    )
    .await;

    info!(checkout_id = %checkout.id, user_id = %user_id, total = %total, "Checkout initiated");
    Ok(InitiateOutcome {
        client_payload: intent.client_payload,
        checkout,
        payment,
    })
}

/// Completes a checkout. Phase one verifies the payment with the gateway;
/// phase two applies the outcome in a single conditional transaction that
/// locks the checkout row, confirms the holds, issues tickets and opens the
/// order. If phase two aborts after a successful verification the charge is
/// reconciled with a refund.
pub async fn complete(
    pool: &PgPool,
    gateways: &GatewayRegistry,
    user_id: Uuid,
    req: CompleteRequest,
) -> Result<CompleteOutcome, AppError> {
    let now = Utc::now();
    let checkout = fetch_checkout(pool, req.checkout_id).await?;
    if checkout.user_id != user_id {
        return Err(AppError::Forbidden(
            "Checkout belongs to another user".to_string(),
        ));
    }
    match checkout.status {
        CheckoutStatus::Pending => {}
        status => {
            return Err(AppError::ConflictingState(format!(
                "Checkout is already {:?}",
                status
            )))
        }
    }
    if checkout.is_expired(now) {
        abandon_checkout(pool, checkout.id).await?;
        return Err(AppError::Expired("Checkout has expired".to_string()));
    }

    let payment = fetch_checkout_payment(pool, checkout.id).await?;
    let gateway_kind = payment.gateway;
    let adapter = gateways.get(gateway_kind)?;

    // Phase one: verify with the gateway, no locks held. A failure here
    // leaves the payment pending; it is never retried into a success.
    let mut client = req.gateway_response.clone().unwrap_or_else(|| json!({}));
    if client.is_object() {
        if let Some(intent_id) = &req.payment_intent_id {
            client["payment_intent_id"] = json!(intent_id);
        }
        if let Some(token) = &req.stripe_token {
            client["stripe_token"] = json!(token);
        }
    }
    let verification_payload = build_verification_payload(Some(&client), &payment);
    let verification = adapter
        .verify(&payment.reference_number, &verification_payload)
        .await
        .map_err(AppError::from)?;

    let currency = Currency::new(&checkout.currency)?;
    let total = Money::new(checkout.total_amount, currency.clone())?;
    let amount_paid = match req.amount_paid {
        Some(amount) => Money::new(amount, currency.clone())?.clamp_to(&total)?,
        None => total.clone(),
    };
    if amount_paid.is_zero() {
        return Err(AppError::ValidationError(
            "Paid amount must be greater than zero".to_string(),
        ));
    }

    // Phase two: conditional apply.
    let outcome = apply_completion(pool, &checkout, &payment, &verification, &amount_paid, &total)
        .await;

    match outcome {
        Ok(outcome) => {
            let action = if outcome.order.status == OrderStatus::Confirmed {
                "ORDER_CONFIRMED"
            } else {
                "ORDER_PARTIALLY_PAID"
            };
            audit::record(
                pool,
                AuditEntry::new(action, "order", outcome.order.id.to_string())
                    .actor(user_id)
                    .before(json!({"checkout_id": checkout.id}))
                    .after(json!({
                        "total_amount": outcome.order.total_amount,
                        "amount_paid": outcome.order.amount_paid,
                        "balance_due": outcome.order.balance_due,
                        "tickets": outcome.tickets.len(),
                    })),
            )
            .await;
            info!(
                order_id = %outcome.order.id,
                status = ?outcome.order.status,
                "Checkout completed"
            );
            Ok(outcome)
        }
        Err(e) => {
            // The money moved but the state did not. Hand the charge to the
            // reconciler: refund what was captured.
            warn!(
                checkout_id = %checkout.id,
                transaction_id = %verification.transaction_id,
                error = ?e,
                "Completion aborted after verified payment; refunding"
            );
            if let Err(refund_err) = adapter
                .refund(&verification.transaction_id, &amount_paid)
                .await
            {
                audit::record(
                    pool,
                    AuditEntry::new("PAYMENT_RECONCILE_FAILED", "payment", payment.id.to_string())
                        .metadata(json!({
                            "transaction_id": verification.transaction_id,
                            "error": refund_err.to_string(),
                        }))
                        .suspicious(),
                )
                .await;
            }
            Err(e)
        }
    }
}

/// Cancels a pending checkout: releases every hold and fails the pending
/// payment.
pub async fn cancel(pool: &PgPool, user_id: Uuid, checkout_id: Uuid) -> Result<Checkout, AppError> {
    let mut tx = pool.begin().await?;
    let checkout = lock_checkout(&mut tx, checkout_id).await?;
    if checkout.user_id != user_id {
        return Err(AppError::Forbidden(
            "Checkout belongs to another user".to_string(),
        ));
    }
    if checkout.status != CheckoutStatus::Pending {
        return Err(AppError::ConflictingState(format!(
            "Checkout is already {:?}",
            checkout.status
        )));
    }

    for reservation_id in &checkout.reservation_ids {
        reservations::release(&mut tx, *reservation_id).await?;
    }
    let checkout = sqlx::query_as::<_, Checkout>(
        "UPDATE checkouts SET status = 'cancelled' WHERE id = $1 RETURNING *",
    )
    .bind(checkout_id)
    .fetch_one(&mut *tx)
    .await?;
    sqlx::query(
        "UPDATE payments SET status = 'failed', updated_at = now()
         WHERE checkout_id = $1 AND status = 'pending'",
    )
    .bind(checkout_id)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    audit::record(
        pool,
        AuditEntry::new("CHECKOUT_CANCELLED", "checkout", checkout_id.to_string())
            .actor(user_id),
    )
    .await;
    Ok(checkout)
}

pub async fn get(pool: &PgPool, user_id: Uuid, checkout_id: Uuid) -> Result<Checkout, AppError> {
    let checkout = fetch_checkout(pool, checkout_id).await?;
    if checkout.user_id != user_id {
        return Err(AppError::Forbidden(
            "Checkout belongs to another user".to_string(),
        ));
    }
    Ok(checkout)
}

/// Marks an expired or unfinishable pending checkout `expired` and gives
/// its holds back. Reservations released earlier by the sweeper are left
/// alone; `release` is idempotent.
async fn abandon_checkout(pool: &PgPool, checkout_id: Uuid) -> Result<(), AppError> {
    let mut tx = pool.begin().await?;
    let checkout = lock_checkout(&mut tx, checkout_id).await?;
    if checkout.status != CheckoutStatus::Pending {
        tx.rollback().await?;
        return Ok(());
    }
    for reservation_id in &checkout.reservation_ids {
        reservations::release(&mut tx, *reservation_id).await?;
    }
    sqlx::query("UPDATE checkouts SET status = 'expired' WHERE id = $1")
        .bind(checkout_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query(
        "UPDATE payments SET status = 'failed', updated_at = now()
         WHERE checkout_id = $1 AND status = 'pending'",
    )
    .bind(checkout_id)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;
    Ok(())
}

async fn apply_completion(
    pool: &PgPool,
    checkout: &Checkout,
    payment: &Payment,
    verification: &gateway::Verification,
    amount_paid: &Money,
    total: &Money,
) -> Result<CompleteOutcome, AppError> {
    let now = Utc::now();
    let lines = checkout.parsed_lines().map_err(|e| {
        AppError::InternalServerError(format!("Corrupt checkout snapshot: {}", e))
    })?;

    let mut tx = pool.begin().await?;
    let locked = lock_checkout(&mut tx, checkout.id).await?;
    if locked.status != CheckoutStatus::Pending {
        return Err(AppError::ConflictingState(format!(
            "Checkout is already {:?}",
            locked.status
        )));
    }
    if locked.is_expired(now) {
        return Err(AppError::Expired("Checkout has expired".to_string()));
    }

    let balance_due = total.checked_sub(amount_paid)?;
    let fully_paid = balance_due.is_zero();
    let order_status = if fully_paid {
        OrderStatus::Confirmed
    } else {
        OrderStatus::PartiallyPaid
    };
    let ticket_status = if fully_paid {
        TicketStatus::Confirmed
    } else {
        TicketStatus::Reserved
    };

    let order = sqlx::query_as::<_, Order>(
        r#"
        INSERT INTO orders
            (user_id, checkout_id, total_amount, amount_paid, balance_due,
             currency, status, billing_info, reservation_ids)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING *
        "#,
    )
    .bind(checkout.user_id)
    .bind(checkout.id)
    .bind(total.amount)
    .bind(amount_paid.amount)
    .bind(balance_due.amount)
    .bind(checkout.currency.trim())
    .bind(order_status)
    .bind(&checkout.billing_info)
    .bind(&locked.reservation_ids)
    .fetch_one(&mut *tx)
    .await?;

    // Consume each hold and mint the tickets that replace it.
    let mut tickets = Vec::new();
    let mut line_no = 0i32;
    for (line, reservation_id) in lines.iter().zip(locked.reservation_ids.iter()) {
        reservations::confirm(&mut tx, *reservation_id, Some(payment.id), checkout.user_id, now)
            .await?;

        let event = fetch_event_on(&mut tx, line.event_id).await?;
        let currency = Currency::new(&event.currency)?;
        let priced = PricedLine {
            unit_price: Money::new(line.unit_price, currency.clone())?,
            service_fee: Money::new(line.service_fee, currency.clone())?,
            gateway_fee: Money::zero(currency.clone()),
            total: Money::zero(currency),
            quantity: line.quantity,
        };
        let issue = IssueLine {
            event: &event,
            tier_id: line.tier_id,
            session_id: line.session_id,
            seat_ids: line.seat_ids.as_deref(),
            ticket_format: line.ticket_format,
            credential_format: line.credential_format,
            priced: &priced,
        };
        let mut minted =
            issuer::issue(&mut tx, order.id, checkout.user_id, line_no, &issue, ticket_status)
                .await?;
        line_no += line.quantity;
        tickets.append(&mut minted);
    }

    // The cart is spent.
    if let Some(cart_id) = locked.cart_id {
        sqlx::query("DELETE FROM cart_items WHERE cart_id = $1")
            .bind(cart_id)
            .execute(&mut *tx)
            .await?;
    }

    sqlx::query("UPDATE checkouts SET status = 'completed', completed_at = now() WHERE id = $1")
        .bind(checkout.id)
        .execute(&mut *tx)
        .await?;

    let payment = sqlx::query_as::<_, Payment>(
        r#"
        UPDATE payments
        SET status = 'completed', order_id = $2, amount = $3,
            gateway_transaction_id = $4, gateway_response = $5, updated_at = now()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(payment.id)
    .bind(order.id)
    .bind(amount_paid.amount)
    .bind(&verification.transaction_id)
    .bind(&verification.raw_response)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(CompleteOutcome {
        order,
        tickets,
        payment,
    })
}

/// Keys that grant settlement authority; stamped server-side only, and
/// stripped from anything the client sent.
const RESERVED_VERIFICATION_KEYS: [&str; 3] =
    ["operator_confirmed", "expected_amount", "expected_currency"];

/// Assembles the payload handed to `PaymentGateway::verify`. The client's
/// material is the base, but the intent material captured at initiation and
/// the payment's amount overwrite it: a forged intent id, poll URL or
/// amount never reaches the adapter.
pub(crate) fn build_verification_payload(client: Option<&Value>, payment: &Payment) -> Value {
    let mut payload = match client {
        Some(v) if v.is_object() => v.clone(),
        Some(v) => json!({ "raw": v }),
        None => json!({}),
    };
    if let Some(map) = payload.as_object_mut() {
        for key in RESERVED_VERIFICATION_KEYS {
            map.remove(key);
        }
    }
    if let Some(metadata) = payment.metadata.as_object() {
        if let Some(intent) = metadata.get("intent_payload").and_then(Value::as_object) {
            for (k, v) in intent {
                payload[k.as_str()] = v.clone();
            }
        }
        if let Some(intent_id) = metadata.get("intent_id") {
            payload["payment_intent_id"] = intent_id.clone();
        }
        // Offline settlements carry the operator's confirmation here; it is
        // written by `confirm_offline_payment`, never by the buyer.
        if let Some(confirmed) = metadata.get("operator_confirmed") {
            payload["operator_confirmed"] = confirmed.clone();
        }
    }
    payload["expected_amount"] = json!(payment.amount.to_string());
    payload["expected_currency"] = json!(payment.currency.trim());
    payload
}

/// Records an operator's acknowledgement that an offline payment arrived.
/// The flag lands in the payment's server-held metadata, where the offline
/// adapter looks for it at verification time. Routed through the
/// proxy-gated admin surface like refund approvals.
pub async fn confirm_offline_payment(
    pool: &PgPool,
    operator_id: Uuid,
    checkout_id: Uuid,
) -> Result<Payment, AppError> {
    let checkout = fetch_checkout(pool, checkout_id).await?;
    if checkout.status != CheckoutStatus::Pending {
        return Err(AppError::ConflictingState(format!(
            "Checkout is already {:?}",
            checkout.status
        )));
    }
    let payment = fetch_checkout_payment(pool, checkout.id).await?;
    if payment.gateway != PaymentGatewayKind::Offline {
        return Err(AppError::ConflictingState(
            "Payment is not settled offline".to_string(),
        ));
    }

    let payment = sqlx::query_as::<_, Payment>(
        r#"
        UPDATE payments
        SET metadata = metadata || $2, updated_at = now()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(payment.id)
    .bind(json!({ "operator_confirmed": true, "confirmed_by": operator_id }))
    .fetch_one(pool)
    .await?;

    audit::record(
        pool,
        AuditEntry::new("OFFLINE_PAYMENT_CONFIRMED", "payment", payment.id.to_string())
            .actor(operator_id)
            .metadata(json!({ "checkout_id": checkout_id })),
    )
    .await;
    info!(payment_id = %payment.id, checkout_id = %checkout_id, "Offline payment confirmed");
    Ok(payment)
}

async fn insert_pending_payment(
    conn: &mut PgConnection,
    user_id: Uuid,
    checkout_id: Uuid,
    gateway: PaymentGatewayKind,
    method: &str,
    amount: &Money,
) -> Result<Payment, AppError> {
    let payment = sqlx::query_as::<_, Payment>(
        r#"
        INSERT INTO payments
            (user_id, checkout_id, gateway, method, reference_number, amount, currency)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING *
        "#,
    )
    .bind(user_id)
    .bind(checkout_id)
    .bind(gateway)
    .bind(method)
    .bind(ids::payment_reference())
    .bind(amount.amount)
    .bind(amount.currency.as_str())
    .fetch_one(conn)
    .await?;
    Ok(payment)
}

pub(crate) async fn attach_intent(
    pool: &PgPool,
    payment_id: Uuid,
    intent: &PaymentIntent,
) -> Result<Payment, AppError> {
    let payment = sqlx::query_as::<_, Payment>(
        r#"
        UPDATE payments
        SET metadata = metadata || $2, updated_at = now()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(payment_id)
    .bind(json!({
        "intent_id": intent.intent_id,
        "intent_payload": intent.client_payload,
    }))
    .fetch_one(pool)
    .await?;
    Ok(payment)
}

async fn fetch_checkout(pool: &PgPool, checkout_id: Uuid) -> Result<Checkout, AppError> {
    sqlx::query_as::<_, Checkout>("SELECT * FROM checkouts WHERE id = $1")
        .bind(checkout_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Checkout not found".to_string()))
}

async fn lock_checkout(conn: &mut PgConnection, checkout_id: Uuid) -> Result<Checkout, AppError> {
    sqlx::query_as::<_, Checkout>("SELECT * FROM checkouts WHERE id = $1 FOR UPDATE")
        .bind(checkout_id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| AppError::NotFound("Checkout not found".to_string()))
}

async fn fetch_checkout_payment(pool: &PgPool, checkout_id: Uuid) -> Result<Payment, AppError> {
    let payment = sqlx::query_as::<_, Payment>(
        r#"
        SELECT * FROM payments
        WHERE checkout_id = $1 AND status = 'pending'
        ORDER BY created_at DESC
        LIMIT 1
        "#,
    )
    .bind(checkout_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound("No pending payment for checkout".to_string()))?;
    if payment.status != PaymentStatus::Pending {
        return Err(AppError::ConflictingState(
            "Payment is no longer pending".to_string(),
        ));
    }
    Ok(payment)
}

pub(crate) async fn fetch_event(pool: &PgPool, event_id: Uuid) -> Result<Event, AppError> {
    sqlx::query_as::<_, Event>("SELECT * FROM events WHERE id = $1 AND deleted_at IS NULL")
        .bind(event_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Event not found".to_string()))
}

pub(crate) async fn fetch_event_on(
    conn: &mut PgConnection,
    event_id: Uuid,
) -> Result<Event, AppError> {
    sqlx::query_as::<_, Event>("SELECT * FROM events WHERE id = $1 AND deleted_at IS NULL")
        .bind(event_id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| AppError::NotFound("Event not found".to_string()))
}

pub(crate) async fn fetch_tier(pool: &PgPool, tier_id: Uuid) -> Result<PricingTier, AppError> {
    sqlx::query_as::<_, PricingTier>("SELECT * FROM pricing_tiers WHERE id = $1")
        .bind(tier_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Pricing tier not found".to_string()))
}

pub(crate) async fn fetch_session(pool: &PgPool, session_id: Uuid) -> Result<Session, AppError> {
    sqlx::query_as::<_, Session>("SELECT * FROM sessions WHERE id = $1")
        .bind(session_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Session not found".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::payment::PaymentStatus;
    use rust_decimal::Decimal;

    fn pending_payment(metadata: Value) -> Payment {
        Payment {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            order_id: None,
            gateway: PaymentGatewayKind::Stripe,
            method: "card".to_string(),
            reference_number: "PAY-1712345678901-a3f2c1".to_string(),
            amount: Decimal::from_str_exact("220.00").unwrap(),
            currency: "USD".to_string(),
            status: PaymentStatus::Pending,
            gateway_transaction_id: None,
            gateway_response: None,
            refunded_amount: Decimal::ZERO,
            metadata,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_stored_intent_material_overrides_client_keys() {
        let payment = pending_payment(json!({
            "intent_id": "pi_real",
            "intent_payload": {
                "payment_intent_id": "pi_real",
                "poll_url": "https://gateway.example/poll/1",
            },
        }));
        let client = json!({
            "payment_intent_id": "pi_forged",
            "poll_url": "https://attacker.example/paid",
        });

        let payload = build_verification_payload(Some(&client), &payment);
        assert_eq!(payload["payment_intent_id"], "pi_real");
        assert_eq!(payload["poll_url"], "https://gateway.example/poll/1");
    }

    #[test]
    fn test_client_cannot_grant_operator_confirmation() {
        let payment = pending_payment(json!({}));
        let client = json!({ "operator_confirmed": true, "expected_amount": "0.01" });

        let payload = build_verification_payload(Some(&client), &payment);
        assert!(payload.get("operator_confirmed").is_none());
        assert_eq!(payload["expected_amount"], "220.00");
        assert_eq!(payload["expected_currency"], "USD");
    }

    #[test]
    fn test_operator_confirmation_comes_from_payment_metadata() {
        let payment = pending_payment(json!({ "operator_confirmed": true }));
        let payload = build_verification_payload(None, &payment);
        assert_eq!(payload["operator_confirmed"], true);
    }

    #[test]
    fn test_expected_amount_is_always_stamped() {
        let payment = pending_payment(json!({}));
        let payload = build_verification_payload(None, &payment);
        assert_eq!(payload["expected_amount"], "220.00");
        assert_eq!(payload["expected_currency"], "USD");
    }
}
