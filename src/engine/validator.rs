//! Gate-side admission check. The conditional `confirmed -> used` update is
//! the single authority on admission: of two concurrent scans, exactly one
//! wins the row and the other is told the ticket is already used.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::engine::audit::{self, AuditEntry};
use crate::engine::credentials;
use crate::models::event::Event;
use crate::models::ticket::{Ticket, TicketStatus};
use crate::utils::error::AppError;

#[derive(Debug, Deserialize)]
pub struct ValidateRequest {
    pub qr_code_data: Option<String>,
    pub nfc_data: Option<String>,
    pub rfid_data: Option<String>,
    pub barcode_data: Option<String>,
    pub ticket_id: Option<Uuid>,
}

#[derive(Debug, serde::Serialize)]
pub struct ValidationOutcome {
    pub ticket: Ticket,
    pub method: &'static str,
}

/// Validates a presented credential and admits the holder at most once.
pub async fn validate(
    pool: &PgPool,
    req: ValidateRequest,
    now: DateTime<Utc>,
) -> Result<ValidationOutcome, AppError> {
    let (ticket, method) = lookup(pool, &req).await?;
    let event = fetch_event(pool, ticket.event_id).await?;

    if !event.has_started(now) {
        return Err(AppError::Expired(
            "Event has not started yet".to_string(),
        ));
    }
    if event.has_ended(now) {
        return Err(AppError::Expired("Event has ended".to_string()));
    }
    if let Some(valid_until) = ticket.valid_until {
        if now > valid_until {
            return Err(AppError::Expired("Ticket is no longer valid".to_string()));
        }
    }
    match ticket.status {
        TicketStatus::Confirmed => {}
        TicketStatus::Used => {
            return Err(AppError::ConflictingState(
                "Ticket has already been used".to_string(),
            ))
        }
        status => {
            return Err(AppError::ConflictingState(format!(
                "Ticket is {}",
                status.as_str()
            )))
        }
    }

    // At-most-once admission: the conditional update decides the race.
    let admitted = sqlx::query_as::<_, Ticket>(
        r#"
        UPDATE tickets
        SET status = 'used', updated_at = now()
        WHERE id = $1 AND status = 'confirmed'
        RETURNING *
        "#,
    )
    .bind(ticket.id)
    .fetch_optional(pool)
    .await?;

    let ticket = match admitted {
        Some(ticket) => ticket,
        None => {
            return Err(AppError::ConflictingState(
                "Ticket has already been used".to_string(),
            ))
        }
    };

    audit::record(
        pool,
        AuditEntry::new("TICKET_VALIDATED", "ticket", ticket.id.to_string())
            .metadata(json!({ "method": method, "event_id": ticket.event_id })),
    )
    .await;
    info!(ticket_id = %ticket.id, method, "Ticket admitted");
    Ok(ValidationOutcome { ticket, method })
}

async fn lookup(pool: &PgPool, req: &ValidateRequest) -> Result<(Ticket, &'static str), AppError> {
    if let Some(qr) = &req.qr_code_data {
        // A well-formed payload whose validation key does not check out is
        // a forgery attempt, worth flagging before the not-found reply.
        if !credentials::qr_payload_is_intact(qr) {
            audit::record(
                pool,
                AuditEntry::new("TICKET_VALIDATION_REJECTED", "ticket", "unknown".to_string())
                    .metadata(json!({ "method": "qr_code", "reason": "integrity" }))
                    .suspicious(),
            )
            .await;
            return Err(AppError::NotFound("Ticket not found".to_string()));
        }
        return Ok((find_by_column(pool, "qr_data", qr).await?, "qr_code"));
    }
    if let Some(nfc) = &req.nfc_data {
        return Ok((find_by_column(pool, "nfc_data", nfc).await?, "nfc"));
    }
    if let Some(rfid) = &req.rfid_data {
        return Ok((find_by_column(pool, "rfid_data", rfid).await?, "rfid"));
    }
    if let Some(barcode) = &req.barcode_data {
        return Ok((find_by_column(pool, "barcode_data", barcode).await?, "barcode"));
    }
    if let Some(ticket_id) = req.ticket_id {
        let ticket = sqlx::query_as::<_, Ticket>("SELECT * FROM tickets WHERE id = $1")
            .bind(ticket_id)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| AppError::NotFound("Ticket not found".to_string()))?;
        return Ok((ticket, "ticket_id"));
    }
    Err(AppError::ValidationError(
        "A credential or ticket id is required".to_string(),
    ))
}

async fn find_by_column(pool: &PgPool, column: &str, value: &str) -> Result<Ticket, AppError> {
    // `column` is one of our own fixed names, never caller input.
    let query = format!("SELECT * FROM tickets WHERE {} = $1", column);
    sqlx::query_as::<_, Ticket>(&query)
        .bind(value)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Ticket not found".to_string()))
}

async fn fetch_event(pool: &PgPool, event_id: Uuid) -> Result<Event, AppError> {
    sqlx::query_as::<_, Event>("SELECT * FROM events WHERE id = $1")
        .bind(event_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Event not found".to_string()))
}
