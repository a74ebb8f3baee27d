//! Ticket issuer: mints one ticket row per purchased unit, with a unique
//! ticket number and the credential payloads for its format. Issuance is
//! idempotent per (order, line index) so a retried confirmation never
//! produces duplicates.

use chrono::Utc;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::engine::credentials;
use crate::engine::ids;
use crate::engine::pricing::PricedLine;
use crate::models::event::Event;
use crate::models::ticket::{CredentialFormat, Ticket, TicketFormat, TicketStatus};
use crate::utils::error::AppError;

/// Ticket-number collisions are astronomically rare but retried anyway.
const NUMBER_ATTEMPTS: u32 = 3;

/// Everything needed to mint the tickets of one order line.
pub struct IssueLine<'a> {
    pub event: &'a Event,
    pub tier_id: Option<Uuid>,
    pub session_id: Option<Uuid>,
    pub seat_ids: Option<&'a [Uuid]>,
    pub ticket_format: TicketFormat,
    pub credential_format: CredentialFormat,
    pub priced: &'a PricedLine,
}

/// Mints `priced.quantity` tickets for the line, numbering them from
/// `line_no_start`. Lines already issued under the same (order, line_no)
/// key are returned as-is. Must run inside an open transaction; each insert
/// attempt sits under a savepoint so a ticket-number collision can be
/// retried without aborting the caller's transaction.
pub async fn issue(
    conn: &mut PgConnection,
    order_id: Uuid,
    user_id: Uuid,
    line_no_start: i32,
    line: &IssueLine<'_>,
    status: TicketStatus,
) -> Result<Vec<Ticket>, AppError> {
    let mut tickets = Vec::with_capacity(line.priced.quantity as usize);
    for unit in 0..line.priced.quantity {
        let line_no = line_no_start + unit;
        let seat_id = line
            .seat_ids
            .and_then(|seats| seats.get(unit as usize).copied());
        let ticket = issue_unit(conn, order_id, user_id, line_no, seat_id, line, status).await?;
        tickets.push(ticket);
    }
    Ok(tickets)
}

async fn issue_unit(
    conn: &mut PgConnection,
    order_id: Uuid,
    user_id: Uuid,
    line_no: i32,
    seat_id: Option<Uuid>,
    line: &IssueLine<'_>,
    status: TicketStatus,
) -> Result<Ticket, AppError> {
    // Idempotency: a retry that lost the race finds the earlier row.
    if let Some(existing) = sqlx::query_as::<_, Ticket>(
        "SELECT * FROM tickets WHERE order_id = $1 AND line_no = $2",
    )
    .bind(order_id)
    .bind(line_no)
    .fetch_optional(&mut *conn)
    .await?
    {
        return Ok(existing);
    }

    let mut last_err: Option<sqlx::Error> = None;
    for _ in 0..NUMBER_ATTEMPTS {
        let now = Utc::now();
        let now_ms = now.timestamp_millis();
        let ticket_number = ids::ticket_number();

        let qr_data = credentials::qr_payload(
            &ticket_number,
            line.event.id,
            user_id,
            now_ms,
            &ids::credential_nonce(),
        );
        let nfc_data = match line.credential_format {
            CredentialFormat::Nfc => Some(credentials::nfc_payload(
                &ticket_number,
                line.event.id,
                user_id,
                now.timestamp(),
            )),
            _ => None,
        };
        let rfid_data = match line.credential_format {
            CredentialFormat::Rfid => Some(credentials::rfid_payload(
                &ticket_number,
                line.event.id,
                user_id,
                now_ms,
            )),
            _ => None,
        };
        let barcode_data = match line.credential_format {
            CredentialFormat::Barcode => {
                Some(credentials::barcode_payload(&ticket_number, now_ms))
            }
            _ => None,
        };
        let stream_access_token = line
            .event
            .is_streaming
            .then(ids::stream_access_token);

        sqlx::query("SAVEPOINT mint_ticket")
            .execute(&mut *conn)
            .await?;
        let inserted = sqlx::query_as::<_, Ticket>(
            r#"
            INSERT INTO tickets
                (ticket_number, event_id, session_id, tier_id, seat_id, order_id, line_no,
                 user_id, ticket_format, credential_format,
                 qr_data, nfc_data, rfid_data, barcode_data,
                 unit_price, service_fee, total_price, currency,
                 status, valid_until, stream_access_token)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                    $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21)
            ON CONFLICT (order_id, line_no) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(&ticket_number)
        .bind(line.event.id)
        .bind(line.session_id)
        .bind(line.tier_id)
        .bind(seat_id)
        .bind(order_id)
        .bind(line_no)
        .bind(user_id)
        .bind(line.ticket_format)
        .bind(line.credential_format)
        .bind(&qr_data)
        .bind(&nfc_data)
        .bind(&rfid_data)
        .bind(&barcode_data)
        .bind(line.priced.unit_price.amount)
        .bind(line.priced.service_fee.amount)
        .bind(
            line.priced.unit_price.amount + line.priced.service_fee.amount,
        )
        .bind(line.priced.unit_price.currency.as_str())
        .bind(status)
        .bind(line.event.end_time)
        .bind(stream_access_token)
        .fetch_optional(&mut *conn)
        .await;

        match inserted {
            // ON CONFLICT DO NOTHING returned no row: a concurrent retry
            // issued this line first.
            Ok(None) => {
                sqlx::query("RELEASE SAVEPOINT mint_ticket")
                    .execute(&mut *conn)
                    .await?;
                let existing = sqlx::query_as::<_, Ticket>(
                    "SELECT * FROM tickets WHERE order_id = $1 AND line_no = $2",
                )
                .bind(order_id)
                .bind(line_no)
                .fetch_one(&mut *conn)
                .await?;
                return Ok(existing);
            }
            Ok(Some(ticket)) => {
                sqlx::query("RELEASE SAVEPOINT mint_ticket")
                    .execute(&mut *conn)
                    .await?;
                return Ok(ticket);
            }
            Err(e) if is_ticket_number_collision(&e) => {
                // Unwinds the failed insert so the transaction stays live
                // for the next attempt.
                sqlx::query("ROLLBACK TO SAVEPOINT mint_ticket")
                    .execute(&mut *conn)
                    .await?;
                last_err = Some(e);
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(last_err
        .map(AppError::from)
        .unwrap_or_else(|| AppError::InternalServerError("Ticket numbering failed".to_string())))
}

fn is_ticket_number_collision(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db) => db
            .constraint()
            .map(|c| c.contains("ticket_number"))
            .unwrap_or(false),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_number_constraint_errors_count_as_collisions() {
        assert!(!is_ticket_number_collision(&sqlx::Error::RowNotFound));
        assert!(!is_ticket_number_collision(&sqlx::Error::PoolTimedOut));
    }
}
