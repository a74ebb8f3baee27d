use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use uuid::Uuid;

use super::AppState;
use crate::engine::{checkout, inventory};
use crate::models::venue::{Section, Venue};
use crate::utils::error::AppError;
use crate::utils::response::success;

/// Live availability for an event: tier and session counters, plus the
/// venue and its sections for seat pickers. Unlocked reads, display only.
pub async fn availability(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let event = checkout::fetch_event(&state.pool, event_id).await?;
    let snapshot = inventory::snapshot(&state.pool, event.id).await?;

    let venue = match event.venue_id {
        Some(venue_id) => sqlx::query_as::<_, Venue>("SELECT * FROM venues WHERE id = $1")
            .bind(venue_id)
            .fetch_optional(&state.pool)
            .await?,
        None => None,
    };
    let sections = match &venue {
        Some(venue) => {
            sqlx::query_as::<_, Section>(
                "SELECT * FROM sections WHERE venue_id = $1 ORDER BY name",
            )
            .bind(venue.id)
            .fetch_all(&state.pool)
            .await?
        }
        None => Vec::new(),
    };

    Ok(success(
        json!({
            "event_id": event.id,
            "tiers": snapshot.tiers,
            "sessions": snapshot.sessions,
            "venue": venue,
            "sections": sections,
        }),
        "Availability retrieved",
    )
    .into_response())
}
