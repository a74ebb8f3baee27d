//! Background maintenance loops: expired reservation holds go back to the
//! ledger and lapsed transfer offers close. Each loop runs on its own tokio
//! task; a failed pass is logged and retried on the next tick.

use chrono::Utc;
use sqlx::PgPool;
use std::time::Duration;
use tracing::error;

use crate::engine::{reservations, transfers};

/// Sweep cadence. Holds are only over-held by at most one interval.
pub const SWEEP_INTERVAL_SECS: u64 = 60;

/// Spawns both sweep loops. The returned handles are detached; the loops
/// live for the life of the process.
pub fn spawn(pool: PgPool) {
    let reservation_pool = pool.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(SWEEP_INTERVAL_SECS));
        loop {
            tick.tick().await;
            if let Err(err) = reservations::sweep(&reservation_pool, Utc::now()).await {
                error!(error = %err, "Reservation sweep failed");
            }
        }
    });

    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(SWEEP_INTERVAL_SECS));
        loop {
            tick.tick().await;
            if let Err(err) = transfers::sweep(&pool, Utc::now()).await {
                error!(error = %err, "Transfer sweep failed");
            }
        }
    });
}
