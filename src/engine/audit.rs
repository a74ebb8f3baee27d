//! Append-only audit trail. Every state transition in the engine lands here,
//! keyed by actor and resource. Writing an entry must never fail the business
//! transaction: failures are logged and swallowed.

use serde_json::Value;
use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;

use crate::models::audit::AuditLog;
use crate::utils::error::AppError;

const TRAIL_MAX_ROWS: i64 = 200;

/// A single trail entry, built by the engine at each transition.
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub actor_id: Option<Uuid>,
    pub action: &'static str,
    pub resource_kind: &'static str,
    pub resource_id: String,
    pub before: Option<Value>,
    pub after: Option<Value>,
    pub metadata: Option<Value>,
    pub suspicious: bool,
}

impl AuditEntry {
    pub fn new(action: &'static str, resource_kind: &'static str, resource_id: String) -> Self {
        Self {
            actor_id: None,
            action,
            resource_kind,
            resource_id,
            before: None,
            after: None,
            metadata: None,
            suspicious: false,
        }
    }

    pub fn actor(mut self, actor_id: Uuid) -> Self {
        self.actor_id = Some(actor_id);
        self
    }

    pub fn before(mut self, before: Value) -> Self {
        self.before = Some(before);
        self
    }

    pub fn after(mut self, after: Value) -> Self {
        self.after = Some(after);
        self
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn suspicious(mut self) -> Self {
        self.suspicious = true;
        self
    }
}

/// Records an entry after the owning transaction has committed. Errors are
/// demoted to warnings.
pub async fn record(pool: &PgPool, entry: AuditEntry) {
    let result = sqlx::query(
        r#"
        INSERT INTO audit_logs
            (actor_id, action, resource_kind, resource_id, before, after, metadata, suspicious)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(entry.actor_id)
    .bind(entry.action)
    .bind(entry.resource_kind)
    .bind(&entry.resource_id)
    .bind(&entry.before)
    .bind(&entry.after)
    .bind(&entry.metadata)
    .bind(entry.suspicious)
    .execute(pool)
    .await;

    if let Err(e) = result {
        warn!(
            error = ?e,
            action = entry.action,
            resource_kind = entry.resource_kind,
            resource_id = %entry.resource_id,
            "Failed to write audit entry"
        );
    }
}

/// The most recent trail entries for one resource, newest first.
pub async fn trail(
    pool: &PgPool,
    resource_kind: &str,
    resource_id: &str,
    limit: Option<i64>,
) -> Result<Vec<AuditLog>, AppError> {
    let limit = limit.unwrap_or(50).clamp(1, TRAIL_MAX_ROWS);
    let rows = sqlx::query_as::<_, AuditLog>(
        r#"
        SELECT * FROM audit_logs
        WHERE resource_kind = $1 AND resource_id = $2
        ORDER BY id DESC
        LIMIT $3
        "#,
    )
    .bind(resource_kind)
    .bind(resource_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let e = AuditEntry::new("ORDER_CONFIRMED", "order", "abc".to_string());
        assert!(e.actor_id.is_none());
        assert!(e.before.is_none());
        assert!(!e.suspicious);
    }

    #[test]
    fn test_builder_chains() {
        let actor = Uuid::new_v4();
        let e = AuditEntry::new("TICKET_VALIDATED", "ticket", "t1".to_string())
            .actor(actor)
            .metadata(serde_json::json!({"method": "qr_code"}))
            .suspicious();
        assert_eq!(e.actor_id, Some(actor));
        assert!(e.suspicious);
        assert_eq!(e.metadata.unwrap()["method"], "qr_code");
    }
}
