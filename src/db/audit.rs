use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::NewAuditEvent;
use crate::models::AuditEvent;

pub async fn log_event(
    pool: &PgPool,
    id: Uuid,
    event: &NewAuditEvent,
    now: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO audit_events
            (id, tenant_id, user_id, action, resource_type, resource_id, details, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
    )
    .bind(id)
    .bind(event.tenant_id)
    .bind(event.user_id)
    .bind(&event.action)
    .bind(&event.resource_type)
    .bind(event.resource_id)
    .bind(&event.details)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn list(
    pool: &PgPool,
    tenant_id: Uuid,
    limit: i64,
    offset: i64,
) -> Result<Vec<AuditEvent>, sqlx::Error> {
    sqlx::query_as::<_, AuditEvent>(
        "SELECT * FROM audit_events WHERE tenant_id = $1
         ORDER BY created_at DESC LIMIT $2 OFFSET $3",
    )
    .bind(tenant_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
}
