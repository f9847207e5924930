use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::error::QueueError;
use crate::models::{
    Channel, MessageContent, MessageFilter, MessageStatus, NewMessage, Priority, QueuedMessage,
    Trigger,
};

pub const RECLAIMED_ERROR: &str = "reclaimed after stalled processing";

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MessageRow {
    pub id: Uuid,
    pub seq: i64,
    pub tenant_id: Uuid,
    pub channel: String,
    pub recipient: String,
    pub content: Json<MessageContent>,
    pub trigger_tag: String,
    pub client_id: Option<String>,
    pub priority: String,
    pub status: String,
    pub retry_count: i32,
    pub max_retries: i32,
    pub not_before: DateTime<Utc>,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub provider_message_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<MessageRow> for QueuedMessage {
    type Error = QueueError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        let id = row.id;
        let corrupt = move |field: &str, value: &str| {
            QueueError::Storage(format!("message {id} has unknown {field} '{value}'"))
        };

        Ok(QueuedMessage {
            id: row.id,
            tenant_id: row.tenant_id,
            channel: Channel::parse(&row.channel).ok_or_else(|| corrupt("channel", &row.channel))?,
            to: row.recipient,
            content: row.content.0,
            trigger: Trigger::parse(&row.trigger_tag)
                .ok_or_else(|| corrupt("trigger", &row.trigger_tag))?,
            client_id: row.client_id,
            priority: Priority::parse(&row.priority)
                .ok_or_else(|| corrupt("priority", &row.priority))?,
            status: MessageStatus::parse(&row.status)
                .ok_or_else(|| corrupt("status", &row.status))?,
            retry_count: row.retry_count,
            max_retries: row.max_retries,
            not_before: row.not_before,
            processing_started_at: row.processing_started_at,
            last_error: row.last_error,
            provider_message_id: row.provider_message_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

pub async fn insert(
    pool: &PgPool,
    id: Uuid,
    message: &NewMessage,
    now: DateTime<Utc>,
) -> Result<MessageRow, sqlx::Error> {
    sqlx::query_as::<_, MessageRow>(
        "INSERT INTO queued_messages
            (id, tenant_id, channel, recipient, content, trigger_tag, client_id, priority,
             status, retry_count, max_retries, not_before, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'pending', 0, $9, $10, $10, $10)
         RETURNING *",
    )
    .bind(id)
    .bind(message.tenant_id)
    .bind(message.channel.as_str())
    .bind(&message.to)
    .bind(Json(&message.content))
    .bind(message.trigger.as_str())
    .bind(&message.client_id)
    .bind(message.priority.as_str())
    .bind(message.max_retries)
    .bind(now)
    .fetch_one(pool)
    .await
}

/// Select and mark `processing` in one statement, remembering the status
/// each row was claimed from. SKIP LOCKED keeps
/// concurrent dispatchers from ever claiming the same row.
pub async fn claim_batch(
    pool: &PgPool,
    tenant_id: Uuid,
    limit: i64,
    now: DateTime<Utc>,
) -> Result<Vec<MessageRow>, sqlx::Error> {
    sqlx::query_as::<_, MessageRow>(
        "UPDATE queued_messages
         SET status = 'processing', claimed_from = status,
             processing_started_at = $3, updated_at = $3
         WHERE id IN (
             SELECT id FROM queued_messages
             WHERE tenant_id = $1
               AND status IN ('pending', 'retry')
               AND not_before <= $3
             ORDER BY CASE priority WHEN 'high' THEN 0 WHEN 'medium' THEN 1 ELSE 2 END,
                      created_at ASC, seq ASC
             LIMIT $2
             FOR UPDATE SKIP LOCKED
         )
         RETURNING *",
    )
    .bind(tenant_id)
    .bind(limit)
    .bind(now)
    .fetch_all(pool)
    .await
}

pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<MessageRow>, sqlx::Error> {
    sqlx::query_as::<_, MessageRow>("SELECT * FROM queued_messages WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn find_by_id_scoped(
    pool: &PgPool,
    id: Uuid,
    tenant_id: Uuid,
) -> Result<Option<MessageRow>, sqlx::Error> {
    sqlx::query_as::<_, MessageRow>(
        "SELECT * FROM queued_messages WHERE id = $1 AND tenant_id = $2",
    )
    .bind(id)
    .bind(tenant_id)
    .fetch_optional(pool)
    .await
}

pub async fn mark_completed(
    pool: &PgPool,
    id: Uuid,
    provider_message_id: Option<&str>,
    now: DateTime<Utc>,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE queued_messages
         SET status = 'completed', last_error = NULL, provider_message_id = $2,
             claimed_from = NULL, processing_started_at = NULL, updated_at = $3
         WHERE id = $1 AND status = 'processing'",
    )
    .bind(id)
    .bind(provider_message_id)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

pub async fn mark_failed(
    pool: &PgPool,
    id: Uuid,
    error: &str,
    now: DateTime<Utc>,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE queued_messages
         SET status = 'failed', last_error = $2, claimed_from = NULL,
             processing_started_at = NULL, updated_at = $3
         WHERE id = $1 AND status = 'processing'",
    )
    .bind(id)
    .bind(error)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

pub async fn mark_retry(
    pool: &PgPool,
    id: Uuid,
    error: &str,
    not_before: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE queued_messages
         SET status = 'retry', retry_count = retry_count + 1, last_error = $2,
             not_before = $3, claimed_from = NULL, processing_started_at = NULL,
             updated_at = $4
         WHERE id = $1 AND status = 'processing' AND retry_count < max_retries",
    )
    .bind(id)
    .bind(error)
    .bind(not_before)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

pub async fn release(pool: &PgPool, id: Uuid, now: DateTime<Utc>) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE queued_messages
         SET status = COALESCE(claimed_from, 'pending'), claimed_from = NULL,
             processing_started_at = NULL, updated_at = $2
         WHERE id = $1 AND status = 'processing'",
    )
    .bind(id)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Restamp a claim just before its send. Zero rows when the message is no
/// longer `processing`.
pub async fn begin_send(pool: &PgPool, id: Uuid, now: DateTime<Utc>) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE queued_messages
         SET processing_started_at = $2, updated_at = $2
         WHERE id = $1 AND status = 'processing'",
    )
    .bind(id)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

pub async fn delete_unless_processing(
    pool: &PgPool,
    id: Uuid,
    tenant_id: Uuid,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "DELETE FROM queued_messages
         WHERE id = $1 AND tenant_id = $2 AND status <> 'processing'",
    )
    .bind(id)
    .bind(tenant_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

pub async fn requeue(
    pool: &PgPool,
    id: Uuid,
    tenant_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Option<MessageRow>, sqlx::Error> {
    sqlx::query_as::<_, MessageRow>(
        "UPDATE queued_messages
         SET status = 'pending', not_before = $3, updated_at = $3
         WHERE id = $1 AND tenant_id = $2 AND status IN ('failed', 'retry')
         RETURNING *",
    )
    .bind(id)
    .bind(tenant_id)
    .bind(now)
    .fetch_optional(pool)
    .await
}

fn push_filters(qb: &mut QueryBuilder<'_, Postgres>, tenant_id: Uuid, filter: &MessageFilter) {
    qb.push(" WHERE tenant_id = ").push_bind(tenant_id);
    if let Some(channel) = filter.channel {
        qb.push(" AND channel = ").push_bind(channel.as_str());
    }
    if let Some(priority) = filter.priority {
        qb.push(" AND priority = ").push_bind(priority.as_str());
    }
    if let Some(status) = filter.status {
        qb.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(client_id) = &filter.client_id {
        qb.push(" AND client_id = ").push_bind(client_id.clone());
    }
}

pub async fn count(
    pool: &PgPool,
    tenant_id: Uuid,
    filter: &MessageFilter,
) -> Result<i64, sqlx::Error> {
    let mut qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM queued_messages");
    push_filters(&mut qb, tenant_id, filter);
    qb.build_query_scalar::<i64>().fetch_one(pool).await
}

pub async fn list(
    pool: &PgPool,
    tenant_id: Uuid,
    filter: &MessageFilter,
    limit: i64,
    offset: i64,
) -> Result<Vec<MessageRow>, sqlx::Error> {
    let mut qb = QueryBuilder::<Postgres>::new("SELECT * FROM queued_messages");
    push_filters(&mut qb, tenant_id, filter);
    qb.push(" ORDER BY created_at DESC, seq DESC LIMIT ")
        .push_bind(limit)
        .push(" OFFSET ")
        .push_bind(offset);
    qb.build_query_as::<MessageRow>().fetch_all(pool).await
}

/// `(status, priority, count)` groups for one tenant.
pub async fn count_by_status_and_priority(
    pool: &PgPool,
    tenant_id: Uuid,
    channel: Option<Channel>,
) -> Result<Vec<(String, String, i64)>, sqlx::Error> {
    sqlx::query_as::<_, (String, String, i64)>(
        "SELECT status, priority, COUNT(*) FROM queued_messages
         WHERE tenant_id = $1 AND ($2::text IS NULL OR channel = $2)
         GROUP BY status, priority",
    )
    .bind(tenant_id)
    .bind(channel.map(|c| c.as_str()))
    .fetch_all(pool)
    .await
}

pub async fn reclaim_stuck(
    pool: &PgPool,
    older_than: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE queued_messages
         SET status = 'retry', last_error = $3, not_before = $2, claimed_from = NULL,
             processing_started_at = NULL, updated_at = $2
         WHERE status = 'processing' AND processing_started_at < $1",
    )
    .bind(older_than)
    .bind(now)
    .bind(RECLAIMED_ERROR)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

pub async fn tenants_with_queued(pool: &PgPool) -> Result<Vec<Uuid>, sqlx::Error> {
    sqlx::query_scalar::<_, Uuid>(
        "SELECT t.id FROM tenants t
         LEFT JOIN tenant_queue_settings s ON s.tenant_id = t.id
         WHERE COALESCE(s.auto_process, TRUE)
           AND EXISTS (
               SELECT 1 FROM queued_messages m
               WHERE m.tenant_id = t.id AND m.status IN ('pending', 'retry')
           )
         ORDER BY t.id",
    )
    .fetch_all(pool)
    .await
}
