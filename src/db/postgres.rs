use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{NewAuditEvent, QueueStore, audit, messages, settings, tenants};
use crate::error::QueueError;
use crate::models::{
    AuditEvent, Channel, MessageFilter, MessagePage, MessageStatus, NewMessage, Priority,
    QueueSnapshot, QueuedMessage, Tenant, TenantQueueSettings,
};

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Explain why a conditional update on a `processing` message matched nothing.
    async fn not_processing(&self, id: Uuid) -> QueueError {
        match messages::find_by_id(&self.pool, id).await {
            Ok(Some(row)) if row.status == MessageStatus::Processing.as_str() => {
                QueueError::InvalidState("retries exhausted".to_string())
            }
            Ok(Some(row)) => {
                QueueError::InvalidState(format!("message is {}, not processing", row.status))
            }
            Ok(None) => QueueError::MessageNotFound,
            Err(e) => e.into(),
        }
    }

    async fn expect_processing(&self, id: Uuid, affected: u64) -> Result<(), QueueError> {
        if affected == 0 {
            Err(self.not_processing(id).await)
        } else {
            Ok(())
        }
    }
}

fn tenant_scoped(err: sqlx::Error) -> QueueError {
    match err {
        sqlx::Error::Database(ref db_err) if db_err.is_foreign_key_violation() => {
            QueueError::TenantNotFound
        }
        _ => err.into(),
    }
}

#[async_trait]
impl QueueStore for PgStore {
    async fn create_tenant(
        &self,
        name: &str,
        slug: &str,
        now: DateTime<Utc>,
    ) -> Result<Tenant, QueueError> {
        tenants::create(&self.pool, Uuid::now_v7(), name, slug, now)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                    QueueError::Conflict("A tenant with this slug already exists".to_string())
                }
                _ => e.into(),
            })
    }

    async fn find_tenant(&self, id: Uuid) -> Result<Option<Tenant>, QueueError> {
        Ok(tenants::find_by_id(&self.pool, id).await?)
    }

    async fn list_tenants(&self) -> Result<Vec<Tenant>, QueueError> {
        Ok(tenants::list(&self.pool).await?)
    }

    async fn enqueue(
        &self,
        message: NewMessage,
        now: DateTime<Utc>,
    ) -> Result<QueuedMessage, QueueError> {
        messages::insert(&self.pool, Uuid::now_v7(), &message, now)
            .await
            .map_err(tenant_scoped)?
            .try_into()
    }

    async fn dequeue_next_batch(
        &self,
        tenant_id: Uuid,
        limit: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<QueuedMessage>, QueueError> {
        let mut rows = messages::claim_batch(&self.pool, tenant_id, i64::from(limit), now).await?;

        // RETURNING does not preserve the subquery's order.
        rows.sort_by_key(|row| {
            (
                Priority::parse(&row.priority).unwrap_or(Priority::Low),
                row.created_at,
                row.seq,
            )
        });
        rows.into_iter().map(QueuedMessage::try_from).collect()
    }

    async fn mark_completed(
        &self,
        id: Uuid,
        provider_message_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), QueueError> {
        let affected = messages::mark_completed(&self.pool, id, provider_message_id, now).await?;
        self.expect_processing(id, affected).await
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<(), QueueError> {
        let affected = messages::mark_failed(&self.pool, id, error, now).await?;
        self.expect_processing(id, affected).await
    }

    async fn mark_retry(
        &self,
        id: Uuid,
        error: &str,
        not_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), QueueError> {
        let affected = messages::mark_retry(&self.pool, id, error, not_before, now).await?;
        self.expect_processing(id, affected).await
    }

    async fn begin_send(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), QueueError> {
        let affected = messages::begin_send(&self.pool, id, now).await?;
        self.expect_processing(id, affected).await
    }

    async fn release(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), QueueError> {
        let affected = messages::release(&self.pool, id, now).await?;
        self.expect_processing(id, affected).await
    }

    async fn get(&self, tenant_id: Uuid, id: Uuid) -> Result<QueuedMessage, QueueError> {
        messages::find_by_id_scoped(&self.pool, id, tenant_id)
            .await?
            .ok_or(QueueError::MessageNotFound)?
            .try_into()
    }

    async fn delete(&self, tenant_id: Uuid, id: Uuid) -> Result<(), QueueError> {
        if messages::delete_unless_processing(&self.pool, id, tenant_id).await? > 0 {
            return Ok(());
        }
        match messages::find_by_id_scoped(&self.pool, id, tenant_id).await? {
            Some(_) => Err(QueueError::InvalidState(
                "message is being processed".to_string(),
            )),
            None => Err(QueueError::MessageNotFound),
        }
    }

    async fn requeue(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<QueuedMessage, QueueError> {
        if let Some(row) = messages::requeue(&self.pool, id, tenant_id, now).await? {
            return row.try_into();
        }
        let current = self.get(tenant_id, id).await?;
        match current.status {
            MessageStatus::Pending => Ok(current),
            status => Err(QueueError::InvalidState(format!(
                "cannot retry a {} message",
                status.as_str()
            ))),
        }
    }

    async fn list(
        &self,
        tenant_id: Uuid,
        filter: &MessageFilter,
        limit: i64,
        offset: i64,
    ) -> Result<MessagePage, QueueError> {
        let total = messages::count(&self.pool, tenant_id, filter).await?;
        let messages = messages::list(&self.pool, tenant_id, filter, limit, offset)
            .await?
            .into_iter()
            .map(QueuedMessage::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(MessagePage { messages, total })
    }

    async fn snapshot(
        &self,
        tenant_id: Uuid,
        channel: Option<Channel>,
    ) -> Result<QueueSnapshot, QueueError> {
        let groups = messages::count_by_status_and_priority(&self.pool, tenant_id, channel).await?;
        let mut snapshot = QueueSnapshot::default();
        for (status, priority, count) in groups {
            match (MessageStatus::parse(&status), Priority::parse(&priority)) {
                (Some(status), Some(priority)) => snapshot.add(status, priority, count),
                _ => tracing::warn!(%tenant_id, %status, %priority, "skipping unknown queue group"),
            }
        }
        Ok(snapshot)
    }

    async fn reclaim_stuck(
        &self,
        older_than: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64, QueueError> {
        Ok(messages::reclaim_stuck(&self.pool, older_than, now).await?)
    }

    async fn tenants_due_for_dispatch(&self) -> Result<Vec<Uuid>, QueueError> {
        Ok(messages::tenants_with_queued(&self.pool).await?)
    }

    async fn settings(
        &self,
        tenant_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<TenantQueueSettings, QueueError> {
        let defaults = TenantQueueSettings::defaults(tenant_id, now);
        settings::find_or_create(&self.pool, &defaults)
            .await
            .map_err(tenant_scoped)
    }

    async fn save_settings(
        &self,
        settings: &TenantQueueSettings,
    ) -> Result<TenantQueueSettings, QueueError> {
        settings::upsert(&self.pool, settings)
            .await
            .map_err(tenant_scoped)
    }

    async fn log_audit(&self, event: NewAuditEvent, now: DateTime<Utc>) -> Result<(), QueueError> {
        audit::log_event(&self.pool, Uuid::now_v7(), &event, now)
            .await
            .map_err(tenant_scoped)
    }

    async fn list_audit(
        &self,
        tenant_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AuditEvent>, QueueError> {
        Ok(audit::list(&self.pool, tenant_id, limit, offset).await?)
    }
}
