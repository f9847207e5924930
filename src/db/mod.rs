pub mod audit;
pub mod memory;
pub mod messages;
pub mod postgres;
pub mod settings;
pub mod tenants;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::QueueError;
use crate::models::{
    AuditEvent, Channel, MessageFilter, MessagePage, NewMessage, QueueSnapshot, QueuedMessage,
    Tenant, TenantQueueSettings,
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Audit entry as written by callers; id and timestamp are assigned on insert.
#[derive(Debug, Clone)]
pub struct NewAuditEvent {
    pub tenant_id: Uuid,
    pub user_id: Option<Uuid>,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<Uuid>,
    pub details: Option<serde_json::Value>,
}

/// Durable state of the outbound queue. Every message operation is scoped by
/// tenant; ids belonging to another tenant behave as missing.
///
/// `dequeue_next_batch` is the only place a message enters `processing`, and
/// it must select and mark atomically so no id is handed out twice.
#[async_trait]
pub trait QueueStore: Send + Sync {
    async fn create_tenant(
        &self,
        name: &str,
        slug: &str,
        now: DateTime<Utc>,
    ) -> Result<Tenant, QueueError>;
    async fn find_tenant(&self, id: Uuid) -> Result<Option<Tenant>, QueueError>;
    async fn list_tenants(&self) -> Result<Vec<Tenant>, QueueError>;

    async fn enqueue(
        &self,
        message: NewMessage,
        now: DateTime<Utc>,
    ) -> Result<QueuedMessage, QueueError>;

    /// Up to `limit` eligible `pending`/`retry` messages, highest priority
    /// first and FIFO within a priority, already marked `processing`.
    async fn dequeue_next_batch(
        &self,
        tenant_id: Uuid,
        limit: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<QueuedMessage>, QueueError>;

    async fn mark_completed(
        &self,
        id: Uuid,
        provider_message_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), QueueError>;
    async fn mark_failed(
        &self,
        id: Uuid,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<(), QueueError>;
    /// Fails with `InvalidState` if the message already used all its retries.
    async fn mark_retry(
        &self,
        id: Uuid,
        error: &str,
        not_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), QueueError>;
    /// Restamp `processing_started_at` right before the message is sent so
    /// the stuck sweep measures the send, not the wait in the batch. Fails
    /// with `InvalidState` once the message has left `processing`; the
    /// caller must then not send it.
    async fn begin_send(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), QueueError>;
    /// Hand a `processing` message back unsent, restoring the status it was
    /// claimed from.
    async fn release(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), QueueError>;

    async fn get(&self, tenant_id: Uuid, id: Uuid) -> Result<QueuedMessage, QueueError>;
    async fn delete(&self, tenant_id: Uuid, id: Uuid) -> Result<(), QueueError>;
    /// Operator retry: `failed`/`retry` back to `pending`, retry count kept.
    async fn requeue(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<QueuedMessage, QueueError>;

    /// Newest first.
    async fn list(
        &self,
        tenant_id: Uuid,
        filter: &MessageFilter,
        limit: i64,
        offset: i64,
    ) -> Result<MessagePage, QueueError>;
    async fn snapshot(
        &self,
        tenant_id: Uuid,
        channel: Option<Channel>,
    ) -> Result<QueueSnapshot, QueueError>;

    /// Move messages stuck in `processing` since before `older_than` to `retry`.
    async fn reclaim_stuck(
        &self,
        older_than: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64, QueueError>;

    /// Tenants with `autoProcess` on and at least one queued message.
    async fn tenants_due_for_dispatch(&self) -> Result<Vec<Uuid>, QueueError>;

    /// Created with defaults on first access.
    async fn settings(
        &self,
        tenant_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<TenantQueueSettings, QueueError>;
    async fn save_settings(
        &self,
        settings: &TenantQueueSettings,
    ) -> Result<TenantQueueSettings, QueueError>;

    async fn log_audit(&self, event: NewAuditEvent, now: DateTime<Utc>) -> Result<(), QueueError>;
    async fn list_audit(
        &self,
        tenant_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AuditEvent>, QueueError>;
}
