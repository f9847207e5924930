use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use uuid::Uuid;

use crate::clock::Clock;
use crate::db::QueueStore;
use crate::error::QueueError;
use crate::models::settings::MAX_RETRIES_CEILING;
use crate::models::{
    Channel, MessageContent, MessageFilter, MessagePage, NewMessage, Priority, QueueSnapshot,
    QueuedMessage, Trigger,
};

/// Producer request to put one message on a tenant's queue.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueRequest {
    pub to: String,
    pub content: MessageContent,
    pub trigger: Trigger,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub max_retries: Option<i32>,
    #[serde(default)]
    pub client_id: Option<String>,
}

/// Tenant-scoped view of the message store with timestamps taken from the
/// engine clock.
#[derive(Clone)]
pub struct MessageQueue {
    store: Arc<dyn QueueStore>,
    clock: Arc<dyn Clock>,
}

impl MessageQueue {
    pub fn new(store: Arc<dyn QueueStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn store(&self) -> &Arc<dyn QueueStore> {
        &self.store
    }

    /// Fails with `TenantNotFound` for unknown tenants. A missing
    /// `maxRetries` falls back to the tenant's configured ceiling.
    pub async fn enqueue(
        &self,
        tenant_id: Uuid,
        channel: Channel,
        req: EnqueueRequest,
    ) -> Result<QueuedMessage, QueueError> {
        if req.to.trim().is_empty() {
            return Err(QueueError::Validation("to is required".to_string()));
        }
        if req.content.body.trim().is_empty() {
            return Err(QueueError::Validation("content.body is required".to_string()));
        }
        if let Some(max) = req.max_retries {
            if !(0..=MAX_RETRIES_CEILING).contains(&max) {
                return Err(QueueError::Validation(format!(
                    "maxRetries must be between 0 and {MAX_RETRIES_CEILING}"
                )));
            }
        }

        let now = self.clock.now();
        let settings = self.store.settings(tenant_id, now).await?;

        let message = NewMessage {
            tenant_id,
            channel,
            to: req.to.trim().to_string(),
            content: req.content,
            trigger: req.trigger,
            client_id: req.client_id.filter(|c| !c.is_empty()),
            priority: req.priority.unwrap_or_default(),
            max_retries: req.max_retries.unwrap_or(settings.max_retries),
        };
        let queued = self.store.enqueue(message, now).await?;

        tracing::debug!(
            tenant_id = %tenant_id,
            message_id = %queued.id,
            priority = queued.priority.as_str(),
            "Message enqueued"
        );
        Ok(queued)
    }

    pub async fn dequeue_next_batch(
        &self,
        tenant_id: Uuid,
        limit: u32,
    ) -> Result<Vec<QueuedMessage>, QueueError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        self.store
            .dequeue_next_batch(tenant_id, limit, self.clock.now())
            .await
    }

    pub async fn mark_completed(
        &self,
        id: Uuid,
        provider_message_id: Option<&str>,
    ) -> Result<(), QueueError> {
        self.store
            .mark_completed(id, provider_message_id, self.clock.now())
            .await
    }

    pub async fn mark_failed(&self, id: Uuid, error: &str) -> Result<(), QueueError> {
        self.store.mark_failed(id, error, self.clock.now()).await
    }

    /// Schedule another attempt no earlier than `delay` from now.
    pub async fn mark_retry(&self, id: Uuid, error: &str, delay: Duration) -> Result<(), QueueError> {
        let now = self.clock.now();
        let delay = chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::MAX);
        let not_before = now.checked_add_signed(delay).unwrap_or(now);
        self.store.mark_retry(id, error, not_before, now).await
    }

    /// Refresh the claim on a message about to be sent.
    pub async fn begin_send(&self, id: Uuid) -> Result<(), QueueError> {
        self.store.begin_send(id, self.clock.now()).await
    }

    pub async fn release(&self, id: Uuid) -> Result<(), QueueError> {
        self.store.release(id, self.clock.now()).await
    }

    pub async fn get(&self, tenant_id: Uuid, id: Uuid) -> Result<QueuedMessage, QueueError> {
        self.store.get(tenant_id, id).await
    }

    pub async fn delete(&self, tenant_id: Uuid, id: Uuid) -> Result<(), QueueError> {
        self.store.delete(tenant_id, id).await
    }

    /// Operator retry. `pending` is already eligible and is returned as is;
    /// `processing` and `completed` are rejected.
    pub async fn retry(&self, tenant_id: Uuid, id: Uuid) -> Result<QueuedMessage, QueueError> {
        self.store.requeue(tenant_id, id, self.clock.now()).await
    }

    /// `page` is 1-based.
    pub async fn list(
        &self,
        tenant_id: Uuid,
        filter: &MessageFilter,
        page: u32,
        page_size: u32,
    ) -> Result<MessagePage, QueueError> {
        let limit = i64::from(page_size.max(1));
        let offset = i64::from(page.max(1) - 1) * limit;
        self.store.list(tenant_id, filter, limit, offset).await
    }

    pub async fn snapshot(
        &self,
        tenant_id: Uuid,
        channel: Option<Channel>,
    ) -> Result<QueueSnapshot, QueueError> {
        self.store.snapshot(tenant_id, channel).await
    }

    /// Requeue messages stuck in `processing` for longer than `stuck_after`.
    pub async fn reclaim_stuck(&self, stuck_after: Duration) -> Result<u64, QueueError> {
        let now = self.clock.now();
        let age = chrono::Duration::from_std(stuck_after).unwrap_or(chrono::Duration::MAX);
        let older_than = now.checked_sub_signed(age).unwrap_or(now);
        self.store.reclaim_stuck(older_than, now).await
    }
}
