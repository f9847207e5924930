use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{NewAuditEvent, QueueStore};
use crate::error::QueueError;
use crate::models::{
    AuditEvent, Channel, MessageFilter, MessagePage, MessageStatus, NewMessage, QueueSnapshot,
    QueuedMessage, Tenant, TenantQueueSettings,
};

/// Process-local store. State lives only as long as the process; used when no
/// database is configured and in tests.
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    tenants: HashMap<Uuid, Tenant>,
    messages: HashMap<Uuid, Stored>,
    settings: HashMap<Uuid, TenantQueueSettings>,
    audit: Vec<AuditEvent>,
    next_seq: u64,
}

struct Stored {
    /// Insertion order, breaks `created_at` ties.
    seq: u64,
    message: QueuedMessage,
    /// Status before the current claim.
    claimed_from: Option<MessageStatus>,
}

impl Inner {
    fn processing_mut(&mut self, id: Uuid) -> Result<&mut QueuedMessage, QueueError> {
        self.processing_stored(id).map(|s| &mut s.message)
    }

    fn processing_stored(&mut self, id: Uuid) -> Result<&mut Stored, QueueError> {
        let stored = self
            .messages
            .get_mut(&id)
            .ok_or(QueueError::MessageNotFound)?;
        if stored.message.status != MessageStatus::Processing {
            return Err(QueueError::InvalidState(format!(
                "message is {}, not processing",
                stored.message.status.as_str()
            )));
        }
        Ok(stored)
    }

    fn scoped(&self, tenant_id: Uuid, id: Uuid) -> Result<&QueuedMessage, QueueError> {
        self.messages
            .get(&id)
            .map(|s| &s.message)
            .filter(|m| m.tenant_id == tenant_id)
            .ok_or(QueueError::MessageNotFound)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueStore for MemoryStore {
    async fn create_tenant(
        &self,
        name: &str,
        slug: &str,
        now: DateTime<Utc>,
    ) -> Result<Tenant, QueueError> {
        let mut inner = self.inner.lock().await;
        if inner.tenants.values().any(|t| t.slug == slug) {
            return Err(QueueError::Conflict(
                "A tenant with this slug already exists".to_string(),
            ));
        }
        let tenant = Tenant {
            id: Uuid::now_v7(),
            name: name.to_string(),
            slug: slug.to_string(),
            created_at: now,
        };
        inner.tenants.insert(tenant.id, tenant.clone());
        Ok(tenant)
    }

    async fn find_tenant(&self, id: Uuid) -> Result<Option<Tenant>, QueueError> {
        Ok(self.inner.lock().await.tenants.get(&id).cloned())
    }

    async fn list_tenants(&self) -> Result<Vec<Tenant>, QueueError> {
        let inner = self.inner.lock().await;
        let mut tenants: Vec<Tenant> = inner.tenants.values().cloned().collect();
        tenants.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tenants)
    }

    async fn enqueue(
        &self,
        message: NewMessage,
        now: DateTime<Utc>,
    ) -> Result<QueuedMessage, QueueError> {
        let mut inner = self.inner.lock().await;
        if !inner.tenants.contains_key(&message.tenant_id) {
            return Err(QueueError::TenantNotFound);
        }
        let message = message.into_queued(Uuid::now_v7(), now);
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.messages.insert(
            message.id,
            Stored {
                seq,
                message: message.clone(),
                claimed_from: None,
            },
        );
        Ok(message)
    }

    async fn dequeue_next_batch(
        &self,
        tenant_id: Uuid,
        limit: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<QueuedMessage>, QueueError> {
        let mut inner = self.inner.lock().await;

        let mut eligible: Vec<(_, _, u64, Uuid)> = inner
            .messages
            .values()
            .filter(|s| {
                s.message.tenant_id == tenant_id
                    && s.message.status.is_queued()
                    && s.message.not_before <= now
            })
            .map(|s| (s.message.priority, s.message.created_at, s.seq, s.message.id))
            .collect();
        eligible.sort();
        eligible.truncate(limit as usize);

        let mut batch = Vec::with_capacity(eligible.len());
        for (_, _, _, id) in eligible {
            if let Some(stored) = inner.messages.get_mut(&id) {
                stored.claimed_from = Some(stored.message.status);
                stored.message.status = MessageStatus::Processing;
                stored.message.processing_started_at = Some(now);
                stored.message.updated_at = now;
                batch.push(stored.message.clone());
            }
        }
        Ok(batch)
    }

    async fn mark_completed(
        &self,
        id: Uuid,
        provider_message_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().await;
        let message = inner.processing_mut(id)?;
        message.status = MessageStatus::Completed;
        message.last_error = None;
        message.provider_message_id = provider_message_id.map(str::to_string);
        message.processing_started_at = None;
        message.updated_at = now;
        Ok(())
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().await;
        let message = inner.processing_mut(id)?;
        message.status = MessageStatus::Failed;
        message.last_error = Some(error.to_string());
        message.processing_started_at = None;
        message.updated_at = now;
        Ok(())
    }

    async fn mark_retry(
        &self,
        id: Uuid,
        error: &str,
        not_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().await;
        let message = inner.processing_mut(id)?;
        if message.retry_count >= message.max_retries {
            return Err(QueueError::InvalidState(
                "retries exhausted".to_string(),
            ));
        }
        message.retry_count += 1;
        message.status = MessageStatus::Retry;
        message.last_error = Some(error.to_string());
        message.not_before = not_before;
        message.processing_started_at = None;
        message.updated_at = now;
        Ok(())
    }

    async fn begin_send(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().await;
        let message = inner.processing_mut(id)?;
        message.processing_started_at = Some(now);
        message.updated_at = now;
        Ok(())
    }

    async fn release(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().await;
        let stored = inner.processing_stored(id)?;
        stored.message.status = stored.claimed_from.take().unwrap_or(MessageStatus::Pending);
        stored.message.processing_started_at = None;
        stored.message.updated_at = now;
        Ok(())
    }

    async fn get(&self, tenant_id: Uuid, id: Uuid) -> Result<QueuedMessage, QueueError> {
        let inner = self.inner.lock().await;
        inner.scoped(tenant_id, id).cloned()
    }

    async fn delete(&self, tenant_id: Uuid, id: Uuid) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().await;
        if inner.scoped(tenant_id, id)?.status == MessageStatus::Processing {
            return Err(QueueError::InvalidState(
                "message is being processed".to_string(),
            ));
        }
        inner.messages.remove(&id);
        Ok(())
    }

    async fn requeue(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<QueuedMessage, QueueError> {
        let mut inner = self.inner.lock().await;
        let status = inner.scoped(tenant_id, id)?.status;
        match status {
            MessageStatus::Pending => return inner.scoped(tenant_id, id).cloned(),
            MessageStatus::Failed | MessageStatus::Retry => {}
            status => {
                return Err(QueueError::InvalidState(format!(
                    "cannot retry a {} message",
                    status.as_str()
                )));
            }
        }
        let stored = inner
            .messages
            .get_mut(&id)
            .ok_or(QueueError::MessageNotFound)?;
        stored.message.status = MessageStatus::Pending;
        stored.message.not_before = now;
        stored.message.updated_at = now;
        Ok(stored.message.clone())
    }

    async fn list(
        &self,
        tenant_id: Uuid,
        filter: &MessageFilter,
        limit: i64,
        offset: i64,
    ) -> Result<MessagePage, QueueError> {
        let inner = self.inner.lock().await;
        let mut matching: Vec<&Stored> = inner
            .messages
            .values()
            .filter(|s| s.message.tenant_id == tenant_id && filter.matches(&s.message))
            .collect();
        matching.sort_by(|a, b| {
            b.message
                .created_at
                .cmp(&a.message.created_at)
                .then(b.seq.cmp(&a.seq))
        });

        let total = matching.len() as i64;
        let messages = matching
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .map(|s| s.message.clone())
            .collect();
        Ok(MessagePage { messages, total })
    }

    async fn snapshot(
        &self,
        tenant_id: Uuid,
        channel: Option<Channel>,
    ) -> Result<QueueSnapshot, QueueError> {
        let inner = self.inner.lock().await;
        let mut snapshot = QueueSnapshot::default();
        for stored in inner.messages.values() {
            let m = &stored.message;
            if m.tenant_id == tenant_id && channel.is_none_or(|c| c == m.channel) {
                snapshot.add(m.status, m.priority, 1);
            }
        }
        Ok(snapshot)
    }

    async fn reclaim_stuck(
        &self,
        older_than: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64, QueueError> {
        let mut inner = self.inner.lock().await;
        let mut reclaimed = 0;
        for stored in inner.messages.values_mut() {
            let m = &mut stored.message;
            let stalled = m.status == MessageStatus::Processing
                && m.processing_started_at.is_some_and(|t| t < older_than);
            if stalled {
                m.status = MessageStatus::Retry;
                m.last_error = Some(super::messages::RECLAIMED_ERROR.to_string());
                m.not_before = now;
                m.processing_started_at = None;
                m.updated_at = now;
                reclaimed += 1;
            }
        }
        Ok(reclaimed)
    }

    async fn tenants_due_for_dispatch(&self) -> Result<Vec<Uuid>, QueueError> {
        let inner = self.inner.lock().await;
        let mut due: Vec<Uuid> = inner
            .tenants
            .keys()
            .copied()
            .filter(|id| inner.settings.get(id).is_none_or(|s| s.auto_process))
            .filter(|id| {
                inner
                    .messages
                    .values()
                    .any(|s| s.message.tenant_id == *id && s.message.status.is_queued())
            })
            .collect();
        due.sort();
        Ok(due)
    }

    async fn settings(
        &self,
        tenant_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<TenantQueueSettings, QueueError> {
        let mut inner = self.inner.lock().await;
        if !inner.tenants.contains_key(&tenant_id) {
            return Err(QueueError::TenantNotFound);
        }
        Ok(inner
            .settings
            .entry(tenant_id)
            .or_insert_with(|| TenantQueueSettings::defaults(tenant_id, now))
            .clone())
    }

    async fn save_settings(
        &self,
        settings: &TenantQueueSettings,
    ) -> Result<TenantQueueSettings, QueueError> {
        let mut inner = self.inner.lock().await;
        if !inner.tenants.contains_key(&settings.tenant_id) {
            return Err(QueueError::TenantNotFound);
        }
        inner.settings.insert(settings.tenant_id, settings.clone());
        Ok(settings.clone())
    }

    async fn log_audit(&self, event: NewAuditEvent, now: DateTime<Utc>) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().await;
        inner.audit.push(AuditEvent {
            id: Uuid::now_v7(),
            tenant_id: event.tenant_id,
            user_id: event.user_id,
            action: event.action,
            resource_type: event.resource_type,
            resource_id: event.resource_id,
            details: event.details,
            created_at: now,
        });
        Ok(())
    }

    async fn list_audit(
        &self,
        tenant_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AuditEvent>, QueueError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .audit
            .iter()
            .rev()
            .filter(|e| e.tenant_id == tenant_id)
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }
}
