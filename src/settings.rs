use std::sync::Arc;

use uuid::Uuid;

use crate::clock::Clock;
use crate::db::QueueStore;
use crate::error::QueueError;
use crate::models::{SettingsUpdate, TenantQueueSettings};

/// Per-tenant dispatch configuration, created with defaults on first read.
#[derive(Clone)]
pub struct SettingsStore {
    store: Arc<dyn QueueStore>,
    clock: Arc<dyn Clock>,
}

impl SettingsStore {
    pub fn new(store: Arc<dyn QueueStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn get(&self, tenant_id: Uuid) -> Result<TenantQueueSettings, QueueError> {
        self.store.settings(tenant_id, self.clock.now()).await
    }

    /// Merge `update` into the current settings. Invalid values reject the
    /// whole update.
    pub async fn upsert(
        &self,
        tenant_id: Uuid,
        update: &SettingsUpdate,
    ) -> Result<TenantQueueSettings, QueueError> {
        let now = self.clock.now();
        let mut settings = self.store.settings(tenant_id, now).await?;
        update.apply(&mut settings).map_err(QueueError::Validation)?;
        settings.updated_at = now;
        self.store.save_settings(&settings).await
    }
}
