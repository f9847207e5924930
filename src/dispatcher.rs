use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::QueueConfig;
use crate::db::NewAuditEvent;
use crate::error::QueueError;
use crate::middleware::audit;
use crate::models::{QueuedMessage, TenantQueueSettings};
use crate::providers::{ProviderError, ProviderRegistry, SendReceipt};
use crate::queue::MessageQueue;
use crate::rate_limit::SendRateLimiter;
use crate::retry::{FailureAction, RetryPolicy};
use crate::settings::SettingsStore;
use crate::window;

// Limiter state for tenants idle this long is dropped.
const LIMITER_IDLE_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickMode {
    /// Periodic scheduler tick; honours `autoProcess`.
    Scheduled,
    /// Operator-triggered; runs even with `autoProcess` off.
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    OutsideWindow,
    RateLimited,
    Busy,
    AutoProcessOff,
}

/// Outcome of one dispatch tick for one tenant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickReport {
    pub processed: u32,
    pub succeeded: u32,
    pub failed: u32,
    pub retried: u32,
    /// Selected but handed back unsent.
    pub released: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<SkipReason>,
}

impl TickReport {
    fn skipped(reason: SkipReason) -> Self {
        Self {
            skipped: Some(reason),
            ..Self::default()
        }
    }
}

/// Result of a manual `process` call.
#[derive(Debug)]
pub enum ProcessOutcome {
    Finished(TickReport),
    /// The tick is still running in the background.
    Accepted,
}

/// Removes the tenant from the active set when the tick ends.
struct TickGuard<'a> {
    active: &'a DashMap<Uuid, ()>,
    tenant_id: Uuid,
}

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.active.remove(&self.tenant_id);
    }
}

/// Pulls eligible messages per tenant and hands them to the provider for
/// their channel, gated by the send window and the rate limiter.
pub struct Dispatcher {
    queue: MessageQueue,
    settings: SettingsStore,
    providers: Arc<ProviderRegistry>,
    limiter: SendRateLimiter,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
    config: QueueConfig,
    active: DashMap<Uuid, ()>,
    /// Manual ticks, which may outlive the request that started them.
    manual: TaskTracker,
    stopping: AtomicBool,
}

impl Dispatcher {
    pub fn new(
        queue: MessageQueue,
        settings: SettingsStore,
        providers: Arc<ProviderRegistry>,
        clock: Arc<dyn Clock>,
        config: QueueConfig,
    ) -> Self {
        Self {
            retry: RetryPolicy::new(config.retry_base, config.retry_max),
            queue,
            settings,
            providers,
            limiter: SendRateLimiter::new(),
            clock,
            config,
            active: DashMap::new(),
            manual: TaskTracker::new(),
            stopping: AtomicBool::new(false),
        }
    }

    /// Stop selecting new work. Messages already selected but not yet sent
    /// are released; a send in flight is allowed to finish.
    pub fn begin_shutdown(&self) {
        self.stopping.store(true, Ordering::SeqCst);
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    /// Wait for manual ticks still running in the background. Call after
    /// `begin_shutdown` so they release what they have not sent.
    pub async fn drain(&self) {
        self.manual.close();
        self.manual.wait().await;
    }

    /// One dispatch pass for a single tenant. A tenant that already has a
    /// tick running is reported as `Busy` instead of being processed twice.
    pub async fn process_tenant(
        &self,
        tenant_id: Uuid,
        mode: TickMode,
        limit: Option<u32>,
    ) -> Result<TickReport, QueueError> {
        if self.is_stopping() {
            return Ok(TickReport::skipped(SkipReason::Busy));
        }
        if self.active.insert(tenant_id, ()).is_some() {
            tracing::debug!(%tenant_id, "Tick already running for tenant");
            return Ok(TickReport::skipped(SkipReason::Busy));
        }
        let _guard = TickGuard {
            active: &self.active,
            tenant_id,
        };

        let settings = self.settings.get(tenant_id).await?;
        if mode == TickMode::Scheduled && !settings.auto_process {
            return Ok(TickReport::skipped(SkipReason::AutoProcessOff));
        }

        let now = self.clock.now();
        if !window::is_within_window(&settings, now) {
            tracing::debug!(%tenant_id, "Outside send window, skipping tenant");
            return Ok(TickReport::skipped(SkipReason::OutsideWindow));
        }

        let budget = self
            .limiter
            .available(&settings, now)
            .min(self.config.max_batch)
            .min(limit.unwrap_or(u32::MAX));
        if budget == 0 {
            tracing::debug!(%tenant_id, "No send budget, skipping tenant");
            return Ok(TickReport::skipped(SkipReason::RateLimited));
        }

        let batch = self.queue.dequeue_next_batch(tenant_id, budget).await?;
        let mut report = TickReport::default();
        let mut pending = batch.into_iter();

        while let Some(message) = pending.next() {
            if !self.await_send_slot(&settings).await {
                self.release(&message, &mut report).await;
                for rest in pending.by_ref() {
                    self.release(&rest, &mut report).await;
                }
                break;
            }

            // Reclaimed by the stuck sweep or otherwise taken away while it
            // waited in the batch.
            if let Err(e) = self.queue.begin_send(message.id).await {
                tracing::warn!(message_id = %message.id, "Message no longer held, not sending: {e}");
                continue;
            }

            let outcome = self.send(&message).await;
            self.apply_outcome(&settings, &message, outcome, &mut report)
                .await;
        }

        if report.processed > 0 || report.released > 0 {
            tracing::info!(
                %tenant_id,
                processed = report.processed,
                succeeded = report.succeeded,
                failed = report.failed,
                retried = report.retried,
                released = report.released,
                "Dispatch tick finished"
            );
        }
        Ok(report)
    }

    /// Wait out the minimum spacing, then take a token. False when shutdown
    /// began, the send window closed meanwhile or the limiter refused.
    async fn await_send_slot(&self, settings: &TenantQueueSettings) -> bool {
        if self.is_stopping() {
            return false;
        }
        let wait = self.limiter.wait_time(settings, self.clock.now());
        if !wait.is_zero() {
            self.clock.sleep(wait).await;
            if self.is_stopping() {
                return false;
            }
        }
        let now = self.clock.now();
        if !window::is_within_window(settings, now) {
            tracing::debug!(tenant_id = %settings.tenant_id, "Send window closed mid-batch");
            return false;
        }
        self.limiter.try_acquire(settings, now)
    }

    async fn send(&self, message: &QueuedMessage) -> Result<SendReceipt, ProviderError> {
        let Some(provider) = self.providers.get(message.channel) else {
            return Err(ProviderError::Rejected(format!(
                "no provider configured for channel {}",
                message.channel.as_str()
            )));
        };

        let timeout = self.config.send_timeout;
        match tokio::time::timeout(timeout, provider.send(&message.to, &message.content, timeout))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout),
        }
    }

    async fn apply_outcome(
        &self,
        settings: &TenantQueueSettings,
        message: &QueuedMessage,
        outcome: Result<SendReceipt, ProviderError>,
        report: &mut TickReport,
    ) {
        report.processed += 1;
        let attempt = message.retry_count + 1;

        let (action, result, details) = match outcome {
            Ok(receipt) => {
                report.succeeded += 1;
                let result = self
                    .queue
                    .mark_completed(message.id, receipt.provider_message_id.as_deref())
                    .await;
                let details = json!({ "attempt": attempt, "providerMessageId": receipt.provider_message_id });
                ("message.completed", result, details)
            }
            Err(error) => {
                let reason = error.to_string();
                match self.retry.on_failure(
                    &error,
                    settings.enable_retries,
                    message.retry_count,
                    message.max_retries,
                ) {
                    FailureAction::Retry(delay) => {
                        report.retried += 1;
                        tracing::warn!(
                            tenant_id = %message.tenant_id,
                            message_id = %message.id,
                            attempt,
                            retry_in_secs = delay.as_secs(),
                            "Send failed, will retry: {reason}"
                        );
                        let result = self.queue.mark_retry(message.id, &reason, delay).await;
                        let details = json!({ "attempt": attempt, "error": reason, "retryInSecs": delay.as_secs() });
                        ("message.retry", result, details)
                    }
                    FailureAction::Fail => {
                        report.failed += 1;
                        tracing::warn!(
                            tenant_id = %message.tenant_id,
                            message_id = %message.id,
                            attempt,
                            "Send failed permanently: {reason}"
                        );
                        let result = self.queue.mark_failed(message.id, &reason).await;
                        let details = json!({ "attempt": attempt, "error": reason });
                        ("message.failed", result, details)
                    }
                }
            }
        };

        if let Err(e) = result {
            tracing::error!(
                tenant_id = %message.tenant_id,
                message_id = %message.id,
                "Send attempted but its outcome was not recorded, the message may go out again: {e}"
            );
            audit::log_event(
                self.queue.store().as_ref(),
                self.clock.as_ref(),
                NewAuditEvent {
                    tenant_id: message.tenant_id,
                    user_id: None,
                    action: "message.outcome_unrecorded".to_string(),
                    resource_type: "message".to_string(),
                    resource_id: Some(message.id),
                    details: Some(json!({ "attempt": attempt, "outcome": action, "error": e.to_string() })),
                },
            )
            .await;
        }

        let is_failure = action != "message.completed";
        if is_failure || settings.log_all_messages {
            audit::log_event(
                self.queue.store().as_ref(),
                self.clock.as_ref(),
                NewAuditEvent {
                    tenant_id: message.tenant_id,
                    user_id: None,
                    action: action.to_string(),
                    resource_type: "message".to_string(),
                    resource_id: Some(message.id),
                    details: Some(details),
                },
            )
            .await;
        }
    }

    async fn release(&self, message: &QueuedMessage, report: &mut TickReport) {
        match self.queue.release(message.id).await {
            Ok(()) => report.released += 1,
            Err(e) => tracing::error!(message_id = %message.id, "Failed to release message: {e}"),
        }
    }

    /// Reclaim stalled messages, then run one scheduled pass for every tenant
    /// with queued work, each on its own task.
    pub async fn run_tick(self: &Arc<Self>) -> Vec<(Uuid, TickReport)> {
        match self.queue.reclaim_stuck(self.config.stuck_after).await {
            Ok(0) => {}
            Ok(n) => tracing::warn!(reclaimed = n, "Requeued messages stuck in processing"),
            Err(e) => tracing::error!("Stuck-processing sweep failed: {e}"),
        }

        self.limiter.cleanup(self.clock.now(), LIMITER_IDLE_TTL);

        let tenants = match self.queue.store().tenants_due_for_dispatch().await {
            Ok(tenants) => tenants,
            Err(e) => {
                tracing::error!("Failed to list tenants for dispatch: {e}");
                return Vec::new();
            }
        };

        let mut tasks = JoinSet::new();
        for tenant_id in tenants {
            let dispatcher = Arc::clone(self);
            tasks.spawn(async move {
                let result = dispatcher
                    .process_tenant(tenant_id, TickMode::Scheduled, None)
                    .await;
                (tenant_id, result)
            });
        }

        let mut reports = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((tenant_id, Ok(report))) => reports.push((tenant_id, report)),
                Ok((tenant_id, Err(e))) => {
                    tracing::error!(%tenant_id, "Dispatch tick failed: {e}");
                }
                Err(e) => tracing::error!("Dispatch task panicked: {e}"),
            }
        }
        reports
    }

    /// Operator-triggered tick. Waits at most `process_wait` for the result;
    /// past that the tick keeps running and `Accepted` is returned.
    pub async fn process_now(
        self: &Arc<Self>,
        tenant_id: Uuid,
        limit: u32,
    ) -> Result<ProcessOutcome, QueueError> {
        let limit = limit.clamp(1, self.config.max_batch);
        let dispatcher = Arc::clone(self);
        let mut handle = self.manual.spawn(async move {
            dispatcher
                .process_tenant(tenant_id, TickMode::Manual, Some(limit))
                .await
        });

        match tokio::time::timeout(self.config.process_wait, &mut handle).await {
            Ok(Ok(result)) => result.map(ProcessOutcome::Finished),
            Ok(Err(e)) => Err(QueueError::Storage(format!("dispatch task failed: {e}"))),
            Err(_) => {
                tracing::info!(%tenant_id, "Manual tick still running, returning early");
                Ok(ProcessOutcome::Accepted)
            }
        }
    }

    /// Run scheduled ticks every `tick_interval` until `shutdown` flips.
    pub fn run_scheduler(
        self: Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let interval = self.config.tick_interval;
            tracing::info!(interval_secs = interval.as_secs(), "Dispatch scheduler started");

            loop {
                if *shutdown.borrow() || self.is_stopping() {
                    break;
                }

                self.run_tick().await;

                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = shutdown.changed() => {}
                }
            }

            tracing::info!("Dispatch scheduler stopped");
        })
    }
}
