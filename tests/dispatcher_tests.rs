mod common;

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use outreach_queue::clock::{Clock, ManualClock};
use outreach_queue::config::{Config, QueueConfig};
use outreach_queue::db::QueueStore;
use outreach_queue::dispatcher::{Dispatcher, ProcessOutcome, SkipReason, TickMode};
use outreach_queue::error::QueueError;
use outreach_queue::models::{
    Channel, MessageContent, MessageFilter, MessageStatus, Priority, Trigger,
};
use outreach_queue::providers::{ProviderAdapter, ProviderError, ProviderRegistry, SendReceipt};
use outreach_queue::queue::{EnqueueRequest, MessageQueue};

/// Provider whose second send is slow enough for the stuck sweep to run
/// while the rest of the batch is still waiting.
struct SweepDuringSend {
    queue: MessageQueue,
    clock: Arc<ManualClock>,
    calls: AtomicUsize,
    sent: Mutex<Vec<String>>,
}

#[async_trait]
impl ProviderAdapter for SweepDuringSend {
    fn channel(&self) -> Channel {
        Channel::Whatsapp
    }

    fn name(&self) -> &str {
        "sweep-during-send"
    }

    async fn send(
        &self,
        to: &str,
        _content: &MessageContent,
        _timeout: Duration,
    ) -> Result<SendReceipt, ProviderError> {
        self.sent.lock().unwrap().push(to.to_string());
        if self.calls.fetch_add(1, Ordering::SeqCst) == 1 {
            self.clock.advance(Duration::from_secs(250));
            self.queue
                .reclaim_stuck(Duration::from_secs(600))
                .await
                .unwrap();
        }
        Ok(SendReceipt::default())
    }
}

#[tokio::test]
async fn dequeue_orders_by_priority_then_fifo() {
    let app = common::spawn_app().await;
    let (tenant_id, _) = app.create_tenant("acme").await;

    let a = app.enqueue(tenant_id, "A", Priority::Low, None).await;
    app.clock.advance(Duration::from_secs(1));
    let b = app.enqueue(tenant_id, "B", Priority::High, None).await;
    app.clock.advance(Duration::from_secs(1));
    let c = app.enqueue(tenant_id, "C", Priority::Medium, None).await;

    let batch = app.state.queue.dequeue_next_batch(tenant_id, 3).await.unwrap();
    let ids: Vec<_> = batch.iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![b.id, c.id, a.id]);
    assert!(batch.iter().all(|m| m.status == MessageStatus::Processing));

    // Nothing left to claim while they are in flight.
    let again = app.state.queue.dequeue_next_batch(tenant_id, 3).await.unwrap();
    assert!(again.is_empty());
}

#[tokio::test]
async fn fifo_within_same_priority_and_timestamp() {
    let app = common::spawn_app().await;
    let (tenant_id, _) = app.create_tenant("acme").await;
    let first = app.enqueue(tenant_id, "1", Priority::Medium, None).await;
    let second = app.enqueue(tenant_id, "2", Priority::Medium, None).await;

    let batch = app.state.queue.dequeue_next_batch(tenant_id, 1).await.unwrap();
    assert_eq!(batch[0].id, first.id);
    let batch = app.state.queue.dequeue_next_batch(tenant_id, 1).await.unwrap();
    assert_eq!(batch[0].id, second.id);
}

#[tokio::test]
async fn concurrent_dequeue_never_hands_out_an_id_twice() {
    let app = common::spawn_app().await;
    let (tenant_id, _) = app.create_tenant("acme").await;
    for i in 0..40 {
        app.enqueue(tenant_id, &format!("+55{i:04}"), Priority::Medium, None)
            .await;
    }

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let queue = app.state.queue.clone();
        tasks.push(tokio::spawn(async move {
            queue.dequeue_next_batch(tenant_id, 7).await.unwrap()
        }));
    }

    let mut seen = HashSet::new();
    let mut total = 0;
    for task in tasks {
        for message in task.await.unwrap() {
            total += 1;
            assert!(seen.insert(message.id), "message {} claimed twice", message.id);
        }
    }
    assert_eq!(total, 40);
}

#[tokio::test]
async fn rate_limit_caps_sends_per_minute() {
    let app = common::spawn_app().await;
    let (tenant_id, _) = app.create_tenant("acme").await;
    app.configure(
        tenant_id,
        json!({ "rateLimitPerMinute": 2, "delayBetweenMessages": 0 }),
    )
    .await;
    for i in 0..5 {
        app.enqueue(tenant_id, &format!("+5511{i}"), Priority::Medium, None)
            .await;
    }

    let report = app
        .state
        .dispatcher
        .process_tenant(tenant_id, TickMode::Scheduled, None)
        .await
        .unwrap();
    assert_eq!(report.processed, 2);
    assert_eq!(report.succeeded, 2);

    // Same instant: the bucket is empty, the tenant is skipped.
    let report = app
        .state
        .dispatcher
        .process_tenant(tenant_id, TickMode::Scheduled, None)
        .await
        .unwrap();
    assert_eq!(report.skipped, Some(SkipReason::RateLimited));
    assert_eq!(app.provider.sent().len(), 2);

    let snapshot = app.store.snapshot(tenant_id, None).await.unwrap();
    assert_eq!(snapshot.completed, 2);
    assert_eq!(snapshot.pending, 3);

    // Half a minute refills one token.
    app.clock.advance(Duration::from_secs(30));
    let report = app
        .state
        .dispatcher
        .process_tenant(tenant_id, TickMode::Scheduled, None)
        .await
        .unwrap();
    assert_eq!(report.processed, 1);
    assert_eq!(app.provider.sent().len(), 3);
}

#[tokio::test]
async fn sends_are_spaced_by_delay_between_messages() {
    let app = common::spawn_app().await;
    let (tenant_id, _) = app.create_tenant("acme").await;
    app.configure(tenant_id, json!({ "delayBetweenMessages": 5000 }))
        .await;
    for i in 0..3 {
        app.enqueue(tenant_id, &format!("+5511{i}"), Priority::Medium, None)
            .await;
    }

    let start = app.clock_now();
    let report = app
        .state
        .dispatcher
        .process_tenant(tenant_id, TickMode::Scheduled, None)
        .await
        .unwrap();
    assert_eq!(report.processed, 3);
    // Two gaps of five seconds between three sends.
    assert_eq!((app.clock_now() - start).num_seconds(), 10);
}

#[tokio::test]
async fn outside_send_window_dispatches_nothing() {
    let app = common::spawn_app().await;
    let (tenant_id, _) = app.create_tenant("acme").await;
    for i in 0..3 {
        app.enqueue(tenant_id, &format!("+5511{i}"), Priority::High, None)
            .await;
    }
    app.clock.set(common::at(23, 0));

    let report = app
        .state
        .dispatcher
        .process_tenant(tenant_id, TickMode::Scheduled, None)
        .await
        .unwrap();
    assert_eq!(report.skipped, Some(SkipReason::OutsideWindow));
    assert_eq!(report.processed, 0);
    assert!(app.provider.sent().is_empty());

    let snapshot = app.store.snapshot(tenant_id, None).await.unwrap();
    assert_eq!(snapshot.total_queued, 3);
}

#[tokio::test]
async fn send_window_follows_tenant_offset() {
    let app = common::spawn_app().await;
    let (tenant_id, _) = app.create_tenant("acme").await;
    // 12:00 UTC is 09:00 in UTC-3, before a 10:00 start.
    app.configure(
        tenant_id,
        json!({ "utcOffsetMinutes": -180, "sendTimeStart": "10:00" }),
    )
    .await;
    app.enqueue(tenant_id, "+551100", Priority::High, None).await;

    let report = app
        .state
        .dispatcher
        .process_tenant(tenant_id, TickMode::Scheduled, None)
        .await
        .unwrap();
    assert_eq!(report.skipped, Some(SkipReason::OutsideWindow));

    app.clock.set(common::at(13, 30));
    let report = app
        .state
        .dispatcher
        .process_tenant(tenant_id, TickMode::Scheduled, None)
        .await
        .unwrap();
    assert_eq!(report.succeeded, 1);
}

#[tokio::test]
async fn success_on_first_attempt_completes() {
    let app = common::spawn_app().await;
    let (tenant_id, _) = app.create_tenant("acme").await;
    let msg = app.enqueue(tenant_id, "+551100", Priority::Medium, None).await;

    app.state.dispatcher.run_tick().await;

    let done = app.message(tenant_id, msg.id).await;
    assert_eq!(done.status, MessageStatus::Completed);
    assert_eq!(done.retry_count, 0);
    assert!(done.last_error.is_none());
    assert_eq!(done.provider_message_id.as_deref(), Some("wamid.+551100"));
}

#[tokio::test]
async fn exhausted_retries_end_in_failed() {
    let app = common::spawn_app().await;
    let (tenant_id, _) = app.create_tenant("acme").await;
    let msg = app.enqueue(tenant_id, "+551100", Priority::Medium, Some(2)).await;

    app.provider
        .push(Err(ProviderError::Unavailable("gateway 502".into())));
    app.provider
        .push(Err(ProviderError::Unavailable("gateway 503".into())));
    app.provider.push(Err(ProviderError::Timeout));

    let mut statuses = Vec::new();
    for _ in 0..3 {
        app.state.dispatcher.run_tick().await;
        let current = app.message(tenant_id, msg.id).await;
        assert!(current.retry_count <= current.max_retries);
        statuses.push(current.status);
        // Past any backoff so the next tick picks it up.
        app.clock.advance(Duration::from_secs(3600));
    }

    assert_eq!(
        statuses,
        vec![MessageStatus::Retry, MessageStatus::Retry, MessageStatus::Failed]
    );
    let failed = app.message(tenant_id, msg.id).await;
    assert_eq!(failed.retry_count, 2);
    assert_eq!(
        failed.last_error.as_deref(),
        Some(ProviderError::Timeout.to_string().as_str())
    );
    assert_eq!(app.provider.sent().len(), 3);
}

#[tokio::test]
async fn retry_waits_for_backoff() {
    let app = common::spawn_app().await;
    let (tenant_id, _) = app.create_tenant("acme").await;
    let msg = app.enqueue(tenant_id, "+551100", Priority::Medium, None).await;
    app.provider
        .push(Err(ProviderError::Unavailable("busy".into())));

    app.state.dispatcher.run_tick().await;
    let retried = app.message(tenant_id, msg.id).await;
    assert_eq!(retried.status, MessageStatus::Retry);
    assert_eq!(retried.retry_count, 1);
    assert_eq!((retried.not_before - app.clock_now()).num_seconds(), 30);

    // Not yet eligible.
    app.clock.advance(Duration::from_secs(10));
    app.state.dispatcher.run_tick().await;
    assert_eq!(app.provider.sent().len(), 1);

    app.clock.advance(Duration::from_secs(25));
    app.state.dispatcher.run_tick().await;
    let done = app.message(tenant_id, msg.id).await;
    assert_eq!(done.status, MessageStatus::Completed);
    assert_eq!(done.retry_count, 1);
    assert!(done.last_error.is_none());
}

#[tokio::test]
async fn rejection_is_terminal_even_with_retries_enabled() {
    let app = common::spawn_app().await;
    let (tenant_id, _) = app.create_tenant("acme").await;
    let msg = app.enqueue(tenant_id, "not-a-number", Priority::High, None).await;
    app.provider
        .push(Err(ProviderError::Rejected("invalid destination".into())));

    app.state.dispatcher.run_tick().await;

    let failed = app.message(tenant_id, msg.id).await;
    assert_eq!(failed.status, MessageStatus::Failed);
    assert_eq!(failed.retry_count, 0);
    assert!(failed.last_error.unwrap().contains("invalid destination"));
}

#[tokio::test]
async fn disabled_retries_fail_immediately() {
    let app = common::spawn_app().await;
    let (tenant_id, _) = app.create_tenant("acme").await;
    app.configure(tenant_id, json!({ "enableRetries": false })).await;
    let msg = app.enqueue(tenant_id, "+551100", Priority::High, None).await;
    app.provider
        .push(Err(ProviderError::Unavailable("down".into())));

    app.state.dispatcher.run_tick().await;

    let failed = app.message(tenant_id, msg.id).await;
    assert_eq!(failed.status, MessageStatus::Failed);
    assert_eq!(failed.retry_count, 0);
}

#[tokio::test]
async fn channel_without_provider_fails_message() {
    let app = common::spawn_app().await;
    let (tenant_id, _) = app.create_tenant("acme").await;
    let msg = app
        .state
        .queue
        .enqueue(
            tenant_id,
            Channel::Email,
            EnqueueRequest {
                to: "lead@example.com".to_string(),
                content: MessageContent {
                    template_id: None,
                    subject: Some("Bem-vindo".to_string()),
                    body: "Olá".to_string(),
                },
                trigger: Trigger::RewardEarned,
                priority: None,
                max_retries: None,
                client_id: Some("client-9".to_string()),
            },
        )
        .await
        .unwrap();

    app.state.dispatcher.run_tick().await;

    let failed = app.message(tenant_id, msg.id).await;
    assert_eq!(failed.status, MessageStatus::Failed);
    assert!(failed.last_error.unwrap().contains("email"));
}

#[tokio::test]
async fn scheduled_tick_skips_tenants_with_auto_process_off() {
    let app = common::spawn_app().await;
    let (manual, _) = app.create_tenant("manual").await;
    let (auto, _) = app.create_tenant("auto").await;
    app.configure(manual, json!({ "autoProcess": false })).await;
    app.enqueue(manual, "+551101", Priority::High, None).await;
    app.enqueue(auto, "+551102", Priority::High, None).await;

    let reports = app.state.dispatcher.run_tick().await;
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].0, auto);
    assert_eq!(app.provider.sent(), vec!["+551102".to_string()]);

    let report = app
        .state
        .dispatcher
        .process_tenant(manual, TickMode::Scheduled, None)
        .await
        .unwrap();
    assert_eq!(report.skipped, Some(SkipReason::AutoProcessOff));

    let report = app
        .state
        .dispatcher
        .process_tenant(manual, TickMode::Manual, None)
        .await
        .unwrap();
    assert_eq!(report.succeeded, 1);
}

#[tokio::test]
async fn tenants_are_isolated_in_one_tick() {
    let app = common::spawn_app().await;
    let (a, _) = app.create_tenant("tenant-a").await;
    let (b, _) = app.create_tenant("tenant-b").await;
    app.configure(a, json!({ "rateLimitPerMinute": 1 })).await;
    for i in 0..3 {
        app.enqueue(a, &format!("a{i}"), Priority::Medium, None).await;
        app.enqueue(b, &format!("b{i}"), Priority::Medium, None).await;
    }

    app.state.dispatcher.run_tick().await;

    let snap_a = app.store.snapshot(a, None).await.unwrap();
    let snap_b = app.store.snapshot(b, None).await.unwrap();
    assert_eq!(snap_a.completed, 1);
    assert_eq!(snap_b.completed, 3);
}

#[tokio::test]
async fn stuck_processing_messages_are_reclaimed() {
    let app = common::spawn_app().await;
    let (tenant_id, _) = app.create_tenant("acme").await;
    let msg = app.enqueue(tenant_id, "+551100", Priority::High, None).await;
    app.state.queue.dequeue_next_batch(tenant_id, 1).await.unwrap();

    // Younger than the threshold: left alone.
    app.clock.advance(Duration::from_secs(60));
    assert_eq!(
        app.state.queue.reclaim_stuck(Duration::from_secs(600)).await.unwrap(),
        0
    );

    app.clock.advance(Duration::from_secs(600));
    app.state.dispatcher.run_tick().await;

    let done = app.message(tenant_id, msg.id).await;
    assert_eq!(done.status, MessageStatus::Completed);
    assert_eq!(done.retry_count, 0);
    assert_eq!(app.provider.sent().len(), 1);
}

#[tokio::test]
async fn busy_tenant_is_not_processed_twice() {
    let app = common::spawn_app().await;
    let (tenant_id, _) = app.create_tenant("acme").await;
    app.configure(tenant_id, json!({ "delayBetweenMessages": 0 })).await;
    app.enqueue(tenant_id, "+551100", Priority::High, None).await;
    app.enqueue(tenant_id, "+551101", Priority::High, None).await;
    app.provider.set_delay(Duration::from_millis(200));

    let dispatcher = Arc::clone(&app.state.dispatcher);
    let first = tokio::spawn(async move {
        dispatcher
            .process_tenant(tenant_id, TickMode::Manual, None)
            .await
            .unwrap()
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let second = app
        .state
        .dispatcher
        .process_tenant(tenant_id, TickMode::Manual, None)
        .await
        .unwrap();
    assert_eq!(second.skipped, Some(SkipReason::Busy));

    let first = first.await.unwrap();
    assert_eq!(first.succeeded, 2);
    assert_eq!(app.provider.sent().len(), 2);
}

#[tokio::test]
async fn shutdown_releases_unsent_messages() {
    let app = common::spawn_app().await;
    let (tenant_id, _) = app.create_tenant("acme").await;
    app.enqueue(tenant_id, "+551100", Priority::High, None).await;
    app.enqueue(tenant_id, "+551101", Priority::High, None).await;
    app.provider.set_delay(Duration::from_millis(200));

    let dispatcher = Arc::clone(&app.state.dispatcher);
    let tick = tokio::spawn(async move {
        dispatcher
            .process_tenant(tenant_id, TickMode::Manual, None)
            .await
            .unwrap()
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    app.state.dispatcher.begin_shutdown();

    let report = tick.await.unwrap();
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.released, 1);

    let page = app
        .store
        .list(tenant_id, &MessageFilter::default(), 10, 0)
        .await
        .unwrap();
    let statuses: HashSet<_> = page.messages.iter().map(|m| m.status).collect();
    assert!(statuses.contains(&MessageStatus::Completed));
    assert!(statuses.contains(&MessageStatus::Pending));
    assert!(!statuses.contains(&MessageStatus::Processing));
}

#[tokio::test]
async fn failures_are_always_audited_successes_only_when_verbose() {
    let app = common::spawn_app().await;
    let (tenant_id, _) = app.create_tenant("acme").await;
    app.enqueue(tenant_id, "+551100", Priority::High, None).await;
    app.enqueue(tenant_id, "+551101", Priority::Low, None).await;
    app.provider
        .push(Err(ProviderError::Unavailable("down".into())));

    app.state.dispatcher.run_tick().await;

    let events = app.store.list_audit(tenant_id, 50, 0).await.unwrap();
    let actions: Vec<_> = events.iter().map(|e| e.action.as_str()).collect();
    assert!(actions.contains(&"message.retry"));
    assert!(!actions.contains(&"message.completed"));

    app.configure(tenant_id, json!({ "logAllMessages": true })).await;
    app.enqueue(tenant_id, "+551102", Priority::High, None).await;
    app.state.dispatcher.run_tick().await;

    let events = app.store.list_audit(tenant_id, 50, 0).await.unwrap();
    assert!(events.iter().any(|e| e.action == "message.completed"));
}

#[tokio::test]
async fn message_reclaimed_while_waiting_in_batch_is_sent_once() {
    let app = common::spawn_app().await;
    let (tenant_id, _) = app.create_tenant("acme").await;
    app.configure(tenant_id, json!({ "delayBetweenMessages": 400_000 }))
        .await;
    let first = app.enqueue(tenant_id, "+551100", Priority::High, None).await;
    let second = app.enqueue(tenant_id, "+551101", Priority::Medium, None).await;
    let third = app.enqueue(tenant_id, "+551102", Priority::Low, None).await;

    let provider = Arc::new(SweepDuringSend {
        queue: app.state.queue.clone(),
        clock: app.clock.clone(),
        calls: AtomicUsize::new(0),
        sent: Mutex::new(Vec::new()),
    });
    let mut providers = ProviderRegistry::new();
    providers.register(provider.clone());
    let clock: Arc<dyn Clock> = app.clock.clone();
    let dispatcher = Dispatcher::new(
        app.state.queue.clone(),
        app.state.settings.clone(),
        Arc::new(providers),
        clock,
        QueueConfig::default(),
    );

    // Sends at +0s and +400s; the sweep at +650s takes back the third
    // message, claimed at +0s and still waiting for its slot.
    let report = dispatcher
        .process_tenant(tenant_id, TickMode::Scheduled, None)
        .await
        .unwrap();
    assert_eq!(report.processed, 2);
    assert_eq!(app.message(tenant_id, first.id).await.status, MessageStatus::Completed);
    assert_eq!(app.message(tenant_id, second.id).await.status, MessageStatus::Completed);
    let reclaimed = app.message(tenant_id, third.id).await;
    assert_eq!(reclaimed.status, MessageStatus::Retry);
    assert_eq!(
        reclaimed.last_error.as_deref(),
        Some("reclaimed after stalled processing")
    );

    let report = dispatcher
        .process_tenant(tenant_id, TickMode::Scheduled, None)
        .await
        .unwrap();
    assert_eq!(report.succeeded, 1);
    assert_eq!(app.message(tenant_id, third.id).await.status, MessageStatus::Completed);

    let sent = provider.sent.lock().unwrap().clone();
    assert_eq!(sent, vec!["+551100", "+551101", "+551102"]);
}

#[tokio::test]
async fn begin_send_refuses_a_reclaimed_message() {
    let app = common::spawn_app().await;
    let (tenant_id, _) = app.create_tenant("acme").await;
    let kept = app.enqueue(tenant_id, "+551100", Priority::High, None).await;
    let stale = app.enqueue(tenant_id, "+551101", Priority::High, None).await;
    app.state.queue.dequeue_next_batch(tenant_id, 2).await.unwrap();

    app.clock.advance(Duration::from_secs(660));
    app.state.queue.begin_send(kept.id).await.unwrap();
    let reclaimed = app
        .state
        .queue
        .reclaim_stuck(Duration::from_secs(600))
        .await
        .unwrap();
    assert_eq!(reclaimed, 1);

    assert_eq!(app.message(tenant_id, kept.id).await.status, MessageStatus::Processing);
    let err = app.state.queue.begin_send(stale.id).await.unwrap_err();
    assert!(matches!(err, QueueError::InvalidState(_)));
}

#[tokio::test]
async fn window_closing_mid_batch_releases_the_rest() {
    let app = common::spawn_app().await;
    let (tenant_id, _) = app.create_tenant("acme").await;
    app.configure(tenant_id, json!({ "delayBetweenMessages": 60_000 }))
        .await;
    for i in 0..5 {
        app.enqueue(tenant_id, &format!("+5511{i}"), Priority::High, None)
            .await;
    }
    app.clock.set(common::at(19, 58));

    let report = app
        .state
        .dispatcher
        .process_tenant(tenant_id, TickMode::Scheduled, None)
        .await
        .unwrap();

    // 19:58, 19:59 and 20:00 are inside the inclusive window; 20:01 is not.
    assert_eq!(report.processed, 3);
    assert_eq!(report.released, 2);
    assert_eq!(app.provider.sent().len(), 3);
    assert_eq!(app.clock_now(), common::at(20, 1));

    let snapshot = app.store.snapshot(tenant_id, None).await.unwrap();
    assert_eq!(snapshot.completed, 3);
    assert_eq!(snapshot.pending, 2);
    assert_eq!(snapshot.processing, 0);
}

#[tokio::test]
async fn provider_timeout_schedules_a_retry() {
    let app = common::spawn_app_with(Config {
        queue: QueueConfig {
            send_timeout: Duration::from_millis(100),
            ..common::test_config().queue
        },
        ..common::test_config()
    })
    .await;
    let (tenant_id, _) = app.create_tenant("acme").await;
    let msg = app.enqueue(tenant_id, "+551100", Priority::High, None).await;
    app.provider.set_delay(Duration::from_millis(400));

    app.state.dispatcher.run_tick().await;

    let retried = app.message(tenant_id, msg.id).await;
    assert_eq!(retried.status, MessageStatus::Retry);
    assert_eq!(retried.retry_count, 1);
    assert_eq!(retried.last_error.as_deref(), Some("provider timed out"));
}

#[tokio::test]
async fn release_restores_the_status_a_message_was_claimed_from() {
    let app = common::spawn_app().await;
    let (tenant_id, _) = app.create_tenant("acme").await;
    let requeued = app.enqueue(tenant_id, "+551100", Priority::High, None).await;
    let retrying = app.enqueue(tenant_id, "+551101", Priority::Low, None).await;
    app.provider
        .push(Err(ProviderError::Unavailable("down".into())));
    app.provider
        .push(Err(ProviderError::Unavailable("down".into())));
    app.state.dispatcher.run_tick().await;

    // Operator retry: back to pending, lastError kept.
    app.state.queue.retry(tenant_id, requeued.id).await.unwrap();
    app.clock.advance(Duration::from_secs(3600));

    let batch = app.state.queue.dequeue_next_batch(tenant_id, 2).await.unwrap();
    assert_eq!(batch.len(), 2);
    for message in &batch {
        app.state.queue.release(message.id).await.unwrap();
    }

    let after = app.message(tenant_id, requeued.id).await;
    assert_eq!(after.status, MessageStatus::Pending);
    assert!(after.last_error.is_some());
    assert_eq!(app.message(tenant_id, retrying.id).await.status, MessageStatus::Retry);
}

#[tokio::test]
async fn drain_waits_for_background_manual_ticks() {
    let app = common::spawn_app_with(Config {
        queue: QueueConfig {
            process_wait: Duration::from_millis(50),
            ..common::test_config().queue
        },
        ..common::test_config()
    })
    .await;
    let (tenant_id, _) = app.create_tenant("acme").await;
    let first = app.enqueue(tenant_id, "+551100", Priority::High, None).await;
    let second = app.enqueue(tenant_id, "+551101", Priority::Low, None).await;
    app.provider.set_delay(Duration::from_millis(300));

    let outcome = app
        .state
        .dispatcher
        .process_now(tenant_id, 10)
        .await
        .unwrap();
    assert!(matches!(outcome, ProcessOutcome::Accepted));

    app.state.dispatcher.begin_shutdown();
    app.state.dispatcher.drain().await;

    assert_eq!(app.message(tenant_id, first.id).await.status, MessageStatus::Completed);
    assert_eq!(app.message(tenant_id, second.id).await.status, MessageStatus::Pending);
    assert_eq!(app.provider.sent(), vec!["+551100".to_string()]);
}
