#![allow(dead_code)]

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::{Client, StatusCode};
use serde_json::{Value, json};
use uuid::Uuid;

use outreach_queue::auth::jwt::{self, Claims, Role};
use outreach_queue::clock::{Clock, ManualClock};
use outreach_queue::config::{Config, QueueConfig};
use outreach_queue::db::{MemoryStore, QueueStore};
use outreach_queue::models::{Channel, MessageContent, Priority, QueuedMessage, Trigger};
use outreach_queue::providers::{ProviderAdapter, ProviderError, ProviderRegistry, SendReceipt};
use outreach_queue::queue::EnqueueRequest;
use outreach_queue::state::SharedState;

pub const JWT_SECRET: &str = "test-jwt-secret-that-is-long-enough";

/// Tuesday noon UTC, inside the default 08:00-20:00 window.
pub fn noon() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap()
}

pub fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 10, hour, minute, 0).unwrap()
}

/// Provider whose answers are queued up by the test. Sends succeed once the
/// script runs out.
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<SendReceipt, ProviderError>>>,
    sent: Mutex<Vec<String>>,
    delay: Mutex<Duration>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
            delay: Mutex::new(Duration::ZERO),
        }
    }

    pub fn push(&self, outcome: Result<SendReceipt, ProviderError>) {
        self.script.lock().unwrap().push_back(outcome);
    }

    /// Hold every send for `delay` of real time.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    /// Destinations in the order they were attempted.
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedProvider {
    fn channel(&self) -> Channel {
        Channel::Whatsapp
    }

    fn name(&self) -> &str {
        "scripted"
    }

    async fn send(
        &self,
        to: &str,
        _content: &MessageContent,
        _timeout: Duration,
    ) -> Result<SendReceipt, ProviderError> {
        self.sent.lock().unwrap().push(to.to_string());
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| {
            Ok(SendReceipt {
                provider_message_id: Some(format!("wamid.{to}")),
            })
        })
    }
}

pub struct TestApp {
    pub addr: SocketAddr,
    pub client: Client,
    pub state: SharedState,
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub provider: Arc<ScriptedProvider>,
    pub admin_token: String,
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn clock_now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Token for a member of `tenant_id` with the given role.
    pub fn token_for(&self, tenant_id: Uuid, role: Role) -> String {
        let claims = Claims::expiring_in(
            Uuid::now_v7(),
            tenant_id,
            role,
            false,
            chrono::Duration::minutes(15),
        );
        jwt::encode_token(&claims, JWT_SECRET).unwrap()
    }

    /// Create a tenant through the admin API and return its id with an
    /// owner token.
    pub async fn create_tenant(&self, slug: &str) -> (Uuid, String) {
        let (body, status) = self
            .post_auth(
                "/api/v1/admin/tenants",
                &self.admin_token,
                &json!({ "name": slug, "slug": slug }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "create tenant failed: {body}");
        let id: Uuid = body["id"].as_str().unwrap().parse().unwrap();
        (id, self.token_for(id, Role::Owner))
    }

    /// Enqueue directly through the engine.
    pub async fn enqueue(
        &self,
        tenant_id: Uuid,
        to: &str,
        priority: Priority,
        max_retries: Option<i32>,
    ) -> QueuedMessage {
        self.state
            .queue
            .enqueue(
                tenant_id,
                Channel::Whatsapp,
                EnqueueRequest {
                    to: to.to_string(),
                    content: MessageContent {
                        template_id: None,
                        subject: None,
                        body: format!("hello {to}"),
                    },
                    trigger: Trigger::LeadIndicated,
                    priority: Some(priority),
                    max_retries,
                    client_id: None,
                },
            )
            .await
            .unwrap()
    }

    pub async fn message(&self, tenant_id: Uuid, id: Uuid) -> QueuedMessage {
        self.store.get(tenant_id, id).await.unwrap()
    }

    /// Update settings through the engine.
    pub async fn configure(&self, tenant_id: Uuid, update: Value) {
        let update = serde_json::from_value(update).unwrap();
        self.state.settings.upsert(tenant_id, &update).await.unwrap();
    }

    pub async fn get_auth(&self, path: &str, token: &str) -> (Value, StatusCode) {
        let resp = self
            .client
            .get(self.url(path))
            .bearer_auth(token)
            .send()
            .await
            .expect("get request failed");
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(json!(null));
        (body, status)
    }

    pub async fn post_auth(&self, path: &str, token: &str, body: &Value) -> (Value, StatusCode) {
        let resp = self
            .client
            .post(self.url(path))
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .expect("post request failed");
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(json!(null));
        (body, status)
    }

    pub async fn delete_auth(&self, path: &str, token: &str) -> (Value, StatusCode) {
        let resp = self
            .client
            .delete(self.url(path))
            .bearer_auth(token)
            .send()
            .await
            .expect("delete request failed");
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(json!(null));
        (body, status)
    }
}

pub fn test_config() -> Config {
    Config {
        database_url: None,
        jwt_secret: JWT_SECRET.to_string(),
        host: "127.0.0.1".parse().unwrap(),
        port: 0,
        max_body_size: 1_048_576,
        log_level: "warn".to_string(),
        queue: QueueConfig {
            send_timeout: Duration::from_secs(2),
            process_wait: Duration::from_secs(5),
            ..QueueConfig::default()
        },
        whatsapp: None,
        smtp: None,
    }
}

/// Spawn the router on a random port over an in-memory store, a scripted
/// WhatsApp provider and a manual clock set to [`noon`].
pub async fn spawn_app() -> TestApp {
    spawn_app_with(test_config()).await
}

pub async fn spawn_app_with(config: Config) -> TestApp {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(noon()));
    let provider = Arc::new(ScriptedProvider::new());

    let mut providers = ProviderRegistry::new();
    providers.register(provider.clone());

    let (app, state) = outreach_queue::build_app(store.clone(), providers, clock.clone(), config);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind to random port");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("Server failed");
    });

    let admin_claims = Claims::expiring_in(
        Uuid::now_v7(),
        Uuid::now_v7(),
        Role::Owner,
        true,
        chrono::Duration::minutes(15),
    );
    let admin_token = jwt::encode_token(&admin_claims, JWT_SECRET).unwrap();

    TestApp {
        addr,
        client: Client::new(),
        state,
        store,
        clock,
        provider,
        admin_token,
    }
}
