pub mod auth;
pub mod clock;
pub mod config;
pub mod db;
pub mod dispatcher;
pub mod error;
pub mod middleware;
pub mod models;
pub mod providers;
pub mod queue;
pub mod rate_limit;
pub mod retry;
pub mod routes;
pub mod settings;
pub mod state;
pub mod window;

use std::sync::Arc;

use axum::Router;
use axum::http::{HeaderName, HeaderValue};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::clock::Clock;
use crate::config::Config;
use crate::db::QueueStore;
use crate::dispatcher::Dispatcher;
use crate::providers::ProviderRegistry;
use crate::queue::MessageQueue;
use crate::settings::SettingsStore;
use crate::state::{AppState, SharedState};

/// Wire the engine together and build the HTTP router. The returned state
/// holds the dispatcher so the caller can start the scheduler.
pub fn build_app(
    store: Arc<dyn QueueStore>,
    providers: ProviderRegistry,
    clock: Arc<dyn Clock>,
    config: Config,
) -> (Router, SharedState) {
    let queue = MessageQueue::new(store.clone(), clock.clone());
    let settings = SettingsStore::new(store.clone(), clock.clone());
    let dispatcher = Arc::new(Dispatcher::new(
        queue.clone(),
        settings.clone(),
        Arc::new(providers),
        clock.clone(),
        config.queue.clone(),
    ));

    let max_body_size = config.max_body_size;
    let state: SharedState = Arc::new(AppState {
        config,
        store,
        clock,
        queue,
        settings,
        dispatcher,
    });

    let router = Router::new()
        .merge(routes::api_routes())
        .route("/health", axum::routing::get(health))
        .layer(RequestBodyLimitLayer::new(max_body_size))
        .layer(TraceLayer::new_for_http())
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("x-content-type-options"),
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("cache-control"),
            HeaderValue::from_static("no-store"),
        ))
        .with_state(state.clone());

    (router, state)
}

async fn health() -> &'static str {
    "ok"
}
