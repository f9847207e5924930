pub mod admin;
pub mod queue;
pub mod settings;

use axum::Router;
use axum::routing::{get, post};

use crate::error::AppError;
use crate::models::Channel;
use crate::state::SharedState;

pub fn api_routes() -> Router<SharedState> {
    Router::new()
        // Queue
        .route("/admin/{channel}/queue/status", get(queue::status))
        .route(
            "/admin/{channel}/queue/messages",
            get(queue::list).post(queue::enqueue),
        )
        .route(
            "/admin/{channel}/queue/messages/{id}",
            get(queue::get).delete(queue::delete),
        )
        .route(
            "/admin/{channel}/queue/messages/{id}/retry",
            post(queue::retry),
        )
        .route("/admin/{channel}/queue/process", post(queue::process))
        .route("/admin/{channel}/queue/audit", get(queue::audit))
        // Settings
        .route(
            "/admin/{channel}/queue/settings",
            get(settings::get).post(settings::upsert),
        )
        // System admin
        .route(
            "/api/v1/admin/tenants",
            get(admin::list_tenants).post(admin::create_tenant),
        )
}

/// Unknown channels behave like unknown routes.
pub(crate) fn parse_channel(raw: &str) -> Result<Channel, AppError> {
    Channel::parse(raw).ok_or_else(|| AppError::NotFound(format!("Unknown channel: {raw}")))
}
