use axum::Json;
use axum::extract::{Path, State};
use serde_json::json;

use super::parse_channel;
use crate::auth::extractor::AuthUser;
use crate::db::NewAuditEvent;
use crate::error::AppError;
use crate::middleware::audit;
use crate::models::{SettingsUpdate, TenantQueueSettings};
use crate::state::SharedState;

pub async fn get(
    auth: AuthUser,
    State(state): State<SharedState>,
    Path(channel): Path<String>,
) -> Result<Json<TenantQueueSettings>, AppError> {
    parse_channel(&channel)?;
    let settings = state.settings.get(auth.tenant_id).await?;
    Ok(Json(settings))
}

pub async fn upsert(
    auth: AuthUser,
    State(state): State<SharedState>,
    Path(channel): Path<String>,
    Json(update): Json<SettingsUpdate>,
) -> Result<Json<TenantQueueSettings>, AppError> {
    auth.require_tenant_admin()?;
    parse_channel(&channel)?;

    let settings = state.settings.upsert(auth.tenant_id, &update).await?;

    audit::log_event(
        state.store.as_ref(),
        state.clock.as_ref(),
        NewAuditEvent {
            tenant_id: auth.tenant_id,
            user_id: Some(auth.user_id),
            action: "settings.updated".to_string(),
            resource_type: "settings".to_string(),
            resource_id: None,
            details: Some(json!({
                "rateLimitPerMinute": settings.rate_limit_per_minute,
                "delayBetweenMessages": settings.delay_between_messages,
                "autoProcess": settings.auto_process,
                "enableRetries": settings.enable_retries,
            })),
        },
    )
    .await;

    Ok(Json(settings))
}
