use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde::Deserialize;

use crate::auth::extractor::AuthUser;
use crate::db::NewAuditEvent;
use crate::error::AppError;
use crate::middleware::audit;
use crate::models::Tenant;
use crate::state::SharedState;

#[derive(Deserialize)]
pub struct CreateTenant {
    pub name: String,
    pub slug: String,
}

fn valid_slug(slug: &str) -> bool {
    !slug.is_empty()
        && slug.len() <= 64
        && !slug.starts_with('-')
        && !slug.ends_with('-')
        && slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

pub async fn list_tenants(
    auth: AuthUser,
    State(state): State<SharedState>,
) -> Result<Json<Vec<Tenant>>, AppError> {
    auth.require_system_admin()?;
    let tenants = state.store.list_tenants().await?;
    Ok(Json(tenants))
}

pub async fn create_tenant(
    auth: AuthUser,
    State(state): State<SharedState>,
    Json(req): Json<CreateTenant>,
) -> Result<(StatusCode, Json<Tenant>), AppError> {
    auth.require_system_admin()?;

    let name = req.name.trim();
    if name.is_empty() {
        return Err(AppError::BadRequest("name is required".to_string()));
    }
    if !valid_slug(&req.slug) {
        return Err(AppError::BadRequest(
            "slug must be lowercase letters, digits and dashes".to_string(),
        ));
    }

    let tenant = state
        .store
        .create_tenant(name, &req.slug, state.clock.now())
        .await?;

    audit::log_event(
        state.store.as_ref(),
        state.clock.as_ref(),
        NewAuditEvent {
            tenant_id: tenant.id,
            user_id: Some(auth.user_id),
            action: "tenant.created".to_string(),
            resource_type: "tenant".to_string(),
            resource_id: Some(tenant.id),
            details: None,
        },
    )
    .await;

    tracing::info!(tenant_id = %tenant.id, slug = %tenant.slug, "Tenant created");
    Ok((StatusCode::CREATED, Json(tenant)))
}
