use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use super::parse_channel;
use crate::auth::extractor::AuthUser;
use crate::db::NewAuditEvent;
use crate::dispatcher::ProcessOutcome;
use crate::error::{AppError, QueueError};
use crate::middleware::audit;
use crate::models::{AuditEvent, MessageFilter, MessageStatus, Priority, QueueSnapshot, QueuedMessage};
use crate::queue::EnqueueRequest;
use crate::state::SharedState;

const DEFAULT_PAGE_SIZE: u32 = 20;
const MAX_PAGE_SIZE: u32 = 100;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
    pub page: Option<String>,
    pub limit: Option<String>,
    pub priority: Option<String>,
    pub status: Option<String>,
    pub client_id: Option<String>,
}

#[derive(Deserialize)]
pub struct PageParams {
    pub page: Option<String>,
    pub limit: Option<String>,
}

#[derive(Deserialize)]
pub struct ProcessRequest {
    pub limit: Option<u32>,
}

/// Message as shown on the dashboard.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    #[serde(flatten)]
    pub message: QueuedMessage,
    pub status_label: &'static str,
}

impl From<QueuedMessage> for MessageView {
    fn from(message: QueuedMessage) -> Self {
        let status_label = message.status.label();
        Self {
            message,
            status_label,
        }
    }
}

#[derive(Serialize)]
pub struct MessageList {
    pub messages: Vec<MessageView>,
    pub total: i64,
}

fn parse_page(page: Option<&str>, limit: Option<&str>) -> Result<(u32, u32), AppError> {
    let page = match page.filter(|s| !s.is_empty()) {
        Some(raw) => raw
            .parse::<u32>()
            .ok()
            .filter(|p| *p >= 1)
            .ok_or_else(|| AppError::BadRequest("page must be a positive integer".to_string()))?,
        None => 1,
    };
    let limit = match limit.filter(|s| !s.is_empty()) {
        Some(raw) => raw
            .parse::<u32>()
            .ok()
            .filter(|l| (1..=MAX_PAGE_SIZE).contains(l))
            .ok_or_else(|| {
                AppError::BadRequest(format!("limit must be between 1 and {MAX_PAGE_SIZE}"))
            })?,
        None => DEFAULT_PAGE_SIZE,
    };
    Ok((page, limit))
}

fn not_found_on_other_channel(
    message: QueuedMessage,
    channel: crate::models::Channel,
) -> Result<QueuedMessage, AppError> {
    if message.channel == channel {
        Ok(message)
    } else {
        Err(QueueError::MessageNotFound.into())
    }
}

pub async fn status(
    auth: AuthUser,
    State(state): State<SharedState>,
    Path(channel): Path<String>,
) -> Result<Json<QueueSnapshot>, AppError> {
    let channel = parse_channel(&channel)?;
    let snapshot = state.queue.snapshot(auth.tenant_id, Some(channel)).await?;
    Ok(Json(snapshot))
}

pub async fn list(
    auth: AuthUser,
    State(state): State<SharedState>,
    Path(channel): Path<String>,
    Query(params): Query<ListParams>,
) -> Result<Json<MessageList>, AppError> {
    let channel = parse_channel(&channel)?;
    let (page, limit) = parse_page(params.page.as_deref(), params.limit.as_deref())?;

    let priority = params
        .priority
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(|p| {
            Priority::parse(p)
                .ok_or_else(|| AppError::BadRequest(format!("Unknown priority: {p}")))
        })
        .transpose()?;
    let status = params
        .status
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(|s| {
            MessageStatus::parse(s)
                .ok_or_else(|| AppError::BadRequest(format!("Unknown status: {s}")))
        })
        .transpose()?;

    let filter = MessageFilter {
        channel: Some(channel),
        priority,
        status,
        client_id: params.client_id.filter(|c| !c.is_empty()),
    };

    let page = state.queue.list(auth.tenant_id, &filter, page, limit).await?;
    Ok(Json(MessageList {
        messages: page.messages.into_iter().map(MessageView::from).collect(),
        total: page.total,
    }))
}

pub async fn get(
    auth: AuthUser,
    State(state): State<SharedState>,
    Path((channel, id)): Path<(String, Uuid)>,
) -> Result<Json<MessageView>, AppError> {
    let channel = parse_channel(&channel)?;
    let message = state.queue.get(auth.tenant_id, id).await?;
    let message = not_found_on_other_channel(message, channel)?;
    Ok(Json(message.into()))
}

pub async fn enqueue(
    auth: AuthUser,
    State(state): State<SharedState>,
    Path(channel): Path<String>,
    Json(req): Json<EnqueueRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    auth.require_tenant_admin()?;
    let channel = parse_channel(&channel)?;

    let message = state.queue.enqueue(auth.tenant_id, channel, req).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "id": message.id, "status": message.status })),
    ))
}

pub async fn retry(
    auth: AuthUser,
    State(state): State<SharedState>,
    Path((channel, id)): Path<(String, Uuid)>,
) -> Result<Json<MessageView>, AppError> {
    auth.require_tenant_admin()?;
    let channel = parse_channel(&channel)?;
    not_found_on_other_channel(state.queue.get(auth.tenant_id, id).await?, channel)?;

    let message = state.queue.retry(auth.tenant_id, id).await?;

    audit::log_event(
        state.store.as_ref(),
        state.clock.as_ref(),
        NewAuditEvent {
            tenant_id: auth.tenant_id,
            user_id: Some(auth.user_id),
            action: "message.retried_manually".to_string(),
            resource_type: "message".to_string(),
            resource_id: Some(id),
            details: Some(json!({ "retryCount": message.retry_count })),
        },
    )
    .await;

    Ok(Json(message.into()))
}

pub async fn delete(
    auth: AuthUser,
    State(state): State<SharedState>,
    Path((channel, id)): Path<(String, Uuid)>,
) -> Result<Json<serde_json::Value>, AppError> {
    auth.require_tenant_admin()?;
    let channel = parse_channel(&channel)?;
    let message = not_found_on_other_channel(state.queue.get(auth.tenant_id, id).await?, channel)?;

    state.queue.delete(auth.tenant_id, id).await?;

    audit::log_event(
        state.store.as_ref(),
        state.clock.as_ref(),
        NewAuditEvent {
            tenant_id: auth.tenant_id,
            user_id: Some(auth.user_id),
            action: "message.deleted".to_string(),
            resource_type: "message".to_string(),
            resource_id: Some(id),
            details: Some(json!({ "status": message.status })),
        },
    )
    .await;

    Ok(Json(json!({ "message": "Deleted" })))
}

pub async fn process(
    auth: AuthUser,
    State(state): State<SharedState>,
    Path(channel): Path<String>,
    body: Option<Json<ProcessRequest>>,
) -> Result<Response, AppError> {
    auth.require_tenant_admin()?;
    parse_channel(&channel)?;

    let limit = body
        .and_then(|Json(req)| req.limit)
        .unwrap_or(state.config.queue.max_batch);

    let outcome = state.dispatcher.process_now(auth.tenant_id, limit).await?;

    let details = match &outcome {
        ProcessOutcome::Finished(report) => serde_json::to_value(report).ok(),
        ProcessOutcome::Accepted => Some(json!({ "status": "accepted" })),
    };
    audit::log_event(
        state.store.as_ref(),
        state.clock.as_ref(),
        NewAuditEvent {
            tenant_id: auth.tenant_id,
            user_id: Some(auth.user_id),
            action: "queue.processed".to_string(),
            resource_type: "queue".to_string(),
            resource_id: None,
            details,
        },
    )
    .await;

    Ok(match outcome {
        ProcessOutcome::Finished(report) => (StatusCode::OK, Json(report)).into_response(),
        ProcessOutcome::Accepted => {
            (StatusCode::ACCEPTED, Json(json!({ "status": "accepted" }))).into_response()
        }
    })
}

pub async fn audit(
    auth: AuthUser,
    State(state): State<SharedState>,
    Path(channel): Path<String>,
    Query(params): Query<PageParams>,
) -> Result<Json<Vec<AuditEvent>>, AppError> {
    auth.require_tenant_admin()?;
    parse_channel(&channel)?;
    let (page, limit) = parse_page(params.page.as_deref(), params.limit.as_deref())?;

    let offset = i64::from(page - 1) * i64::from(limit);
    let events = state
        .store
        .list_audit(auth.tenant_id, i64::from(limit), offset)
        .await?;
    Ok(Json(events))
}
