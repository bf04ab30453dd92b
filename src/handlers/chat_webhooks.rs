//! # Chat Webhook API Handlers
//!
//! Registration of Google Chat destinations. Destination URLs carry
//! credentials, so responses only expose `scheme://host`.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::{OperatorAuth, TenantExtension, TenantHeader};
use crate::chat::redacted_target;
use crate::error::ApiError;
use crate::models::chat_webhook::Model as ChatWebhookModel;
use crate::repositories::ChatWebhookRepository;
use crate::repositories::chat_webhook::CreateChatWebhookRequest;
use crate::server::AppState;

use super::require_tenant;

/// Chat webhook information response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ChatWebhookInfo {
    #[schema(example = "550e8400-e29b-41d4-a716-446655440000")]
    pub id: String,
    #[schema(example = "Sales room")]
    pub name: String,
    /// Redacted destination
    #[schema(example = "https://chat.googleapis.com")]
    pub target: String,
    pub is_active: bool,
    pub consecutive_failures: i32,
    pub last_failure_at: Option<String>,
    pub created_at: String,
}

impl From<ChatWebhookModel> for ChatWebhookInfo {
    fn from(model: ChatWebhookModel) -> Self {
        Self {
            id: model.id.to_string(),
            name: model.name,
            target: redacted_target(&model.url),
            is_active: model.is_active,
            consecutive_failures: model.consecutive_failures,
            last_failure_at: model.last_failure_at.map(|dt| dt.to_rfc3339()),
            created_at: model.created_at.to_rfc3339(),
        }
    }
}

/// Response payload for the chat webhook listing endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ChatWebhooksResponse {
    pub webhooks: Vec<ChatWebhookInfo>,
}

/// Request payload for registering a chat webhook
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateChatWebhookDto {
    #[schema(example = "Sales room")]
    pub name: String,
    /// Google Chat incoming-webhook URL (https)
    #[schema(example = "https://chat.googleapis.com/v1/spaces/AAA/messages?key=...&token=...")]
    pub url: String,
}

/// List the tenant's chat webhooks
#[utoipa::path(
    get,
    path = "/api/v1/chat-webhooks",
    security(("bearer_auth" = [])),
    params(TenantHeader),
    responses(
        (status = 200, description = "Chat webhooks for the tenant", body = ChatWebhooksResponse),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError)
    ),
    tag = "chat-webhooks"
)]
pub async fn list_chat_webhooks(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    TenantExtension(tenant): TenantExtension,
) -> Result<Json<ChatWebhooksResponse>, ApiError> {
    let webhooks = ChatWebhookRepository::new(&state.db)
        .list_webhooks(tenant.0)
        .await?;
    Ok(Json(ChatWebhooksResponse {
        webhooks: webhooks.into_iter().map(ChatWebhookInfo::from).collect(),
    }))
}

/// Register a chat webhook
#[utoipa::path(
    post,
    path = "/api/v1/chat-webhooks",
    security(("bearer_auth" = [])),
    params(TenantHeader),
    request_body = CreateChatWebhookDto,
    responses(
        (status = 201, description = "Chat webhook created", body = ChatWebhookInfo),
        (status = 400, description = "Validation failed", body = ApiError),
        (status = 404, description = "Tenant not found", body = ApiError)
    ),
    tag = "chat-webhooks"
)]
pub async fn create_chat_webhook(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    TenantExtension(tenant): TenantExtension,
    Json(request): Json<CreateChatWebhookDto>,
) -> Result<(StatusCode, Json<ChatWebhookInfo>), ApiError> {
    require_tenant(&state.db, tenant.0).await?;

    let webhook = ChatWebhookRepository::new(&state.db)
        .create_webhook(
            tenant.0,
            CreateChatWebhookRequest {
                name: request.name,
                url: request.url,
            },
        )
        .await?;

    tracing::info!(
        tenant_id = %tenant.0,
        webhook_id = %webhook.id,
        target = %redacted_target(&webhook.url),
        "Chat webhook registered"
    );
    Ok((StatusCode::CREATED, Json(webhook.into())))
}

/// Delete a chat webhook
#[utoipa::path(
    delete,
    path = "/api/v1/chat-webhooks/{id}",
    security(("bearer_auth" = [])),
    params(
        ("id" = Uuid, Path, description = "Chat webhook UUID"),
        TenantHeader
    ),
    responses(
        (status = 204, description = "Chat webhook deleted"),
        (status = 404, description = "Chat webhook not found", body = ApiError),
        (status = 409, description = "An enabled rule still targets this webhook", body = ApiError)
    ),
    tag = "chat-webhooks"
)]
pub async fn delete_chat_webhook(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    TenantExtension(tenant): TenantExtension,
    Path(webhook_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    ChatWebhookRepository::new(&state.db)
        .delete_webhook(tenant.0, webhook_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
