//! # Tenants API Handlers
//!
//! Operator endpoints for creating and inspecting tenants. Tenants are never
//! deleted; cancellation is a subscription status.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::OperatorAuth;
use crate::error::ApiError;
use crate::models::tenant::Model as TenantModel;
use crate::pipeline::quota::Plan;
use crate::repositories::TenantRepository;
use crate::repositories::tenant::CreateTenantRequest;
use crate::server::AppState;

use super::require_tenant;

/// Request payload for creating a new tenant
#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct CreateTenantRequestDto {
    /// Display name for the tenant (max 255 characters)
    #[schema(example = "Acme Corp")]
    pub name: Option<String>,
    /// Pipedrive company id to bind immediately
    #[schema(example = "1234567")]
    pub pipedrive_company_id: Option<String>,
    /// Subscription plan, defaults to `free`
    pub plan: Option<Plan>,
    /// Per-tenant HMAC secret for inbound webhooks
    pub webhook_secret: Option<String>,
}

/// Tenant as exposed to operators; the webhook secret is never echoed
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TenantInfo {
    #[schema(example = "550e8400-e29b-41d4-a716-446655440000")]
    pub id: String,
    #[schema(example = "Acme Corp")]
    pub name: Option<String>,
    pub pipedrive_company_id: Option<String>,
    #[schema(example = "free")]
    pub plan: String,
    #[schema(example = "active")]
    pub subscription_status: String,
    pub has_webhook_secret: bool,
    #[schema(example = "2024-01-15T10:30:00Z")]
    pub created_at: String,
}

impl From<TenantModel> for TenantInfo {
    fn from(model: TenantModel) -> Self {
        Self {
            id: model.id.to_string(),
            name: model.name,
            pipedrive_company_id: model.pipedrive_company_id,
            plan: model.plan,
            subscription_status: model.subscription_status,
            has_webhook_secret: model.webhook_secret.is_some_and(|secret| !secret.is_empty()),
            created_at: model.created_at.to_rfc3339(),
        }
    }
}

/// Create a new tenant
#[utoipa::path(
    post,
    path = "/api/v1/tenants",
    security(("bearer_auth" = [])),
    request_body = CreateTenantRequestDto,
    responses(
        (status = 201, description = "Tenant created successfully", body = TenantInfo, headers(
            ("Location", description = "URL of the created tenant")
        )),
        (status = 400, description = "Validation failed", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 409, description = "Pipedrive account already bound to a tenant", body = ApiError)
    ),
    tag = "tenants"
)]
pub async fn create_tenant(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Json(request): Json<CreateTenantRequestDto>,
) -> Result<(StatusCode, [(&'static str, String); 1], Json<TenantInfo>), ApiError> {
    let name = request
        .name
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty());

    let tenant = TenantRepository::new(&state.db)
        .create_tenant(CreateTenantRequest {
            name,
            pipedrive_company_id: request.pipedrive_company_id,
            plan: request.plan.map(|plan| plan.as_str().to_string()),
            webhook_secret: request.webhook_secret,
        })
        .await?;

    tracing::info!(tenant_id = %tenant.id, plan = %tenant.plan, "Tenant created");
    let location = format!("/api/v1/tenants/{}", tenant.id);
    Ok((
        StatusCode::CREATED,
        [("Location", location)],
        Json(tenant.into()),
    ))
}

/// Get a tenant by ID
#[utoipa::path(
    get,
    path = "/api/v1/tenants/{id}",
    security(("bearer_auth" = [])),
    params(
        ("id" = Uuid, Path, description = "Tenant UUID")
    ),
    responses(
        (status = 200, description = "Tenant retrieved successfully", body = TenantInfo),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "Tenant not found", body = ApiError)
    ),
    tag = "tenants"
)]
pub async fn get_tenant(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(tenant_id): Path<Uuid>,
) -> Result<Json<TenantInfo>, ApiError> {
    let tenant = require_tenant(&state.db, tenant_id).await?;
    Ok(Json(tenant.into()))
}
