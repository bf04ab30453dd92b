//! # API Handlers
//!
//! HTTP endpoint handlers: public Pipedrive ingestion plus the thin,
//! operator-authenticated dashboard surface.

pub mod chat_webhooks;
pub mod delivery_logs;
pub mod quiet_hours;
pub mod rules;
pub mod tenants;
pub mod webhooks;

use axum::{extract::State, response::Json};
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::db;
use crate::error::{ApiError, ErrorType, not_found};
use crate::models::ServiceInfo;
use crate::models::tenant::Model as TenantModel;
use crate::repositories::TenantRepository;
use crate::server::AppState;

/// Root handler that returns basic service information
#[utoipa::path(
    get,
    path = "/",
    responses(
        (status = 200, description = "Service information", body = ServiceInfo)
    ),
    tag = "root"
)]
pub async fn root() -> Json<ServiceInfo> {
    Json(ServiceInfo::default())
}

/// Health check response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    #[schema(example = "ok")]
    pub status: String,
}

/// Liveness plus database reachability
#[utoipa::path(
    get,
    path = "/healthz",
    responses(
        (status = 200, description = "Service and database healthy", body = HealthResponse),
        (status = 503, description = "Database unreachable", body = ApiError)
    ),
    tag = "root"
)]
pub async fn healthz(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    db::health_check(&state.db).await.map_err(|err| {
        tracing::warn!(error = %err, "Health check failed");
        ApiError::from(ErrorType::ServiceUnavailable)
    })?;

    Ok(Json(HealthResponse {
        status: "ok".to_string(),
    }))
}

/// Loads the tenant named by `X-Tenant-Id`, 404 when it does not exist.
pub(crate) async fn require_tenant(
    db: &DatabaseConnection,
    tenant_id: Uuid,
) -> Result<TenantModel, ApiError> {
    TenantRepository::new(db)
        .get_tenant_by_id(tenant_id)
        .await?
        .ok_or_else(|| not_found("Tenant not found"))
}
