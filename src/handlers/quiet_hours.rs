//! # Quiet Hours API Handlers

use axum::{extract::State, http::StatusCode, response::Json};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::{OperatorAuth, TenantExtension, TenantHeader};
use crate::error::{ApiError, not_found};
use crate::models::quiet_hours::Model as QuietHoursModel;
use crate::repositories::QuietHoursRepository;
use crate::repositories::quiet_hours::UpsertQuietHoursRequest;
use crate::server::AppState;

use super::require_tenant;

/// Quiet hours configuration
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct QuietHoursInfo {
    /// Local time the window opens
    #[schema(example = "22:00")]
    pub start_time: String,
    /// Local time the window closes (exclusive); may be earlier than `start_time`
    #[schema(example = "07:00")]
    pub end_time: String,
    #[schema(example = "Europe/Berlin")]
    pub timezone: String,
    /// Hold notifications all Saturday and Sunday as well
    pub quiet_weekends: bool,
    pub updated_at: String,
}

impl From<QuietHoursModel> for QuietHoursInfo {
    fn from(model: QuietHoursModel) -> Self {
        Self {
            start_time: model.start_time,
            end_time: model.end_time,
            timezone: model.timezone,
            quiet_weekends: model.quiet_weekends,
            updated_at: model.updated_at.to_rfc3339(),
        }
    }
}

/// Request payload for setting quiet hours
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UpsertQuietHoursDto {
    #[schema(example = "22:00")]
    pub start_time: String,
    #[schema(example = "07:00")]
    pub end_time: String,
    /// IANA zone, defaults to UTC
    #[schema(example = "Europe/Berlin")]
    pub timezone: Option<String>,
    pub quiet_weekends: Option<bool>,
}

/// Get the tenant's quiet hours
#[utoipa::path(
    get,
    path = "/api/v1/quiet-hours",
    security(("bearer_auth" = [])),
    params(TenantHeader),
    responses(
        (status = 200, description = "Quiet hours configuration", body = QuietHoursInfo),
        (status = 404, description = "No quiet hours configured", body = ApiError)
    ),
    tag = "quiet-hours"
)]
pub async fn get_quiet_hours(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    TenantExtension(tenant): TenantExtension,
) -> Result<Json<QuietHoursInfo>, ApiError> {
    let config = QuietHoursRepository::new(&state.db)
        .get_quiet_hours_config(tenant.0)
        .await?
        .ok_or_else(|| not_found("No quiet hours configured"))?;
    Ok(Json(config.into()))
}

/// Create or replace the tenant's quiet hours
#[utoipa::path(
    put,
    path = "/api/v1/quiet-hours",
    security(("bearer_auth" = [])),
    params(TenantHeader),
    request_body = UpsertQuietHoursDto,
    responses(
        (status = 200, description = "Quiet hours saved", body = QuietHoursInfo),
        (status = 400, description = "Invalid time or timezone", body = ApiError),
        (status = 404, description = "Tenant not found", body = ApiError)
    ),
    tag = "quiet-hours"
)]
pub async fn put_quiet_hours(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    TenantExtension(tenant): TenantExtension,
    Json(request): Json<UpsertQuietHoursDto>,
) -> Result<Json<QuietHoursInfo>, ApiError> {
    require_tenant(&state.db, tenant.0).await?;

    let config = QuietHoursRepository::new(&state.db)
        .upsert_quiet_hours_config(
            tenant.0,
            UpsertQuietHoursRequest {
                start_time: request.start_time,
                end_time: request.end_time,
                timezone: request.timezone,
                quiet_weekends: request.quiet_weekends,
            },
        )
        .await?;
    Ok(Json(config.into()))
}

/// Remove the tenant's quiet hours
#[utoipa::path(
    delete,
    path = "/api/v1/quiet-hours",
    security(("bearer_auth" = [])),
    params(TenantHeader),
    responses(
        (status = 204, description = "Quiet hours removed"),
        (status = 404, description = "No quiet hours configured", body = ApiError)
    ),
    tag = "quiet-hours"
)]
pub async fn delete_quiet_hours(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    TenantExtension(tenant): TenantExtension,
) -> Result<StatusCode, ApiError> {
    let deleted = QuietHoursRepository::new(&state.db)
        .delete_quiet_hours_config(tenant.0)
        .await?;
    if !deleted {
        return Err(not_found("No quiet hours configured"));
    }
    Ok(StatusCode::NO_CONTENT)
}
