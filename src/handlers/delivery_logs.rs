//! # Delivery Log API Handlers
//!
//! Read-only delivery history, newest first.

use axum::{
    extract::{Query, State},
    response::Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use utoipa::{IntoParams, ToSchema};

use crate::auth::{OperatorAuth, TenantExtension, TenantHeader};
use crate::error::{ApiError, validation_error};
use crate::models::delivery_log::{
    Model as DeliveryLogModel, STATUS_FAILED, STATUS_RETRYING, STATUS_SKIPPED_QUOTA,
    STATUS_SUCCESS,
};
use crate::repositories::DeliveryLogRepository;
use crate::repositories::delivery_log::DeliveryLogQuery;
use crate::server::AppState;

const MAX_LIMIT: u64 = 500;

/// Query parameters for listing delivery logs
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListDeliveryLogsQuery {
    /// Filter by status (success, retrying, failed, skipped_quota)
    pub status: Option<String>,
    /// Filter by exact event type, e.g. `deal.won`
    pub event_type: Option<String>,
    /// Maximum number of entries (default 50, max 500)
    pub limit: Option<u64>,
    /// Number of entries to skip
    pub offset: Option<u64>,
}

/// Delivery log entry
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DeliveryLogInfo {
    pub id: String,
    pub job_id: Option<String>,
    pub rule_id: Option<String>,
    pub webhook_id: Option<String>,
    #[schema(example = "deal.won")]
    pub event_type: String,
    #[schema(example = "success")]
    pub status: String,
    pub attempt_count: i32,
    pub http_status: Option<i32>,
    /// Body posted to Google Chat
    pub rendered_message: Option<JsonValue>,
    pub error_message: Option<String>,
    pub latency_ms: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<DeliveryLogModel> for DeliveryLogInfo {
    fn from(model: DeliveryLogModel) -> Self {
        Self {
            id: model.id.to_string(),
            job_id: model.job_id.map(|id| id.to_string()),
            rule_id: model.rule_id.map(|id| id.to_string()),
            webhook_id: model.webhook_id.map(|id| id.to_string()),
            event_type: model.event_type,
            status: model.status,
            attempt_count: model.attempt_count,
            http_status: model.http_status,
            rendered_message: model.rendered_message,
            error_message: model.error_message,
            latency_ms: model.latency_ms,
            created_at: model.created_at.to_rfc3339(),
            updated_at: model.updated_at.to_rfc3339(),
        }
    }
}

/// Response payload for the delivery log listing endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DeliveryLogsResponse {
    pub logs: Vec<DeliveryLogInfo>,
}

/// List the tenant's delivery history
#[utoipa::path(
    get,
    path = "/api/v1/delivery-logs",
    security(("bearer_auth" = [])),
    params(ListDeliveryLogsQuery, TenantHeader),
    responses(
        (status = 200, description = "Delivery logs, newest first", body = DeliveryLogsResponse),
        (status = 400, description = "Invalid filter", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError)
    ),
    tag = "delivery-logs"
)]
pub async fn list_delivery_logs(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    TenantExtension(tenant): TenantExtension,
    Query(query): Query<ListDeliveryLogsQuery>,
) -> Result<Json<DeliveryLogsResponse>, ApiError> {
    if let Some(status) = query.status.as_deref()
        && ![STATUS_SUCCESS, STATUS_RETRYING, STATUS_FAILED, STATUS_SKIPPED_QUOTA].contains(&status)
    {
        return Err(validation_error(
            "Invalid status filter",
            serde_json::json!({ "status": "must be one of success, retrying, failed, skipped_quota" }),
        ));
    }
    if query.limit.is_some_and(|limit| limit == 0 || limit > MAX_LIMIT) {
        return Err(validation_error(
            "Invalid limit",
            serde_json::json!({ "limit": format!("must be between 1 and {MAX_LIMIT}") }),
        ));
    }

    let logs = DeliveryLogRepository::new(&state.db)
        .list_delivery_logs(
            tenant.0,
            DeliveryLogQuery {
                status: query.status,
                event_type: query.event_type,
                limit: query.limit,
                offset: query.offset,
            },
        )
        .await?;

    Ok(Json(DeliveryLogsResponse {
        logs: logs.into_iter().map(DeliveryLogInfo::from).collect(),
    }))
}
