//! # Rules API Handlers
//!
//! Tenant-scoped rule management. Validation (pattern shape, filter keys,
//! template mode, same-tenant webhook) lives in the repository so every write
//! path shares it.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::{OperatorAuth, TenantExtension, TenantHeader};
use crate::error::{ApiError, not_found};
use crate::models::rule::Model as RuleModel;
use crate::pipeline::quota::plan_for;
use crate::pipeline::template::TemplateMode;
use crate::repositories::RuleRepository;
use crate::repositories::rule::{CreateRuleRequest, UpdateRuleRequest};
use crate::server::AppState;

use super::require_tenant;

/// Rule information response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RuleInfo {
    #[schema(example = "550e8400-e29b-41d4-a716-446655440000")]
    pub id: String,
    #[schema(example = "Won deals")]
    pub name: String,
    /// Exact type, object wildcard (`deal.*`) or `*`
    #[schema(example = "deal.won")]
    pub event_type: String,
    /// Filter conditions, typed or shorthand form
    pub filters: Option<JsonValue>,
    pub target_webhook_id: String,
    #[schema(example = "compact")]
    pub template_mode: String,
    pub custom_template: Option<String>,
    pub enabled: bool,
    #[schema(example = 100)]
    pub priority: i32,
    pub is_default: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl From<RuleModel> for RuleInfo {
    fn from(model: RuleModel) -> Self {
        Self {
            id: model.id.to_string(),
            name: model.name,
            event_type: model.event_type,
            filters: model.filters,
            target_webhook_id: model.target_webhook_id.to_string(),
            template_mode: model.template_mode,
            custom_template: model.custom_template,
            enabled: model.enabled,
            priority: model.priority,
            is_default: model.is_default,
            created_at: model.created_at.to_rfc3339(),
            updated_at: model.updated_at.to_rfc3339(),
        }
    }
}

/// Response payload for the rules listing endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RulesResponse {
    pub rules: Vec<RuleInfo>,
}

/// Request payload for creating a rule
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateRuleDto {
    #[schema(example = "Big wins")]
    pub name: String,
    #[schema(example = "deal.won")]
    pub event_type: String,
    /// e.g. `{"value_min": 10000}`
    pub filters: Option<JsonValue>,
    pub target_webhook_id: Uuid,
    pub template_mode: Option<TemplateMode>,
    /// Template with `{{placeholders}}`, used when `template_mode` is `custom`
    pub custom_template: Option<String>,
    pub enabled: Option<bool>,
    pub priority: Option<i32>,
}

/// Partial rule update; an explicit `"filters": null` clears the filters
#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct UpdateRuleDto {
    pub name: Option<String>,
    pub event_type: Option<String>,
    #[serde(default, deserialize_with = "present_value")]
    pub filters: Option<JsonValue>,
    pub target_webhook_id: Option<Uuid>,
    pub template_mode: Option<TemplateMode>,
    pub custom_template: Option<String>,
    pub enabled: Option<bool>,
    pub priority: Option<i32>,
}

/// Request payload for provisioning the plan's default rules
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ProvisionDefaultsDto {
    /// Webhook every default rule targets
    pub webhook_id: Uuid,
}

/// Keeps an explicit JSON `null` as `Some(Value::Null)`.
fn present_value<'de, D>(deserializer: D) -> Result<Option<JsonValue>, D::Error>
where
    D: Deserializer<'de>,
{
    JsonValue::deserialize(deserializer).map(Some)
}

/// List the tenant's rules in evaluation order
#[utoipa::path(
    get,
    path = "/api/v1/rules",
    security(("bearer_auth" = [])),
    params(TenantHeader),
    responses(
        (status = 200, description = "Rules for the tenant", body = RulesResponse),
        (status = 400, description = "Missing or invalid tenant header", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError)
    ),
    tag = "rules"
)]
pub async fn list_rules(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    TenantExtension(tenant): TenantExtension,
) -> Result<Json<RulesResponse>, ApiError> {
    let rules = RuleRepository::new(&state.db).list_rules(tenant.0).await?;
    Ok(Json(RulesResponse {
        rules: rules.into_iter().map(RuleInfo::from).collect(),
    }))
}

/// Create a rule
#[utoipa::path(
    post,
    path = "/api/v1/rules",
    security(("bearer_auth" = [])),
    params(TenantHeader),
    request_body = CreateRuleDto,
    responses(
        (status = 201, description = "Rule created", body = RuleInfo),
        (status = 400, description = "Validation failed", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "Tenant not found", body = ApiError)
    ),
    tag = "rules"
)]
pub async fn create_rule(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    TenantExtension(tenant): TenantExtension,
    Json(request): Json<CreateRuleDto>,
) -> Result<(StatusCode, Json<RuleInfo>), ApiError> {
    require_tenant(&state.db, tenant.0).await?;

    let rule = RuleRepository::new(&state.db)
        .create_rule(
            tenant.0,
            CreateRuleRequest {
                name: request.name,
                event_type: request.event_type,
                filters: request.filters,
                target_webhook_id: request.target_webhook_id,
                template_mode: request.template_mode.map(|mode| mode.to_string()),
                custom_template: request.custom_template,
                enabled: request.enabled,
                priority: request.priority,
            },
        )
        .await?;

    tracing::info!(tenant_id = %tenant.0, rule_id = %rule.id, event_type = %rule.event_type, "Rule created");
    Ok((StatusCode::CREATED, Json(rule.into())))
}

/// Get a single rule
#[utoipa::path(
    get,
    path = "/api/v1/rules/{id}",
    security(("bearer_auth" = [])),
    params(
        ("id" = Uuid, Path, description = "Rule UUID"),
        TenantHeader
    ),
    responses(
        (status = 200, description = "Rule", body = RuleInfo),
        (status = 404, description = "Rule not found", body = ApiError)
    ),
    tag = "rules"
)]
pub async fn get_rule(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    TenantExtension(tenant): TenantExtension,
    Path(rule_id): Path<Uuid>,
) -> Result<Json<RuleInfo>, ApiError> {
    let rule = RuleRepository::new(&state.db)
        .get_rule(tenant.0, rule_id)
        .await?
        .ok_or_else(|| not_found("Rule not found"))?;
    Ok(Json(rule.into()))
}

/// Update a rule
#[utoipa::path(
    patch,
    path = "/api/v1/rules/{id}",
    security(("bearer_auth" = [])),
    params(
        ("id" = Uuid, Path, description = "Rule UUID"),
        TenantHeader
    ),
    request_body = UpdateRuleDto,
    responses(
        (status = 200, description = "Rule updated", body = RuleInfo),
        (status = 400, description = "Validation failed", body = ApiError),
        (status = 404, description = "Rule not found", body = ApiError)
    ),
    tag = "rules"
)]
pub async fn update_rule(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    TenantExtension(tenant): TenantExtension,
    Path(rule_id): Path<Uuid>,
    Json(request): Json<UpdateRuleDto>,
) -> Result<Json<RuleInfo>, ApiError> {
    let rule = RuleRepository::new(&state.db)
        .update_rule(
            tenant.0,
            rule_id,
            UpdateRuleRequest {
                name: request.name,
                event_type: request.event_type,
                filters: request.filters,
                target_webhook_id: request.target_webhook_id,
                template_mode: request.template_mode.map(|mode| mode.to_string()),
                custom_template: request.custom_template,
                enabled: request.enabled,
                priority: request.priority,
            },
        )
        .await?;
    Ok(Json(rule.into()))
}

/// Provision the plan's default rules
#[utoipa::path(
    post,
    path = "/api/v1/rules/provision-defaults",
    security(("bearer_auth" = [])),
    params(TenantHeader),
    request_body = ProvisionDefaultsDto,
    responses(
        (status = 201, description = "Default rules created (existing defaults are skipped)", body = RulesResponse),
        (status = 400, description = "Validation failed", body = ApiError),
        (status = 404, description = "Tenant not found", body = ApiError)
    ),
    tag = "rules"
)]
pub async fn provision_default_rules(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    TenantExtension(tenant): TenantExtension,
    Json(request): Json<ProvisionDefaultsDto>,
) -> Result<(StatusCode, Json<RulesResponse>), ApiError> {
    let tenant = require_tenant(&state.db, tenant.0).await?;

    let created = RuleRepository::new(&state.db)
        .provision_default_rules(tenant.id, request.webhook_id, plan_for(&tenant.plan))
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(RulesResponse {
            rules: created.into_iter().map(RuleInfo::from).collect(),
        }),
    ))
}
