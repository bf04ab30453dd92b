//! # Rule Repository
//!
//! Rules are validated on every write: the pattern must be well formed, the
//! filters must parse, the template mode must be known and the target webhook
//! must belong to the same tenant.

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, IntoActiveModel, QueryFilter,
    QueryOrder, Set,
};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::RepositoryError;
use crate::models::rule::{ActiveModel as RuleActiveModel, Column, Entity as Rule, Model as RuleModel};
use crate::pipeline::filter::RuleFilter;
use crate::pipeline::matcher::validate_pattern;
use crate::pipeline::quota::Plan;
use crate::pipeline::template::TemplateMode;
use crate::repositories::ChatWebhookRepository;

const DEFAULT_PRIORITY: i32 = 100;

/// Request data for creating a rule
#[derive(Debug, Clone)]
pub struct CreateRuleRequest {
    pub name: String,
    pub event_type: String,
    pub filters: Option<JsonValue>,
    pub target_webhook_id: Uuid,
    pub template_mode: Option<String>,
    pub custom_template: Option<String>,
    pub enabled: Option<bool>,
    pub priority: Option<i32>,
}

impl CreateRuleRequest {
    /// An enabled, unfiltered, simple-mode rule.
    pub fn new(name: &str, event_type: &str, target_webhook_id: Uuid) -> Self {
        Self {
            name: name.to_string(),
            event_type: event_type.to_string(),
            filters: None,
            target_webhook_id,
            template_mode: None,
            custom_template: None,
            enabled: None,
            priority: None,
        }
    }
}

/// Partial update; `filters: Some(Value::Null)` clears the filters.
#[derive(Debug, Clone, Default)]
pub struct UpdateRuleRequest {
    pub name: Option<String>,
    pub event_type: Option<String>,
    pub filters: Option<JsonValue>,
    pub target_webhook_id: Option<Uuid>,
    pub template_mode: Option<String>,
    pub custom_template: Option<String>,
    pub enabled: Option<bool>,
    pub priority: Option<i32>,
}

/// Repository for rule database operations
pub struct RuleRepository<'a> {
    db: &'a DatabaseConnection,
}

impl<'a> RuleRepository<'a> {
    pub fn new(db: &'a DatabaseConnection) -> Self {
        Self { db }
    }

    /// Enabled rules of a tenant in evaluation order.
    pub async fn get_enabled_rules_for_tenant(
        &self,
        tenant_id: Uuid,
    ) -> Result<Vec<RuleModel>, RepositoryError> {
        Rule::find()
            .filter(Column::TenantId.eq(tenant_id))
            .filter(Column::Enabled.eq(true))
            .order_by_asc(Column::Priority)
            .order_by_asc(Column::CreatedAt)
            .order_by_asc(Column::Id)
            .all(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    pub async fn list_rules(&self, tenant_id: Uuid) -> Result<Vec<RuleModel>, RepositoryError> {
        Rule::find()
            .filter(Column::TenantId.eq(tenant_id))
            .order_by_asc(Column::Priority)
            .order_by_asc(Column::CreatedAt)
            .all(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    pub async fn get_rule(
        &self,
        tenant_id: Uuid,
        rule_id: Uuid,
    ) -> Result<Option<RuleModel>, RepositoryError> {
        Rule::find_by_id(rule_id)
            .filter(Column::TenantId.eq(tenant_id))
            .one(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    pub async fn create_rule(
        &self,
        tenant_id: Uuid,
        request: CreateRuleRequest,
    ) -> Result<RuleModel, RepositoryError> {
        self.insert_rule(tenant_id, request, false).await
    }

    pub async fn update_rule(
        &self,
        tenant_id: Uuid,
        rule_id: Uuid,
        request: UpdateRuleRequest,
    ) -> Result<RuleModel, RepositoryError> {
        let rule = self
            .get_rule(tenant_id, rule_id)
            .await?
            .ok_or_else(|| RepositoryError::not_found("Rule not found"))?;

        let mut active = rule.into_active_model();

        if let Some(name) = request.name {
            active.name = Set(validate_name(&name)?);
        }
        if let Some(event_type) = request.event_type {
            validate_pattern(&event_type).map_err(RepositoryError::validation_error)?;
            active.event_type = Set(event_type);
        }
        if let Some(filters) = request.filters {
            active.filters = Set(validate_filters(Some(filters))?);
        }
        if let Some(webhook_id) = request.target_webhook_id {
            self.ensure_webhook_belongs_to_tenant(tenant_id, webhook_id).await?;
            active.target_webhook_id = Set(webhook_id);
        }
        if let Some(mode) = request.template_mode {
            active.template_mode = Set(parse_mode(&mode)?.as_str().to_string());
        }
        if let Some(template) = request.custom_template {
            active.custom_template = Set(Some(template).filter(|t| !t.is_empty()));
        }
        if let Some(enabled) = request.enabled {
            active.enabled = Set(enabled);
        }
        if let Some(priority) = request.priority {
            active.priority = Set(priority);
        }
        active.updated_at = Set(Utc::now().fixed_offset());

        active
            .update(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    pub async fn set_enabled(
        &self,
        tenant_id: Uuid,
        rule_id: Uuid,
        enabled: bool,
    ) -> Result<RuleModel, RepositoryError> {
        self.update_rule(
            tenant_id,
            rule_id,
            UpdateRuleRequest {
                enabled: Some(enabled),
                ..Default::default()
            },
        )
        .await
    }

    /// Creates the plan's default rules targeting `webhook_id`, skipping event
    /// types the tenant already has a default rule for.
    pub async fn provision_default_rules(
        &self,
        tenant_id: Uuid,
        webhook_id: Uuid,
        plan: Plan,
    ) -> Result<Vec<RuleModel>, RepositoryError> {
        let existing: Vec<String> = Rule::find()
            .filter(Column::TenantId.eq(tenant_id))
            .filter(Column::IsDefault.eq(true))
            .all(self.db)
            .await
            .map_err(RepositoryError::database_error)?
            .into_iter()
            .map(|rule| rule.event_type)
            .collect();

        let mut created = Vec::new();
        for event_type in plan.default_event_types() {
            if existing.iter().any(|known| known == event_type) {
                continue;
            }

            let mut request = CreateRuleRequest::new(&default_rule_name(event_type), event_type, webhook_id);
            if *event_type == "deal.won" {
                request.template_mode = Some(TemplateMode::Detailed.as_str().to_string());
            }
            created.push(self.insert_rule(tenant_id, request, true).await?);
        }

        tracing::info!(
            tenant_id = %tenant_id,
            plan = plan.as_str(),
            created = created.len(),
            "Provisioned default rules"
        );

        Ok(created)
    }

    async fn insert_rule(
        &self,
        tenant_id: Uuid,
        request: CreateRuleRequest,
        is_default: bool,
    ) -> Result<RuleModel, RepositoryError> {
        let name = validate_name(&request.name)?;
        validate_pattern(&request.event_type).map_err(RepositoryError::validation_error)?;
        let filters = validate_filters(request.filters)?;
        let mode = match request.template_mode.as_deref() {
            Some(raw) => parse_mode(raw)?,
            None => TemplateMode::Simple,
        };
        self.ensure_webhook_belongs_to_tenant(tenant_id, request.target_webhook_id)
            .await?;

        let now = Utc::now().fixed_offset();
        let rule = RuleActiveModel {
            id: Set(Uuid::new_v4()),
            tenant_id: Set(tenant_id),
            name: Set(name),
            event_type: Set(request.event_type),
            filters: Set(filters),
            target_webhook_id: Set(request.target_webhook_id),
            template_mode: Set(mode.as_str().to_string()),
            custom_template: Set(request.custom_template.filter(|t| !t.is_empty())),
            enabled: Set(request.enabled.unwrap_or(true)),
            priority: Set(request.priority.unwrap_or(DEFAULT_PRIORITY)),
            is_default: Set(is_default),
            created_at: Set(now),
            updated_at: Set(now),
        };

        rule.insert(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    async fn ensure_webhook_belongs_to_tenant(
        &self,
        tenant_id: Uuid,
        webhook_id: Uuid,
    ) -> Result<(), RepositoryError> {
        ChatWebhookRepository::new(self.db)
            .get_for_tenant(tenant_id, webhook_id)
            .await?
            .map(|_| ())
            .ok_or_else(|| {
                RepositoryError::validation_error("Target webhook does not belong to this tenant")
            })
    }
}

fn validate_name(name: &str) -> Result<String, RepositoryError> {
    let trimmed = name.trim();
    if trimmed.is_empty() || trimmed.len() > 255 {
        return Err(RepositoryError::validation_error(
            "Rule name must be between 1 and 255 characters",
        ));
    }
    Ok(trimmed.to_string())
}

/// Rejects unparseable filters; empty filters are stored as null.
fn validate_filters(filters: Option<JsonValue>) -> Result<Option<JsonValue>, RepositoryError> {
    let parsed = RuleFilter::from_json(filters.as_ref())
        .map_err(|err| RepositoryError::validation_error(err.to_string()))?;
    Ok(if parsed.is_empty() { None } else { filters })
}

fn parse_mode(raw: &str) -> Result<TemplateMode, RepositoryError> {
    raw.parse::<TemplateMode>()
        .map_err(RepositoryError::validation_error)
}

fn default_rule_name(event_type: &str) -> String {
    match event_type {
        "deal.won" => "Deal won".to_string(),
        "deal.lost" => "Deal lost".to_string(),
        "deal.added" => "New deal".to_string(),
        "deal.updated" => "Deal updated".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect_in_memory;
    use crate::repositories::chat_webhook::CreateChatWebhookRequest;
    use crate::repositories::tenant::{CreateTenantRequest, TenantRepository};
    use serde_json::json;

    async fn fixture(db: &DatabaseConnection) -> (Uuid, Uuid) {
        let tenant = TenantRepository::new(db)
            .create_tenant(CreateTenantRequest::default())
            .await
            .unwrap();
        let webhook = ChatWebhookRepository::new(db)
            .create_webhook(
                tenant.id,
                CreateChatWebhookRequest {
                    name: "Room".to_string(),
                    url: "https://chat.googleapis.com/v1/spaces/A/messages".to_string(),
                },
            )
            .await
            .unwrap();
        (tenant.id, webhook.id)
    }

    #[tokio::test]
    async fn test_create_rule_validates_input() {
        let db = connect_in_memory().await.unwrap();
        let (tenant_id, webhook_id) = fixture(&db).await;
        let repo = RuleRepository::new(&db);

        let bad_pattern = repo
            .create_rule(tenant_id, CreateRuleRequest::new("x", "deal", webhook_id))
            .await;
        assert!(matches!(bad_pattern, Err(RepositoryError::Validation(_))));

        let mut bad_filter = CreateRuleRequest::new("x", "deal.won", webhook_id);
        bad_filter.filters = Some(json!({ "colour": "red" }));
        assert!(repo.create_rule(tenant_id, bad_filter).await.is_err());

        let mut bad_mode = CreateRuleRequest::new("x", "deal.won", webhook_id);
        bad_mode.template_mode = Some("fancy".to_string());
        assert!(repo.create_rule(tenant_id, bad_mode).await.is_err());

        let mut ok = CreateRuleRequest::new("Big wins", "deal.won", webhook_id);
        ok.filters = Some(json!({ "value_min": 1000 }));
        let rule = repo.create_rule(tenant_id, ok).await.unwrap();
        assert_eq!(rule.template_mode, "simple");
        assert_eq!(rule.priority, DEFAULT_PRIORITY);
        assert!(rule.enabled);
    }

    #[tokio::test]
    async fn test_cross_tenant_webhook_rejected() {
        let db = connect_in_memory().await.unwrap();
        let (tenant_a, _) = fixture(&db).await;
        let (_, webhook_b) = fixture(&db).await;
        let repo = RuleRepository::new(&db);

        let result = repo
            .create_rule(tenant_a, CreateRuleRequest::new("x", "deal.won", webhook_b))
            .await;
        assert!(matches!(result, Err(RepositoryError::Validation(_))));
    }

    #[tokio::test]
    async fn test_enabled_rules_in_priority_order() {
        let db = connect_in_memory().await.unwrap();
        let (tenant_id, webhook_id) = fixture(&db).await;
        let repo = RuleRepository::new(&db);

        let mut low = CreateRuleRequest::new("low", "deal.*", webhook_id);
        low.priority = Some(50);
        let mut high = CreateRuleRequest::new("high", "deal.won", webhook_id);
        high.priority = Some(1);
        let mut off = CreateRuleRequest::new("off", "*", webhook_id);
        off.enabled = Some(false);

        repo.create_rule(tenant_id, low).await.unwrap();
        repo.create_rule(tenant_id, high).await.unwrap();
        repo.create_rule(tenant_id, off).await.unwrap();

        let names: Vec<String> = repo
            .get_enabled_rules_for_tenant(tenant_id)
            .await
            .unwrap()
            .into_iter()
            .map(|rule| rule.name)
            .collect();
        assert_eq!(names, vec!["high", "low"]);
    }

    #[tokio::test]
    async fn test_update_rule_clears_filters() {
        let db = connect_in_memory().await.unwrap();
        let (tenant_id, webhook_id) = fixture(&db).await;
        let repo = RuleRepository::new(&db);

        let mut request = CreateRuleRequest::new("x", "deal.won", webhook_id);
        request.filters = Some(json!({ "value_min": 5 }));
        let rule = repo.create_rule(tenant_id, request).await.unwrap();

        let updated = repo
            .update_rule(
                tenant_id,
                rule.id,
                UpdateRuleRequest {
                    filters: Some(JsonValue::Null),
                    template_mode: Some("compact".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(updated.filters.is_none());
        assert_eq!(updated.template_mode, "compact");
    }

    #[tokio::test]
    async fn test_provision_default_rules_is_idempotent() {
        let db = connect_in_memory().await.unwrap();
        let (tenant_id, webhook_id) = fixture(&db).await;
        let repo = RuleRepository::new(&db);

        let created = repo
            .provision_default_rules(tenant_id, webhook_id, Plan::Pro)
            .await
            .unwrap();
        assert_eq!(created.len(), 4);
        assert!(created.iter().all(|rule| rule.is_default));

        let again = repo
            .provision_default_rules(tenant_id, webhook_id, Plan::Pro)
            .await
            .unwrap();
        assert!(again.is_empty());
        assert_eq!(repo.list_rules(tenant_id).await.unwrap().len(), 4);
    }
}
