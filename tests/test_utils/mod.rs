//! Test utilities for database-backed integration tests.
//!
//! Every helper works against a fresh in-memory SQLite database with all
//! migrations applied and foreign keys enforced.

#![allow(dead_code)]

use anyhow::Result;
use chrono::Utc;
use pipenotify::{
    config::AppConfig,
    models::chat_webhook::{ActiveModel as ChatWebhookActiveModel, Model as ChatWebhookModel},
    models::rule::Model as RuleModel,
    models::tenant::Model as TenantModel,
    repositories::{
        RuleRepository, TenantRepository, rule::CreateRuleRequest, tenant::CreateTenantRequest,
    },
};
use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};
use std::sync::Arc;
use uuid::Uuid;

/// Sets up an in-memory SQLite database with all migrations applied.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    pipenotify::db::connect_in_memory().await
}

/// Same as [`setup_test_db`], wrapped for the worker and sweep.
pub async fn setup_test_db_arc() -> Result<Arc<DatabaseConnection>> {
    Ok(Arc::new(setup_test_db().await?))
}

/// Configuration tuned for deterministic tests: no jitter, short backoff.
pub fn test_config() -> AppConfig {
    let mut config = AppConfig {
        profile: "test".to_string(),
        operator_tokens: vec!["operator-token".to_string()],
        ..AppConfig::default()
    };
    config.delivery.jitter_factor = 0.0;
    config.delivery.backoff_base_seconds = 1;
    config.delivery.backoff_max_seconds = 60;
    config
}

/// Creates an active tenant bound to `company_id`.
pub async fn create_tenant(
    db: &DatabaseConnection,
    company_id: &str,
    plan: &str,
) -> Result<TenantModel> {
    let tenant = TenantRepository::new(db)
        .create_tenant(CreateTenantRequest {
            name: Some(format!("Tenant {company_id}")),
            pipedrive_company_id: Some(company_id.to_string()),
            plan: Some(plan.to_string()),
            webhook_secret: Some(format!("secret-{company_id}")),
        })
        .await?;
    Ok(tenant)
}

/// Inserts a chat webhook row directly so plain-http stub URLs are allowed.
pub async fn insert_chat_webhook(
    db: &DatabaseConnection,
    tenant_id: Uuid,
    url: &str,
) -> Result<ChatWebhookModel> {
    let now = Utc::now().fixed_offset();
    let webhook = ChatWebhookActiveModel {
        id: Set(Uuid::new_v4()),
        tenant_id: Set(tenant_id),
        name: Set("Sales room".to_string()),
        url: Set(url.to_string()),
        is_active: Set(true),
        consecutive_failures: Set(0),
        last_failure_at: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(db)
    .await?;
    Ok(webhook)
}

/// Creates an enabled rule for `event_type` targeting `webhook_id`.
pub async fn create_rule(
    db: &DatabaseConnection,
    tenant_id: Uuid,
    event_type: &str,
    webhook_id: Uuid,
) -> Result<RuleModel> {
    let rule = RuleRepository::new(db)
        .create_rule(
            tenant_id,
            CreateRuleRequest::new(&format!("{event_type} alerts"), event_type, webhook_id),
        )
        .await?;
    Ok(rule)
}

/// A Pipedrive v2 `change` payload for a deal moving from `open` to `won`.
pub fn deal_won_payload(company_id: &str, deal_id: i64) -> serde_json::Value {
    serde_json::json!({
        "meta": {
            "action": "change",
            "entity": "deal",
            "entity_id": deal_id.to_string(),
            "company_id": company_id,
            "user_id": "77",
            "host": "acme.pipedrive.com",
        },
        "data": {
            "id": deal_id,
            "title": "Big Deal",
            "value": 5000,
            "currency": "USD",
            "status": "won",
        },
        "previous": {
            "status": "open",
        },
    })
}
