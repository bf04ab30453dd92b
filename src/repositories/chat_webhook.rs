//! # ChatWebhook Repository
//!
//! CRUD for Google Chat destinations plus the delivery health counters the
//! worker maintains.

use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use uuid::Uuid;

use crate::error::RepositoryError;
use crate::models::chat_webhook::{
    ActiveModel as ChatWebhookActiveModel, Column, Entity as ChatWebhook, Model as ChatWebhookModel,
};
use crate::models::rule::{Column as RuleColumn, Entity as Rule};

const MAX_URL_LENGTH: usize = 2048;

/// Request data for registering a chat webhook
#[derive(Debug, Clone)]
pub struct CreateChatWebhookRequest {
    pub name: String,
    pub url: String,
}

/// Destination URLs must be absolute https URLs with a host.
pub fn validate_webhook_url(raw: &str) -> Result<url::Url, RepositoryError> {
    if raw.len() > MAX_URL_LENGTH {
        return Err(RepositoryError::validation_error(format!(
            "Webhook URL cannot exceed {MAX_URL_LENGTH} characters"
        )));
    }

    let parsed = url::Url::parse(raw.trim())
        .map_err(|_| RepositoryError::validation_error("Webhook URL is not a valid URL"))?;

    if parsed.scheme() != "https" {
        return Err(RepositoryError::validation_error(
            "Webhook URL must use https",
        ));
    }

    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(RepositoryError::validation_error("Webhook URL must have a host"));
    }

    Ok(parsed)
}

/// Repository for chat webhook database operations
pub struct ChatWebhookRepository<'a> {
    db: &'a DatabaseConnection,
}

impl<'a> ChatWebhookRepository<'a> {
    pub fn new(db: &'a DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn create_webhook(
        &self,
        tenant_id: Uuid,
        request: CreateChatWebhookRequest,
    ) -> Result<ChatWebhookModel, RepositoryError> {
        let name = request.name.trim();
        if name.is_empty() || name.len() > 255 {
            return Err(RepositoryError::validation_error(
                "Webhook name must be between 1 and 255 characters",
            ));
        }
        let url = validate_webhook_url(&request.url)?;

        let now = Utc::now().fixed_offset();
        let webhook = ChatWebhookActiveModel {
            id: Set(Uuid::new_v4()),
            tenant_id: Set(tenant_id),
            name: Set(name.to_string()),
            url: Set(url.to_string()),
            is_active: Set(true),
            consecutive_failures: Set(0),
            last_failure_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };

        webhook
            .insert(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    /// Unscoped lookup used by the worker; callers re-check the tenant.
    pub async fn get_webhook_by_id(
        &self,
        webhook_id: Uuid,
    ) -> Result<Option<ChatWebhookModel>, RepositoryError> {
        ChatWebhook::find_by_id(webhook_id)
            .one(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    pub async fn get_for_tenant(
        &self,
        tenant_id: Uuid,
        webhook_id: Uuid,
    ) -> Result<Option<ChatWebhookModel>, RepositoryError> {
        ChatWebhook::find_by_id(webhook_id)
            .filter(Column::TenantId.eq(tenant_id))
            .one(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    pub async fn list_webhooks(
        &self,
        tenant_id: Uuid,
    ) -> Result<Vec<ChatWebhookModel>, RepositoryError> {
        ChatWebhook::find()
            .filter(Column::TenantId.eq(tenant_id))
            .order_by_asc(Column::CreatedAt)
            .all(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    /// Deletes a webhook unless an enabled rule still targets it. Disabled
    /// rules pointing at it are removed with it.
    pub async fn delete_webhook(&self, tenant_id: Uuid, webhook_id: Uuid) -> Result<(), RepositoryError> {
        self.get_for_tenant(tenant_id, webhook_id)
            .await?
            .ok_or_else(|| RepositoryError::not_found("Chat webhook not found"))?;

        let enabled_references = Rule::find()
            .filter(RuleColumn::TargetWebhookId.eq(webhook_id))
            .filter(RuleColumn::Enabled.eq(true))
            .count(self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        if enabled_references > 0 {
            return Err(RepositoryError::Conflict(format!(
                "Chat webhook is used by {enabled_references} enabled rule(s)"
            )));
        }

        let txn = self.db.begin().await.map_err(RepositoryError::database_error)?;
        Rule::delete_many()
            .filter(RuleColumn::TargetWebhookId.eq(webhook_id))
            .filter(RuleColumn::Enabled.eq(false))
            .exec(&txn)
            .await
            .map_err(RepositoryError::database_error)?;
        ChatWebhook::delete_by_id(webhook_id)
            .exec(&txn)
            .await
            .map_err(RepositoryError::database_error)?;
        txn.commit().await.map_err(RepositoryError::database_error)?;

        Ok(())
    }

    /// Clears the failure streak after a successful delivery.
    pub async fn record_success(&self, webhook_id: Uuid) -> Result<(), RepositoryError> {
        ChatWebhook::update_many()
            .col_expr(Column::ConsecutiveFailures, Expr::value(0))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now().fixed_offset()))
            .filter(Column::Id.eq(webhook_id))
            .filter(Column::ConsecutiveFailures.gt(0))
            .exec(self.db)
            .await
            .map_err(RepositoryError::database_error)?;
        Ok(())
    }

    /// Counts a permanent failure and deactivates the webhook once the streak
    /// reaches `threshold`. Returns true when this call deactivated it.
    pub async fn record_permanent_failure(
        &self,
        webhook_id: Uuid,
        threshold: i32,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let now = now.fixed_offset();
        ChatWebhook::update_many()
            .col_expr(
                Column::ConsecutiveFailures,
                Expr::col(Column::ConsecutiveFailures).add(1),
            )
            .col_expr(Column::LastFailureAt, Expr::value(Some(now)))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::Id.eq(webhook_id))
            .exec(self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        let deactivated = ChatWebhook::update_many()
            .col_expr(Column::IsActive, Expr::value(false))
            .filter(Column::Id.eq(webhook_id))
            .filter(Column::IsActive.eq(true))
            .filter(Column::ConsecutiveFailures.gte(threshold))
            .exec(self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        Ok(deactivated.rows_affected > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect_in_memory;
    use crate::repositories::rule::{CreateRuleRequest, RuleRepository};
    use crate::repositories::tenant::{CreateTenantRequest, TenantRepository};

    async fn tenant(db: &DatabaseConnection) -> Uuid {
        TenantRepository::new(db)
            .create_tenant(CreateTenantRequest::default())
            .await
            .unwrap()
            .id
    }

    fn request(url: &str) -> CreateChatWebhookRequest {
        CreateChatWebhookRequest {
            name: "Sales room".to_string(),
            url: url.to_string(),
        }
    }

    #[test]
    fn test_url_validation() {
        assert!(validate_webhook_url("https://chat.googleapis.com/v1/spaces/AAA/messages?key=k").is_ok());
        assert!(validate_webhook_url("http://chat.googleapis.com/v1").is_err());
        assert!(validate_webhook_url("not a url").is_err());
        let long = format!("https://chat.googleapis.com/{}", "a".repeat(2048));
        assert!(validate_webhook_url(&long).is_err());
    }

    #[tokio::test]
    async fn test_tenant_scoping() {
        let db = connect_in_memory().await.unwrap();
        let repo = ChatWebhookRepository::new(&db);
        let owner = tenant(&db).await;
        let stranger = tenant(&db).await;

        let webhook = repo
            .create_webhook(owner, request("https://chat.googleapis.com/v1/spaces/A/messages"))
            .await
            .unwrap();

        assert!(repo.get_for_tenant(owner, webhook.id).await.unwrap().is_some());
        assert!(repo.get_for_tenant(stranger, webhook.id).await.unwrap().is_none());
        assert_eq!(repo.list_webhooks(stranger).await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_delete_blocked_by_enabled_rule() {
        let db = connect_in_memory().await.unwrap();
        let repo = ChatWebhookRepository::new(&db);
        let tenant_id = tenant(&db).await;
        let webhook = repo
            .create_webhook(tenant_id, request("https://chat.googleapis.com/v1/spaces/A/messages"))
            .await
            .unwrap();

        let rules = RuleRepository::new(&db);
        let rule = rules
            .create_rule(tenant_id, CreateRuleRequest::new("Won", "deal.won", webhook.id))
            .await
            .unwrap();

        let blocked = repo.delete_webhook(tenant_id, webhook.id).await;
        assert!(matches!(blocked, Err(RepositoryError::Conflict(_))));

        rules
            .set_enabled(tenant_id, rule.id, false)
            .await
            .unwrap();
        repo.delete_webhook(tenant_id, webhook.id).await.unwrap();
        assert!(repo.get_webhook_by_id(webhook.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failure_threshold_deactivates() {
        let db = connect_in_memory().await.unwrap();
        let repo = ChatWebhookRepository::new(&db);
        let tenant_id = tenant(&db).await;
        let webhook = repo
            .create_webhook(tenant_id, request("https://chat.googleapis.com/v1/spaces/A/messages"))
            .await
            .unwrap();

        let now = Utc::now();
        assert!(!repo.record_permanent_failure(webhook.id, 2, now).await.unwrap());
        assert!(repo.record_permanent_failure(webhook.id, 2, now).await.unwrap());
        assert!(!repo.record_permanent_failure(webhook.id, 2, now).await.unwrap());

        let stored = repo.get_webhook_by_id(webhook.id).await.unwrap().unwrap();
        assert!(!stored.is_active);
        assert_eq!(stored.consecutive_failures, 3);
        assert!(stored.last_failure_at.is_some());

        repo.record_success(webhook.id).await.unwrap();
        let stored = repo.get_webhook_by_id(webhook.id).await.unwrap().unwrap();
        assert_eq!(stored.consecutive_failures, 0);
    }
}
