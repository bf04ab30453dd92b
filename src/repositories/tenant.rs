//! # Tenant Repository
//!
//! Tenant lifecycle and the Pipedrive company binding. One company id maps to
//! at most one tenant; the unique index is the final arbiter under races.

use crate::error::{RepositoryError, is_unique_violation};
use crate::models::tenant::{
    ActiveModel as TenantActiveModel, Column, Entity as Tenant, Model as TenantModel,
};
use crate::pipeline::quota::Plan;
use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use uuid::Uuid;

/// Request data for creating a new tenant
#[derive(Debug, Clone, Default)]
pub struct CreateTenantRequest {
    pub name: Option<String>,
    pub pipedrive_company_id: Option<String>,
    /// Defaults to `free`
    pub plan: Option<String>,
    pub webhook_secret: Option<String>,
}

/// Repository for Tenant database operations
pub struct TenantRepository<'a> {
    db: &'a DatabaseConnection,
}

impl<'a> TenantRepository<'a> {
    pub fn new(db: &'a DatabaseConnection) -> Self {
        Self { db }
    }

    /// Create a new tenant
    pub async fn create_tenant(
        &self,
        request: CreateTenantRequest,
    ) -> Result<TenantModel, RepositoryError> {
        if let Some(name) = request.name.as_deref() {
            validate_tenant_name(name)?;
        }
        let plan = match request.plan.as_deref() {
            Some(raw) => raw.parse::<Plan>().map_err(RepositoryError::validation_error)?,
            None => Plan::Free,
        };
        let company_id = request
            .pipedrive_company_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty());

        let now = Utc::now().fixed_offset();
        let tenant = TenantActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(request.name),
            pipedrive_company_id: Set(company_id.clone()),
            plan: Set(plan.as_str().to_string()),
            subscription_status: Set("active".to_string()),
            webhook_secret: Set(request.webhook_secret.filter(|s| !s.is_empty())),
            created_at: Set(now),
            updated_at: Set(now),
        };

        tenant.insert(self.db).await.map_err(|err| {
            if is_unique_violation(&err) {
                RepositoryError::Conflict(format!(
                    "Pipedrive company {} is already bound to another tenant",
                    company_id.unwrap_or_default()
                ))
            } else {
                RepositoryError::database_error(err)
            }
        })
    }

    /// Get tenant by ID
    pub async fn get_tenant_by_id(
        &self,
        tenant_id: Uuid,
    ) -> Result<Option<TenantModel>, RepositoryError> {
        Tenant::find_by_id(tenant_id)
            .one(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    pub async fn find_by_company_id(
        &self,
        company_id: &str,
    ) -> Result<Option<TenantModel>, RepositoryError> {
        Tenant::find()
            .filter(Column::PipedriveCompanyId.eq(company_id))
            .one(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    /// Binds an unbound tenant to `company_id`.
    ///
    /// Succeeds when the tenant is already bound to the same company; fails
    /// with a conflict when it is bound elsewhere or the company belongs to
    /// another tenant.
    pub async fn bind_company_id(
        &self,
        tenant_id: Uuid,
        company_id: &str,
    ) -> Result<TenantModel, RepositoryError> {
        let now = Utc::now().fixed_offset();
        let result = Tenant::update_many()
            .col_expr(Column::PipedriveCompanyId, Expr::value(company_id))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::Id.eq(tenant_id))
            .filter(Column::PipedriveCompanyId.is_null())
            .exec(self.db)
            .await;

        if let Err(err) = result {
            return Err(if is_unique_violation(&err) {
                RepositoryError::Conflict(format!(
                    "Pipedrive company {company_id} is already bound to another tenant"
                ))
            } else {
                RepositoryError::database_error(err)
            });
        }

        let tenant = self
            .get_tenant_by_id(tenant_id)
            .await?
            .ok_or_else(|| RepositoryError::not_found("Tenant not found"))?;

        match tenant.pipedrive_company_id.as_deref() {
            Some(bound) if bound == company_id => Ok(tenant),
            _ => Err(RepositoryError::Conflict(format!(
                "Tenant {tenant_id} is bound to a different Pipedrive company"
            ))),
        }
    }

    /// Creates a free tenant for an unseen company, or returns the tenant a
    /// concurrent request created first.
    pub async fn create_for_company(&self, company_id: &str) -> Result<TenantModel, RepositoryError> {
        let request = CreateTenantRequest {
            pipedrive_company_id: Some(company_id.to_string()),
            ..Default::default()
        };

        match self.create_tenant(request).await {
            Ok(tenant) => {
                tracing::info!(tenant_id = %tenant.id, company_id, "Auto-provisioned tenant");
                Ok(tenant)
            }
            Err(RepositoryError::Conflict(_)) => self
                .find_by_company_id(company_id)
                .await?
                .ok_or_else(|| RepositoryError::not_found("Tenant not found")),
            Err(err) => Err(err),
        }
    }
}

/// Validate tenant name according to business rules
fn validate_tenant_name(name: &str) -> Result<(), RepositoryError> {
    if name.trim().is_empty() {
        return Err(RepositoryError::validation_error(
            "Tenant name cannot be empty",
        ));
    }

    if name.len() > 255 {
        return Err(RepositoryError::validation_error(
            "Tenant name cannot exceed 255 characters",
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect_in_memory;

    #[tokio::test]
    async fn test_create_tenant_defaults() {
        let db = connect_in_memory().await.unwrap();
        let repo = TenantRepository::new(&db);

        let tenant = repo
            .create_tenant(CreateTenantRequest {
                name: Some("Acme".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(tenant.plan, "free");
        assert_eq!(tenant.subscription_status, "active");
        assert!(tenant.pipedrive_company_id.is_none());
        assert!(!tenant.is_canceled());
    }

    #[tokio::test]
    async fn test_create_tenant_validation() {
        let db = connect_in_memory().await.unwrap();
        let repo = TenantRepository::new(&db);

        let empty = repo
            .create_tenant(CreateTenantRequest {
                name: Some("  ".to_string()),
                ..Default::default()
            })
            .await;
        assert!(matches!(empty, Err(RepositoryError::Validation(_))));

        let bad_plan = repo
            .create_tenant(CreateTenantRequest {
                plan: Some("platinum".to_string()),
                ..Default::default()
            })
            .await;
        assert!(matches!(bad_plan, Err(RepositoryError::Validation(_))));
    }

    #[tokio::test]
    async fn test_company_id_is_unique() {
        let db = connect_in_memory().await.unwrap();
        let repo = TenantRepository::new(&db);

        let first = repo.create_for_company("777").await.unwrap();
        let again = repo.create_for_company("777").await.unwrap();
        assert_eq!(first.id, again.id);

        let duplicate = repo
            .create_tenant(CreateTenantRequest {
                pipedrive_company_id: Some("777".to_string()),
                ..Default::default()
            })
            .await;
        assert!(matches!(duplicate, Err(RepositoryError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_bind_company_id() {
        let db = connect_in_memory().await.unwrap();
        let repo = TenantRepository::new(&db);

        let tenant = repo.create_tenant(CreateTenantRequest::default()).await.unwrap();
        let bound = repo.bind_company_id(tenant.id, "42").await.unwrap();
        assert_eq!(bound.pipedrive_company_id.as_deref(), Some("42"));

        // Rebinding to the same company is a no-op
        assert!(repo.bind_company_id(tenant.id, "42").await.is_ok());

        // A bound tenant cannot move to another company
        let moved = repo.bind_company_id(tenant.id, "43").await;
        assert!(matches!(moved, Err(RepositoryError::Conflict(_))));

        // Another tenant cannot claim a bound company
        let other = repo.create_tenant(CreateTenantRequest::default()).await.unwrap();
        let stolen = repo.bind_company_id(other.id, "42").await;
        assert!(matches!(stolen, Err(RepositoryError::Conflict(_))));

        let found = repo.find_by_company_id("42").await.unwrap().unwrap();
        assert_eq!(found.id, tenant.id);
    }
}
