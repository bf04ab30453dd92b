//! # DeliveryLog Repository
//!
//! Delivery history. Rows are written after the attempt they describe; a
//! delivery job owns exactly one row, updated on every attempt.

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, IntoActiveModel,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set,
};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::RepositoryError;
use crate::models::delivery_log::{
    ActiveModel as DeliveryLogActiveModel, Column, Entity as DeliveryLog,
    Model as DeliveryLogModel, STATUS_SUCCESS,
};

/// One delivery log entry
#[derive(Debug, Clone)]
pub struct NewDeliveryLog {
    pub tenant_id: Uuid,
    pub job_id: Option<Uuid>,
    pub rule_id: Option<Uuid>,
    pub webhook_id: Option<Uuid>,
    pub event_type: String,
    pub status: String,
    pub attempt_count: i32,
    pub http_status: Option<i32>,
    pub rendered_message: Option<JsonValue>,
    pub error_message: Option<String>,
    pub latency_ms: Option<i64>,
}

/// Filters for listing a tenant's delivery history
#[derive(Debug, Clone, Default)]
pub struct DeliveryLogQuery {
    pub status: Option<String>,
    pub event_type: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

pub struct DeliveryLogRepository<'a, C: ConnectionTrait> {
    db: &'a C,
}

impl<'a, C: ConnectionTrait> DeliveryLogRepository<'a, C> {
    pub fn new(db: &'a C) -> Self {
        Self { db }
    }

    pub async fn insert_delivery_log(
        &self,
        entry: NewDeliveryLog,
    ) -> Result<DeliveryLogModel, RepositoryError> {
        let now = Utc::now().fixed_offset();
        DeliveryLogActiveModel {
            id: Set(Uuid::new_v4()),
            tenant_id: Set(entry.tenant_id),
            job_id: Set(entry.job_id),
            rule_id: Set(entry.rule_id),
            webhook_id: Set(entry.webhook_id),
            event_type: Set(entry.event_type),
            status: Set(entry.status),
            attempt_count: Set(entry.attempt_count),
            http_status: Set(entry.http_status),
            rendered_message: Set(entry.rendered_message),
            error_message: Set(entry.error_message),
            latency_ms: Set(entry.latency_ms),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(self.db)
        .await
        .map_err(RepositoryError::database_error)
    }

    /// Updates the row owned by `entry.job_id`, inserting it on the first attempt.
    pub async fn upsert_for_job(
        &self,
        entry: NewDeliveryLog,
    ) -> Result<DeliveryLogModel, RepositoryError> {
        let Some(job_id) = entry.job_id else {
            return self.insert_delivery_log(entry).await;
        };

        let existing = DeliveryLog::find()
            .filter(Column::JobId.eq(job_id))
            .one(self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        match existing {
            Some(row) => {
                let mut active = row.into_active_model();
                active.status = Set(entry.status);
                active.attempt_count = Set(entry.attempt_count);
                active.http_status = Set(entry.http_status);
                active.rendered_message = Set(entry.rendered_message);
                active.error_message = Set(entry.error_message);
                active.latency_ms = Set(entry.latency_ms);
                active.updated_at = Set(Utc::now().fixed_offset());
                active
                    .update(self.db)
                    .await
                    .map_err(RepositoryError::database_error)
            }
            None => self.insert_delivery_log(entry).await,
        }
    }

    /// Newest first.
    pub async fn list_delivery_logs(
        &self,
        tenant_id: Uuid,
        query: DeliveryLogQuery,
    ) -> Result<Vec<DeliveryLogModel>, RepositoryError> {
        let mut select = DeliveryLog::find()
            .filter(Column::TenantId.eq(tenant_id))
            .order_by_desc(Column::CreatedAt)
            .order_by_desc(Column::Id);

        if let Some(status) = query.status {
            select = select.filter(Column::Status.eq(status));
        }
        if let Some(event_type) = query.event_type {
            select = select.filter(Column::EventType.eq(event_type));
        }

        select
            .offset(query.offset.unwrap_or(0))
            .limit(query.limit.unwrap_or(50).min(500))
            .all(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    pub async fn find_by_job(&self, job_id: Uuid) -> Result<Option<DeliveryLogModel>, RepositoryError> {
        DeliveryLog::find()
            .filter(Column::JobId.eq(job_id))
            .one(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    /// Successful deliveries since `since`, used for monthly quotas.
    pub async fn count_successful_since(
        &self,
        tenant_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<i64, RepositoryError> {
        let count = DeliveryLog::find()
            .filter(Column::TenantId.eq(tenant_id))
            .filter(Column::Status.eq(STATUS_SUCCESS))
            .filter(Column::CreatedAt.gte(since.fixed_offset()))
            .count(self.db)
            .await
            .map_err(RepositoryError::database_error)?;
        Ok(count as i64)
    }

    /// Deletes rows created before `cutoff`; returns how many were removed.
    pub async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let result = DeliveryLog::delete_many()
            .filter(Column::CreatedAt.lt(cutoff.fixed_offset()))
            .exec(self.db)
            .await
            .map_err(RepositoryError::database_error)?;
        Ok(result.rows_affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect_in_memory;
    use crate::models::delivery_log::{STATUS_FAILED, STATUS_RETRYING, STATUS_SKIPPED_QUOTA};
    use crate::repositories::tenant::{CreateTenantRequest, TenantRepository};
    use chrono::Duration;
    use sea_orm::DatabaseConnection;

    async fn tenant(db: &DatabaseConnection) -> Uuid {
        TenantRepository::new(db)
            .create_tenant(CreateTenantRequest::default())
            .await
            .unwrap()
            .id
    }

    fn entry(tenant_id: Uuid, job_id: Option<Uuid>, status: &str, attempt: i32) -> NewDeliveryLog {
        NewDeliveryLog {
            tenant_id,
            job_id,
            rule_id: None,
            webhook_id: None,
            event_type: "deal.won".to_string(),
            status: status.to_string(),
            attempt_count: attempt,
            http_status: Some(500),
            rendered_message: None,
            error_message: None,
            latency_ms: Some(12),
        }
    }

    #[tokio::test]
    async fn test_one_row_per_job() {
        let db = connect_in_memory().await.unwrap();
        let repo = DeliveryLogRepository::new(&db);
        let tenant_id = tenant(&db).await;
        let job_id = Uuid::new_v4();

        repo.upsert_for_job(entry(tenant_id, Some(job_id), STATUS_RETRYING, 1))
            .await
            .unwrap();
        repo.upsert_for_job(entry(tenant_id, Some(job_id), STATUS_RETRYING, 2))
            .await
            .unwrap();
        let last = repo
            .upsert_for_job(entry(tenant_id, Some(job_id), STATUS_FAILED, 3))
            .await
            .unwrap();

        let rows = repo
            .list_delivery_logs(tenant_id, DeliveryLogQuery::default())
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, last.id);
        assert_eq!(rows[0].attempt_count, 3);
        assert_eq!(rows[0].status, STATUS_FAILED);
    }

    #[tokio::test]
    async fn test_success_count_ignores_skips_and_failures() {
        let db = connect_in_memory().await.unwrap();
        let repo = DeliveryLogRepository::new(&db);
        let tenant_id = tenant(&db).await;
        let other_tenant = tenant(&db).await;

        repo.insert_delivery_log(entry(tenant_id, None, STATUS_SUCCESS, 1)).await.unwrap();
        repo.insert_delivery_log(entry(tenant_id, None, STATUS_SUCCESS, 1)).await.unwrap();
        repo.insert_delivery_log(entry(tenant_id, None, STATUS_SKIPPED_QUOTA, 0)).await.unwrap();
        repo.insert_delivery_log(entry(tenant_id, None, STATUS_FAILED, 5)).await.unwrap();
        repo.insert_delivery_log(entry(other_tenant, None, STATUS_SUCCESS, 1)).await.unwrap();

        let since = Utc::now() - Duration::hours(1);
        assert_eq!(repo.count_successful_since(tenant_id, since).await.unwrap(), 2);

        let skipped = repo
            .list_delivery_logs(
                tenant_id,
                DeliveryLogQuery {
                    status: Some(STATUS_SKIPPED_QUOTA.to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(skipped.len(), 1);
    }

    #[tokio::test]
    async fn test_purge_respects_cutoff() {
        let db = connect_in_memory().await.unwrap();
        let repo = DeliveryLogRepository::new(&db);
        let tenant_id = tenant(&db).await;
        repo.insert_delivery_log(entry(tenant_id, None, STATUS_SUCCESS, 1)).await.unwrap();

        let purged = repo
            .purge_older_than(Utc::now() - Duration::days(30))
            .await
            .unwrap();
        assert_eq!(purged, 0);

        let purged = repo
            .purge_older_than(Utc::now() + Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(purged, 1);
    }
}
