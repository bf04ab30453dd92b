//! # NotificationJob Repository
//!
//! The durable work queue. Claims are made with a conditional `UPDATE` that
//! stamps a fresh claim token, followed by a read by that token, so two
//! workers never receive the same job.

use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::RepositoryError;
use crate::models::notification_job::{
    ActiveModel as JobActiveModel, Column, Entity as NotificationJob, KIND_DELIVERY, KIND_EVENT,
    Model as JobModel, STATUS_QUEUED, STATUS_RUNNING, TERMINAL_STATUSES,
};

/// Matching only fails on database errors, which rarely outlast a few retries
pub const EVENT_JOB_MAX_ATTEMPTS: i32 = 3;

/// A delivery job for one matched rule
#[derive(Debug, Clone)]
pub struct NewDeliveryJob {
    pub tenant_id: Uuid,
    pub rule_id: Uuid,
    pub webhook_id: Uuid,
    pub payload: JsonValue,
    pub delayed_notification_id: Option<Uuid>,
    pub max_attempts: i32,
}

/// Works on a pooled connection or inside a transaction.
pub struct NotificationJobRepository<'a, C: ConnectionTrait> {
    db: &'a C,
}

impl<'a, C: ConnectionTrait> NotificationJobRepository<'a, C> {
    pub fn new(db: &'a C) -> Self {
        Self { db }
    }

    /// Queues a normalized event for matching.
    pub async fn enqueue_event_job(
        &self,
        tenant_id: Uuid,
        payload: JsonValue,
        now: DateTime<Utc>,
    ) -> Result<JobModel, RepositoryError> {
        let job = self
            .insert_job(JobActiveModel {
                tenant_id: Set(tenant_id),
                kind: Set(KIND_EVENT.to_string()),
                max_attempts: Set(EVENT_JOB_MAX_ATTEMPTS),
                payload: Set(payload),
                ..Default::default()
            }, now)
            .await?;

        tracing::debug!(tenant_id = %tenant_id, job_id = %job.id, "Event job enqueued");
        Ok(job)
    }

    pub async fn enqueue_delivery_job(
        &self,
        request: NewDeliveryJob,
        now: DateTime<Utc>,
    ) -> Result<JobModel, RepositoryError> {
        let job = self
            .insert_job(JobActiveModel {
                tenant_id: Set(request.tenant_id),
                kind: Set(KIND_DELIVERY.to_string()),
                max_attempts: Set(request.max_attempts.max(1)),
                payload: Set(request.payload),
                rule_id: Set(Some(request.rule_id)),
                webhook_id: Set(Some(request.webhook_id)),
                delayed_notification_id: Set(request.delayed_notification_id),
                ..Default::default()
            }, now)
            .await?;

        tracing::debug!(
            tenant_id = %job.tenant_id,
            job_id = %job.id,
            rule_id = %request.rule_id,
            "Delivery job enqueued"
        );
        Ok(job)
    }

    async fn insert_job(&self, mut job: JobActiveModel, now: DateTime<Utc>) -> Result<JobModel, RepositoryError> {
        let now = now.fixed_offset();
        job.id = Set(Uuid::new_v4());
        job.status = Set(STATUS_QUEUED.to_string());
        job.attempts = Set(0);
        job.scheduled_at = Set(now);
        job.created_at = Set(now);
        job.updated_at = Set(now);
        // Unset nullable columns are stored as NULL
        job.insert(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    /// Claims up to `batch` due jobs, marking them running and counting the attempt.
    pub async fn claim_due(&self, now: DateTime<Utc>, batch: u64) -> Result<Vec<JobModel>, RepositoryError> {
        let now = now.fixed_offset();
        let candidates: Vec<Uuid> = NotificationJob::find()
            .select_only()
            .column(Column::Id)
            .filter(Column::Status.eq(STATUS_QUEUED))
            .filter(Column::ScheduledAt.lte(now))
            .filter(
                Column::RetryAfter
                    .is_null()
                    .or(Column::RetryAfter.lte(now)),
            )
            .order_by_asc(Column::ScheduledAt)
            .order_by_asc(Column::Id)
            .limit(batch)
            .into_tuple::<Uuid>()
            .all(self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let token = Uuid::new_v4();
        let claimed = NotificationJob::update_many()
            .col_expr(Column::Status, Expr::value(STATUS_RUNNING))
            .col_expr(Column::ClaimToken, Expr::value(Some(token)))
            .col_expr(Column::StartedAt, Expr::value(Some(now)))
            .col_expr(Column::Attempts, Expr::col(Column::Attempts).add(1))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::Id.is_in(candidates))
            .filter(Column::Status.eq(STATUS_QUEUED))
            .exec(self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        if claimed.rows_affected == 0 {
            return Ok(Vec::new());
        }

        NotificationJob::find()
            .filter(Column::ClaimToken.eq(token))
            .filter(Column::Status.eq(STATUS_RUNNING))
            .order_by_asc(Column::ScheduledAt)
            .order_by_asc(Column::Id)
            .all(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    pub async fn get_job(&self, job_id: Uuid) -> Result<Option<JobModel>, RepositoryError> {
        NotificationJob::find_by_id(job_id)
            .one(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    /// Moves a running job to a terminal status. Only the claim that is still
    /// current may finish the job; returns false when the claim was lost.
    pub async fn finish(
        &self,
        job: &JobModel,
        status: &str,
        error: Option<JsonValue>,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let now = now.fixed_offset();
        let result = NotificationJob::update_many()
            .col_expr(Column::Status, Expr::value(status))
            .col_expr(Column::FinishedAt, Expr::value(Some(now)))
            .col_expr(Column::Error, Expr::value(error))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(current_claim(job))
            .exec(self.db)
            .await
            .map_err(RepositoryError::database_error)?;
        Ok(result.rows_affected > 0)
    }

    /// Puts a running job back in the queue, claimable from `retry_after`.
    /// Jobs that already reached a terminal status are left untouched.
    pub async fn requeue(
        &self,
        job: &JobModel,
        retry_after: DateTime<Utc>,
        error: JsonValue,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = NotificationJob::update_many()
            .col_expr(Column::Status, Expr::value(STATUS_QUEUED))
            .col_expr(Column::RetryAfter, Expr::value(Some(retry_after.fixed_offset())))
            .col_expr(Column::ClaimToken, Expr::value(Option::<Uuid>::None))
            .col_expr(Column::Error, Expr::value(Some(error)))
            .col_expr(Column::UpdatedAt, Expr::value(now.fixed_offset()))
            .filter(current_claim(job))
            .exec(self.db)
            .await
            .map_err(RepositoryError::database_error)?;
        Ok(result.rows_affected > 0)
    }

    /// Deletes jobs that reached a terminal status before `cutoff`.
    pub async fn purge_finished_before(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let result = NotificationJob::delete_many()
            .filter(Column::Status.is_in(TERMINAL_STATUSES.iter().copied()))
            .filter(Column::FinishedAt.lt(cutoff.fixed_offset()))
            .exec(self.db)
            .await
            .map_err(RepositoryError::database_error)?;
        Ok(result.rows_affected)
    }

    /// Returns jobs stuck in `running` since before `started_before` to the
    /// queue, e.g. after a worker crash. The interrupted attempt still counts.
    pub async fn release_stale(&self, started_before: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let result = NotificationJob::update_many()
            .col_expr(Column::Status, Expr::value(STATUS_QUEUED))
            .col_expr(Column::ClaimToken, Expr::value(Option::<Uuid>::None))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now().fixed_offset()))
            .filter(Column::Status.eq(STATUS_RUNNING))
            .filter(Column::StartedAt.lt(started_before.fixed_offset()))
            .exec(self.db)
            .await
            .map_err(RepositoryError::database_error)?;
        Ok(result.rows_affected)
    }
}

/// Matches `job` only while it is running under the claim it was read with.
fn current_claim(job: &JobModel) -> Condition {
    let token = match job.claim_token {
        Some(token) => Column::ClaimToken.eq(token),
        None => Column::ClaimToken.is_null(),
    };
    Condition::all()
        .add(Column::Id.eq(job.id))
        .add(Column::Status.eq(STATUS_RUNNING))
        .add(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect_in_memory;
    use crate::models::notification_job::{STATUS_DELIVERED, STATUS_NO_OP};
    use crate::repositories::tenant::{CreateTenantRequest, TenantRepository};
    use chrono::Duration;
    use serde_json::json;

    #[tokio::test]
    async fn test_claim_is_exclusive_and_counts_attempts() {
        let db = connect_in_memory().await.unwrap();
        let tenant = TenantRepository::new(&db)
            .create_tenant(CreateTenantRequest::default())
            .await
            .unwrap();
        let repo = NotificationJobRepository::new(&db);
        let now = Utc::now();

        let job = repo
            .enqueue_event_job(tenant.id, json!({ "event_type": "deal.won" }), now)
            .await
            .unwrap();
        assert_eq!(job.status, STATUS_QUEUED);

        let claimed = repo.claim_due(now, 10).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].attempts, 1);
        assert_eq!(claimed[0].status, STATUS_RUNNING);
        assert!(claimed[0].claim_token.is_some());

        assert!(repo.claim_due(now, 10).await.unwrap().is_empty());

        assert!(repo.finish(&claimed[0], STATUS_NO_OP, None, now).await.unwrap());
        let stored = repo.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, STATUS_NO_OP);
        assert!(stored.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_requeued_job_waits_for_retry_after() {
        let db = connect_in_memory().await.unwrap();
        let tenant = TenantRepository::new(&db)
            .create_tenant(CreateTenantRequest::default())
            .await
            .unwrap();
        let repo = NotificationJobRepository::new(&db);
        let now = Utc::now();

        repo.enqueue_event_job(tenant.id, json!({}), now).await.unwrap();
        let claimed = repo.claim_due(now, 10).await.unwrap();
        assert!(
            repo.requeue(&claimed[0], now + Duration::seconds(30), json!({ "message": "boom" }), now)
                .await
                .unwrap()
        );

        assert!(repo.claim_due(now + Duration::seconds(10), 10).await.unwrap().is_empty());

        let reclaimed = repo.claim_due(now + Duration::seconds(31), 10).await.unwrap();
        assert_eq!(reclaimed.len(), 1);
        assert_eq!(reclaimed[0].attempts, 2);
    }

    #[tokio::test]
    async fn test_release_stale_running_jobs() {
        let db = connect_in_memory().await.unwrap();
        let tenant = TenantRepository::new(&db)
            .create_tenant(CreateTenantRequest::default())
            .await
            .unwrap();
        let repo = NotificationJobRepository::new(&db);
        let then = Utc::now() - Duration::minutes(30);

        repo.enqueue_event_job(tenant.id, json!({}), then).await.unwrap();
        repo.claim_due(then, 10).await.unwrap();

        let released = repo
            .release_stale(Utc::now() - Duration::minutes(10))
            .await
            .unwrap();
        assert_eq!(released, 1);
        assert_eq!(repo.claim_due(Utc::now(), 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_requeue_leaves_finished_job_alone() {
        let db = connect_in_memory().await.unwrap();
        let tenant = TenantRepository::new(&db)
            .create_tenant(CreateTenantRequest::default())
            .await
            .unwrap();
        let repo = NotificationJobRepository::new(&db);
        let now = Utc::now();

        let job = repo.enqueue_event_job(tenant.id, json!({}), now).await.unwrap();
        let claimed = repo.claim_due(now, 10).await.unwrap().remove(0);
        assert!(repo.finish(&claimed, STATUS_DELIVERED, None, now).await.unwrap());

        let requeued = repo
            .requeue(&claimed, now, json!({ "message": "late failure" }), now)
            .await
            .unwrap();
        assert!(!requeued);

        let stored = repo.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, STATUS_DELIVERED);
        assert!(stored.error.is_none());
        assert!(repo.claim_due(now + Duration::hours(1), 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stale_claim_cannot_finish() {
        let db = connect_in_memory().await.unwrap();
        let tenant = TenantRepository::new(&db)
            .create_tenant(CreateTenantRequest::default())
            .await
            .unwrap();
        let repo = NotificationJobRepository::new(&db);
        let then = Utc::now() - Duration::minutes(30);

        repo.enqueue_event_job(tenant.id, json!({}), then).await.unwrap();
        let first = repo.claim_due(then, 10).await.unwrap().remove(0);
        repo.release_stale(Utc::now() - Duration::minutes(10)).await.unwrap();
        let second = repo.claim_due(Utc::now(), 10).await.unwrap().remove(0);

        assert!(!repo.finish(&first, STATUS_NO_OP, None, Utc::now()).await.unwrap());
        assert!(repo.finish(&second, STATUS_NO_OP, None, Utc::now()).await.unwrap());
    }

    #[tokio::test]
    async fn test_purge_removes_only_old_terminal_jobs() {
        let db = connect_in_memory().await.unwrap();
        let tenant = TenantRepository::new(&db)
            .create_tenant(CreateTenantRequest::default())
            .await
            .unwrap();
        let repo = NotificationJobRepository::new(&db);
        let old = Utc::now() - Duration::days(40);

        let finished = repo.enqueue_event_job(tenant.id, json!({}), old).await.unwrap();
        let claimed = repo.claim_due(old, 10).await.unwrap().remove(0);
        repo.finish(&claimed, STATUS_NO_OP, None, old).await.unwrap();
        let queued = repo.enqueue_event_job(tenant.id, json!({}), old).await.unwrap();

        let purged = repo
            .purge_finished_before(Utc::now() - Duration::days(30))
            .await
            .unwrap();
        assert_eq!(purged, 1);
        assert!(repo.get_job(finished.id).await.unwrap().is_none());
        assert!(repo.get_job(queued.id).await.unwrap().is_some());
    }
}
