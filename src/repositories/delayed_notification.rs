//! # DelayedNotification Repository
//!
//! Deliveries deferred by quiet hours. The sweep claims due rows with a
//! claim token; a claim older than the configured timeout may be taken over.

use chrono::{DateTime, Utc};
use sea_orm::sea_query::{Expr, Query};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::RepositoryError;
use crate::models::delayed_notification::{
    ActiveModel as DelayedActiveModel, Column, Entity as DelayedNotification,
    Model as DelayedModel,
};
use crate::models::notification_job::{
    Column as JobColumn, Entity as NotificationJob, STATUS_QUEUED, STATUS_RUNNING,
};

#[derive(Debug, Clone)]
pub struct NewDelayedNotification {
    pub tenant_id: Uuid,
    pub rule_id: Uuid,
    pub webhook_id: Uuid,
    pub payload: JsonValue,
    pub scheduled_for: DateTime<Utc>,
}

pub struct DelayedNotificationRepository<'a, C: ConnectionTrait> {
    db: &'a C,
}

impl<'a, C: ConnectionTrait> DelayedNotificationRepository<'a, C> {
    pub fn new(db: &'a C) -> Self {
        Self { db }
    }

    pub async fn create(
        &self,
        request: NewDelayedNotification,
        now: DateTime<Utc>,
    ) -> Result<DelayedModel, RepositoryError> {
        let now = now.fixed_offset();
        DelayedActiveModel {
            id: Set(Uuid::new_v4()),
            tenant_id: Set(request.tenant_id),
            rule_id: Set(request.rule_id),
            webhook_id: Set(request.webhook_id),
            payload: Set(request.payload),
            scheduled_for: Set(request.scheduled_for.fixed_offset()),
            reschedule_count: Set(0),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(self.db)
        .await
        .map_err(RepositoryError::database_error)
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<DelayedModel>, RepositoryError> {
        DelayedNotification::find_by_id(id)
            .one(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    /// Rows that still wait for promotion, oldest schedule first.
    pub async fn list_pending(&self, tenant_id: Uuid) -> Result<Vec<DelayedModel>, RepositoryError> {
        DelayedNotification::find()
            .filter(Column::TenantId.eq(tenant_id))
            .filter(Column::PromotedJobId.is_null())
            .filter(Column::SentAt.is_null())
            .order_by_asc(Column::ScheduledFor)
            .all(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    /// Claims up to `batch` due rows. Rows claimed before `stale_before`
    /// are considered abandoned and may be claimed again.
    pub async fn claim_due(
        &self,
        now: DateTime<Utc>,
        batch: u64,
        stale_before: DateTime<Utc>,
    ) -> Result<Vec<DelayedModel>, RepositoryError> {
        let now = now.fixed_offset();
        let claimable = Condition::all()
            .add(Column::SentAt.is_null())
            .add(Column::PromotedJobId.is_null())
            .add(Column::ScheduledFor.lte(now))
            .add(
                Condition::any()
                    .add(Column::ClaimedAt.is_null())
                    .add(Column::ClaimedAt.lt(stale_before.fixed_offset())),
            );

        let candidates: Vec<Uuid> = DelayedNotification::find()
            .select_only()
            .column(Column::Id)
            .filter(claimable.clone())
            .order_by_asc(Column::ScheduledFor)
            .limit(batch)
            .into_tuple::<Uuid>()
            .all(self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let token = Uuid::new_v4();
        let claimed = DelayedNotification::update_many()
            .col_expr(Column::ClaimedAt, Expr::value(Some(now)))
            .col_expr(Column::ClaimToken, Expr::value(Some(token)))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::Id.is_in(candidates))
            .filter(claimable)
            .exec(self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        if claimed.rows_affected == 0 {
            return Ok(Vec::new());
        }

        DelayedNotification::find()
            .filter(Column::ClaimToken.eq(token))
            .order_by_asc(Column::ScheduledFor)
            .all(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    /// Releases a claimed row with a new due time.
    pub async fn reschedule(
        &self,
        id: Uuid,
        claim_token: Uuid,
        scheduled_for: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = DelayedNotification::update_many()
            .col_expr(Column::ScheduledFor, Expr::value(scheduled_for.fixed_offset()))
            .col_expr(Column::ClaimedAt, Expr::value(Option::<DateTime<chrono::FixedOffset>>::None))
            .col_expr(Column::ClaimToken, Expr::value(Option::<Uuid>::None))
            .col_expr(Column::RescheduleCount, Expr::col(Column::RescheduleCount).add(1))
            .col_expr(Column::UpdatedAt, Expr::value(now.fixed_offset()))
            .filter(Column::Id.eq(id))
            .filter(Column::ClaimToken.eq(claim_token))
            .exec(self.db)
            .await
            .map_err(RepositoryError::database_error)?;
        Ok(result.rows_affected > 0)
    }

    /// Records the delivery job created for a claimed row. Fails silently
    /// (returns false) when the claim was lost to another sweeper.
    pub async fn mark_promoted(
        &self,
        id: Uuid,
        claim_token: Uuid,
        job_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = DelayedNotification::update_many()
            .col_expr(Column::PromotedJobId, Expr::value(Some(job_id)))
            .col_expr(Column::UpdatedAt, Expr::value(now.fixed_offset()))
            .filter(Column::Id.eq(id))
            .filter(Column::ClaimToken.eq(claim_token))
            .filter(Column::PromotedJobId.is_null())
            .exec(self.db)
            .await
            .map_err(RepositoryError::database_error)?;
        Ok(result.rows_affected > 0)
    }

    pub async fn mark_sent(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), RepositoryError> {
        let now = now.fixed_offset();
        DelayedNotification::update_many()
            .col_expr(Column::SentAt, Expr::value(Some(now)))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::Id.eq(id))
            .filter(Column::SentAt.is_null())
            .exec(self.db)
            .await
            .map_err(RepositoryError::database_error)?;
        Ok(())
    }

    /// Deletes rows settled before `cutoff`: sent, or promoted to a job that
    /// is no longer queued or running.
    pub async fn purge_settled_before(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let cutoff = cutoff.fixed_offset();
        let active_jobs = Query::select()
            .column(JobColumn::Id)
            .from(NotificationJob)
            .and_where(JobColumn::Status.is_in([STATUS_QUEUED, STATUS_RUNNING]))
            .to_owned();

        let result = DelayedNotification::delete_many()
            .filter(
                Condition::any()
                    .add(
                        Condition::all()
                            .add(Column::SentAt.is_not_null())
                            .add(Column::SentAt.lt(cutoff)),
                    )
                    .add(
                        Condition::all()
                            .add(Column::PromotedJobId.is_not_null())
                            .add(Column::UpdatedAt.lt(cutoff))
                            .add(Column::PromotedJobId.not_in_subquery(active_jobs)),
                    ),
            )
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
    use crate::models::notification_job::STATUS_FAILED_PERMANENT;
    use crate::repositories::chat_webhook::{ChatWebhookRepository, CreateChatWebhookRequest};
    use crate::repositories::notification_job::{NewDeliveryJob, NotificationJobRepository};
    use crate::repositories::rule::{CreateRuleRequest, RuleRepository};
    use crate::repositories::tenant::{CreateTenantRequest, TenantRepository};
    use chrono::Duration;
    use sea_orm::DatabaseConnection;
    use serde_json::json;

    async fn pending(db: &DatabaseConnection, scheduled_for: DateTime<Utc>) -> DelayedModel {
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
        let rule = RuleRepository::new(db)
            .create_rule(tenant.id, CreateRuleRequest::new("Won", "deal.won", webhook.id))
            .await
            .unwrap();

        DelayedNotificationRepository::new(db)
            .create(
                NewDelayedNotification {
                    tenant_id: tenant.id,
                    rule_id: rule.id,
                    webhook_id: webhook.id,
                    payload: json!({ "event_type": "deal.won" }),
                    scheduled_for,
                },
                Utc::now(),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_claims_only_due_rows_once() {
        let db = connect_in_memory().await.unwrap();
        let now = Utc::now();
        let due = pending(&db, now - Duration::minutes(1)).await;
        pending(&db, now + Duration::hours(1)).await;
        let repo = DelayedNotificationRepository::new(&db);

        let stale_before = now - Duration::minutes(5);
        let claimed = repo.claim_due(now, 10, stale_before).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, due.id);
        assert!(claimed[0].sent_at.is_none());

        assert!(repo.claim_due(now, 10, stale_before).await.unwrap().is_empty());

        // An abandoned claim can be taken over
        let later = now + Duration::minutes(10);
        let retaken = repo
            .claim_due(later, 10, later - Duration::minutes(5))
            .await
            .unwrap();
        assert_eq!(retaken.len(), 1);
        assert_ne!(retaken[0].claim_token, claimed[0].claim_token);
    }

    #[tokio::test]
    async fn test_reschedule_and_promote() {
        let db = connect_in_memory().await.unwrap();
        let now = Utc::now();
        let row = pending(&db, now - Duration::minutes(1)).await;
        let repo = DelayedNotificationRepository::new(&db);

        let claimed = repo.claim_due(now, 10, now - Duration::minutes(5)).await.unwrap();
        let token = claimed[0].claim_token.unwrap();

        let next = now + Duration::hours(2);
        assert!(repo.reschedule(row.id, token, next, now).await.unwrap());
        let stored = repo.get(row.id).await.unwrap().unwrap();
        assert_eq!(stored.reschedule_count, 1);
        assert!(stored.claim_token.is_none());

        let claimed = repo.claim_due(next, 10, next - Duration::minutes(5)).await.unwrap();
        let token = claimed[0].claim_token.unwrap();
        let job_id = Uuid::new_v4();
        assert!(repo.mark_promoted(row.id, token, job_id, next).await.unwrap());
        assert!(!repo.mark_promoted(row.id, token, Uuid::new_v4(), next).await.unwrap());

        repo.mark_sent(row.id, next).await.unwrap();
        let stored = repo.get(row.id).await.unwrap().unwrap();
        assert_eq!(stored.promoted_job_id, Some(job_id));
        assert!(stored.sent_at.is_some());

        assert_eq!(repo.purge_settled_before(next + Duration::seconds(1)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_purge_keeps_rows_whose_job_is_active() {
        let db = connect_in_memory().await.unwrap();
        let now = Utc::now();
        let repo = DelayedNotificationRepository::new(&db);
        let jobs = NotificationJobRepository::new(&db);

        // Promoted, then the delivery failed permanently: never marked sent
        let failed = pending(&db, now - Duration::minutes(1)).await;
        let active = pending(&db, now - Duration::minutes(1)).await;
        let claimed = repo.claim_due(now, 10, now - Duration::minutes(5)).await.unwrap();
        assert_eq!(claimed.len(), 2);

        for row in &claimed {
            let job = jobs
                .enqueue_delivery_job(
                    NewDeliveryJob {
                        tenant_id: row.tenant_id,
                        rule_id: row.rule_id,
                        webhook_id: row.webhook_id,
                        payload: row.payload.clone(),
                        delayed_notification_id: Some(row.id),
                        max_attempts: 1,
                    },
                    now,
                )
                .await
                .unwrap();
            assert!(repo.mark_promoted(row.id, row.claim_token.unwrap(), job.id, now).await.unwrap());
            if row.id == failed.id {
                let running = jobs.claim_due(now, 10).await.unwrap();
                let mine = running.iter().find(|job| job.delayed_notification_id == Some(failed.id)).unwrap();
                assert!(jobs.finish(mine, STATUS_FAILED_PERMANENT, None, now).await.unwrap());
            }
        }

        // Nothing is old enough yet
        assert_eq!(repo.purge_settled_before(now - Duration::days(1)).await.unwrap(), 0);

        let cutoff = now + Duration::days(1);
        assert_eq!(repo.purge_settled_before(cutoff).await.unwrap(), 1);
        assert!(repo.get(failed.id).await.unwrap().is_none());
        assert!(repo.get(active.id).await.unwrap().is_some());
    }
}
