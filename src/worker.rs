//! # Delivery Worker
//!
//! Background executor that claims due notification jobs and drives them
//! through the pipeline.
//!
//! * **Event jobs** are matched against the tenant's rules. Each matched rule
//!   passes the plan quota and the quiet-hours gate, then becomes either a
//!   delayed notification or a delivery job. One rule's failure never blocks
//!   its siblings. The fan-out and the job's completion commit together, so a
//!   re-claimed event job never enqueues a second set of deliveries.
//! * **Delivery jobs** are rendered and posted to Google Chat. The outcome is
//!   classified as delivered, retryable (re-queued with exponential backoff
//!   until `max_attempts`) or permanent.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use rand::{Rng, thread_rng};
use sea_orm::{ConnectionTrait, DatabaseConnection, TransactionTrait};
use serde_json::json;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::chat::{ChatClient, DeliveryOutcome, redacted_target};
use crate::config::{AppConfig, DeliveryConfig};
use crate::error::RepositoryError;
use crate::models::delivery_log::{STATUS_FAILED, STATUS_RETRYING, STATUS_SKIPPED_QUOTA, STATUS_SUCCESS};
use crate::models::notification_job::{
    KIND_DELIVERY, KIND_EVENT, Model as JobModel, STATUS_CANCELLED, STATUS_COMPLETED,
    STATUS_DELIVERED, STATUS_FAILED_PERMANENT, STATUS_NO_OP,
};
use crate::models::rule::Model as RuleModel;
use crate::models::tenant::Model as TenantModel;
use crate::pipeline::event::NormalizedEvent;
use crate::pipeline::matcher::RuleMatcher;
use crate::pipeline::quiet_hours::{DeferDecision, QuietHoursGate};
use crate::pipeline::quota::{QuotaService, plan_for};
use crate::pipeline::template::{RenderContext, TemplateMode, render};
use crate::repositories::delayed_notification::NewDelayedNotification;
use crate::repositories::delivery_log::NewDeliveryLog;
use crate::repositories::notification_job::NewDeliveryJob;
use crate::repositories::{
    ChatWebhookRepository, DelayedNotificationRepository, DeliveryLogRepository,
    NotificationJobRepository, RuleRepository, TenantRepository,
};

/// Upper bound on a server-requested `Retry-After`
const MAX_RETRY_AFTER_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error("job payload is not a normalized event: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("delivery job {0} is missing its rule or webhook reference")]
    MissingReference(Uuid),
    #[error("job {0} was re-claimed by another worker")]
    ClaimLost(Uuid),
    #[error("worker semaphore closed")]
    SemaphoreClosed,
}

/// Terminal or intermediate result of processing one job, for metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobResult {
    NoOp,
    Completed,
    Delivered,
    Retrying,
    FailedPermanent,
    Cancelled,
}

impl JobResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobResult::NoOp => STATUS_NO_OP,
            JobResult::Completed => STATUS_COMPLETED,
            JobResult::Delivered => STATUS_DELIVERED,
            JobResult::Retrying => "retrying",
            JobResult::FailedPermanent => STATUS_FAILED_PERMANENT,
            JobResult::Cancelled => STATUS_CANCELLED,
        }
    }
}

/// Exponential backoff: `base * 2^(attempt - 1)` capped at `max`, raised to
/// any server-requested delay, plus up to `jitter_factor` of random slack.
pub fn compute_backoff_seconds(
    config: &DeliveryConfig,
    attempts_completed: i32,
    retry_after_secs: Option<u64>,
) -> f64 {
    let exponent = attempts_completed.saturating_sub(1).clamp(0, 30);
    let mut backoff = (config.backoff_base_seconds as f64 * 2_f64.powi(exponent))
        .min(config.backoff_max_seconds as f64);

    if let Some(requested) = retry_after_secs {
        backoff = backoff.max(requested.min(MAX_RETRY_AFTER_SECS) as f64);
    }

    let jitter_span = config.jitter_factor * backoff;
    if jitter_span > 0.0 {
        backoff + thread_rng().gen_range(0.0..jitter_span)
    } else {
        backoff
    }
}

/// What an event job writes for one matched rule.
#[derive(Debug, Clone, PartialEq, Eq)]
enum RuleAction {
    SkipQuota(String),
    Defer(DateTime<Utc>),
    Deliver,
}

impl RuleAction {
    fn decide(quota_reason: Option<String>, decision: DeferDecision, now: DateTime<Utc>) -> Self {
        match quota_reason {
            Some(reason) => RuleAction::SkipQuota(reason),
            None if decision.defer => RuleAction::Defer(decision.next_allowed_at.unwrap_or(now)),
            None => RuleAction::Deliver,
        }
    }
}

/// Delivery worker; cheap to clone, one clone per in-flight job.
#[derive(Clone)]
pub struct DeliveryWorker {
    db: Arc<DatabaseConnection>,
    chat: Arc<dyn ChatClient>,
    config: DeliveryConfig,
    render_ctx: RenderContext,
}

impl DeliveryWorker {
    pub fn new(
        db: Arc<DatabaseConnection>,
        chat: Arc<dyn ChatClient>,
        app_config: &AppConfig,
    ) -> Self {
        Self {
            db,
            chat,
            config: app_config.delivery.clone(),
            render_ctx: RenderContext {
                app_base: app_config.pipedrive_app_base.clone(),
            },
        }
    }

    pub fn config(&self) -> &DeliveryConfig {
        &self.config
    }

    /// Run the worker loop until the shutdown token fires.
    #[instrument(skip_all)]
    pub async fn run(self, shutdown: CancellationToken) {
        info!(config = ?self.config, "Starting delivery worker");
        let tick = Duration::from_millis(self.config.tick_ms);

        loop {
            let started = Instant::now();
            match self.run_once().await {
                Ok(0) => {}
                Ok(count) => debug!(count, "Processed notification jobs"),
                Err(err) => error!(error = %err, "Delivery worker tick failed"),
            }
            histogram!("pipenotify_worker_tick_duration_ms")
                .record(started.elapsed().as_secs_f64() * 1_000.0);

            let remaining = tick.saturating_sub(started.elapsed());
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Delivery worker shutdown requested");
                    break;
                }
                _ = sleep(remaining) => {}
            }
        }

        info!("Delivery worker stopped");
    }

    pub async fn run_once(&self) -> Result<usize, WorkerError> {
        self.run_once_at(Utc::now()).await
    }

    /// Claims jobs due at `now` and processes them with bounded concurrency.
    #[instrument(skip(self), fields(batch_size = self.config.claim_batch))]
    pub async fn run_once_at(&self, now: DateTime<Utc>) -> Result<usize, WorkerError> {
        let jobs = NotificationJobRepository::new(self.db.as_ref())
            .claim_due(now, self.config.claim_batch)
            .await?;

        if jobs.is_empty() {
            return Ok(0);
        }

        let count = jobs.len();
        debug!(count, "Claimed notification jobs");

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut handles = Vec::with_capacity(count);
        for job in jobs {
            let worker = self.clone();
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| WorkerError::SemaphoreClosed)?;

            handles.push(tokio::spawn(async move {
                let _permit = permit;
                worker.run_single_job(job, now).await;
            }));
        }

        for handle in handles {
            if let Err(err) = handle.await {
                error!(error = %err, "Notification job task panicked");
            }
        }

        Ok(count)
    }

    /// Processes one claimed job. Infrastructure errors re-queue the job until
    /// its attempts are exhausted.
    #[instrument(skip(self, job), fields(job_id = %job.id, tenant_id = %job.tenant_id, kind = %job.kind, attempt = job.attempts))]
    pub async fn run_single_job(&self, job: JobModel, now: DateTime<Utc>) {
        let started = Instant::now();
        let result = match job.kind.as_str() {
            KIND_EVENT => self.process_event_job(&job, now).await,
            KIND_DELIVERY => self.process_delivery_job(&job, now).await,
            other => {
                warn!(kind = other, "Cancelling job of unknown kind");
                self.finish(&job, STATUS_CANCELLED, Some(json!({ "message": "unknown job kind" })), now)
                    .await
                    .map(|_| JobResult::Cancelled)
            }
        };

        let result = match result {
            Ok(result) => result,
            Err(WorkerError::ClaimLost(_)) => {
                warn!("Job claim expired while processing, leaving it to the new claimant");
                counter!("pipenotify_jobs_claim_lost_total", "kind" => job.kind.clone()).increment(1);
                return;
            }
            Err(err) => {
                error!(error = %err, "Notification job failed");
                match self.handle_job_error(&job, &err, now).await {
                    Ok(result) => result,
                    Err(secondary) => {
                        error!(error = %secondary, "Failed to record job failure");
                        return;
                    }
                }
            }
        };

        counter!(
            "pipenotify_jobs_processed_total",
            "kind" => job.kind.clone(),
            "result" => result.as_str()
        )
        .increment(1);
        histogram!("pipenotify_job_duration_ms", "kind" => job.kind.clone())
            .record(started.elapsed().as_secs_f64() * 1_000.0);
    }

    async fn handle_job_error(
        &self,
        job: &JobModel,
        err: &WorkerError,
        now: DateTime<Utc>,
    ) -> Result<JobResult, WorkerError> {
        let permanent = matches!(err, WorkerError::Payload(_) | WorkerError::MissingReference(_));
        let details = json!({
            "message": err.to_string(),
            "attempts": job.attempts,
            "timestamp": now.to_rfc3339(),
        });

        if permanent || job.attempts >= job.max_attempts {
            self.finish(job, STATUS_FAILED_PERMANENT, Some(details), now).await?;
            return Ok(JobResult::FailedPermanent);
        }

        let backoff = compute_backoff_seconds(&self.config, job.attempts, None);
        let retry_after = now + chrono::Duration::milliseconds((backoff * 1_000.0) as i64);
        self.requeue(job, retry_after, details, now).await?;
        Ok(JobResult::Retrying)
    }

    /// Finishes `job` on `conn` while it still holds its claim.
    async fn finish_on<C: ConnectionTrait>(
        conn: &C,
        job: &JobModel,
        status: &str,
        error: Option<serde_json::Value>,
        now: DateTime<Utc>,
    ) -> Result<(), WorkerError> {
        let finished = NotificationJobRepository::new(conn)
            .finish(job, status, error, now)
            .await?;
        if finished {
            Ok(())
        } else {
            Err(WorkerError::ClaimLost(job.id))
        }
    }

    async fn finish(
        &self,
        job: &JobModel,
        status: &str,
        error: Option<serde_json::Value>,
        now: DateTime<Utc>,
    ) -> Result<(), WorkerError> {
        Self::finish_on(self.db.as_ref(), job, status, error, now).await
    }

    async fn requeue(
        &self,
        job: &JobModel,
        retry_after: DateTime<Utc>,
        details: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<(), WorkerError> {
        let requeued = NotificationJobRepository::new(self.db.as_ref())
            .requeue(job, retry_after, details, now)
            .await?;
        if requeued {
            Ok(())
        } else {
            Err(WorkerError::ClaimLost(job.id))
        }
    }

    async fn active_tenant(&self, tenant_id: Uuid) -> Result<Option<TenantModel>, WorkerError> {
        let tenant = TenantRepository::new(self.db.as_ref())
            .get_tenant_by_id(tenant_id)
            .await?;
        Ok(tenant.filter(|tenant| !tenant.is_canceled()))
    }

    async fn process_event_job(&self, job: &JobModel, now: DateTime<Utc>) -> Result<JobResult, WorkerError> {
        let event: NormalizedEvent = serde_json::from_value(job.payload.clone())?;

        let Some(tenant) = self.active_tenant(job.tenant_id).await? else {
            info!("Tenant missing or canceled, dropping event");
            self.finish(job, STATUS_CANCELLED, None, now).await?;
            return Ok(JobResult::Cancelled);
        };

        let rules = RuleMatcher::new(self.db.as_ref())
            .match_event(tenant.id, &event)
            .await?;

        if rules.is_empty() {
            info!(event_type = %event.event_type, "No rules matched event");
            self.finish(job, STATUS_NO_OP, None, now).await?;
            return Ok(JobResult::NoOp);
        }

        let plan = plan_for(&tenant.plan);
        let decision = QuietHoursGate::new(self.db.as_ref())
            .should_defer_now(tenant.id, now)
            .await?;

        // Reads happen before the transaction opens
        let mut failed_rules = Vec::new();
        let mut actions = Vec::with_capacity(rules.len());
        for (index, rule) in rules.iter().enumerate() {
            match QuotaService::new(self.db.as_ref())
                .check(job.tenant_id, plan, index, now)
                .await
            {
                Ok(quota) => actions.push((rule, RuleAction::decide(quota.reason(), decision, now))),
                Err(err) => {
                    warn!(rule_id = %rule.id, error = %err, "Failed to check quota for matched rule");
                    failed_rules.push(json!({ "rule_id": rule.id, "message": err.to_string() }));
                }
            }
        }

        let txn = self.db.begin().await.map_err(RepositoryError::database_error)?;
        let mut written = Vec::with_capacity(actions.len());
        for (rule, action) in actions {
            let savepoint = txn.begin().await.map_err(RepositoryError::database_error)?;
            match self.dispatch_rule(&savepoint, job, &event, rule, &action, now).await {
                Ok(()) => {
                    savepoint.commit().await.map_err(RepositoryError::database_error)?;
                    written.push(action);
                }
                Err(err) => {
                    savepoint.rollback().await.map_err(RepositoryError::database_error)?;
                    warn!(rule_id = %rule.id, error = %err, "Failed to dispatch matched rule");
                    failed_rules.push(json!({ "rule_id": rule.id, "message": err.to_string() }));
                }
            }
        }

        let failed = failed_rules.len();
        let error = (!failed_rules.is_empty()).then(|| json!({ "failed_rules": failed_rules }));
        match Self::finish_on(&txn, job, STATUS_COMPLETED, error, now).await {
            Ok(()) => txn.commit().await.map_err(RepositoryError::database_error)?,
            Err(err) => {
                txn.rollback().await.map_err(RepositoryError::database_error)?;
                return Err(err);
            }
        }

        for action in &written {
            match action {
                RuleAction::SkipQuota(_) => {
                    counter!("pipenotify_notifications_skipped_quota_total", "plan" => plan.as_str())
                        .increment(1)
                }
                RuleAction::Defer(_) => counter!("pipenotify_notifications_deferred_total").increment(1),
                RuleAction::Deliver => {}
            }
        }

        info!(
            event_type = %event.event_type,
            matched = rules.len(),
            failed,
            deferred = decision.defer,
            "Event matched rules"
        );
        Ok(JobResult::Completed)
    }

    /// Writes one rule's outcome on `conn`.
    async fn dispatch_rule<C: ConnectionTrait>(
        &self,
        conn: &C,
        job: &JobModel,
        event: &NormalizedEvent,
        rule: &RuleModel,
        action: &RuleAction,
        now: DateTime<Utc>,
    ) -> Result<(), WorkerError> {
        match action {
            RuleAction::SkipQuota(reason) => {
                DeliveryLogRepository::new(conn)
                    .insert_delivery_log(NewDeliveryLog {
                        tenant_id: job.tenant_id,
                        job_id: None,
                        rule_id: Some(rule.id),
                        webhook_id: Some(rule.target_webhook_id),
                        event_type: event.event_type.clone(),
                        status: STATUS_SKIPPED_QUOTA.to_string(),
                        attempt_count: 0,
                        http_status: None,
                        rendered_message: None,
                        error_message: Some(reason.clone()),
                        latency_ms: None,
                    })
                    .await?;
            }
            RuleAction::Defer(scheduled_for) => {
                let delayed = DelayedNotificationRepository::new(conn)
                    .create(
                        NewDelayedNotification {
                            tenant_id: job.tenant_id,
                            rule_id: rule.id,
                            webhook_id: rule.target_webhook_id,
                            payload: job.payload.clone(),
                            scheduled_for: *scheduled_for,
                        },
                        now,
                    )
                    .await?;
                debug!(
                    rule_id = %rule.id,
                    delayed_id = %delayed.id,
                    scheduled_for = %scheduled_for,
                    "Deferred notification for quiet hours"
                );
            }
            RuleAction::Deliver => {
                NotificationJobRepository::new(conn)
                    .enqueue_delivery_job(
                        NewDeliveryJob {
                            tenant_id: job.tenant_id,
                            rule_id: rule.id,
                            webhook_id: rule.target_webhook_id,
                            payload: job.payload.clone(),
                            delayed_notification_id: None,
                            max_attempts: self.config.max_attempts,
                        },
                        now,
                    )
                    .await?;
            }
        }
        Ok(())
    }

    async fn process_delivery_job(&self, job: &JobModel, now: DateTime<Utc>) -> Result<JobResult, WorkerError> {
        let (Some(rule_id), Some(webhook_id)) = (job.rule_id, job.webhook_id) else {
            return Err(WorkerError::MissingReference(job.id));
        };
        let event: NormalizedEvent = serde_json::from_value(job.payload.clone())?;

        if self.active_tenant(job.tenant_id).await?.is_none() {
            self.finish(job, STATUS_CANCELLED, None, now).await?;
            return Ok(JobResult::Cancelled);
        }

        let Some(rule) = RuleRepository::new(self.db.as_ref())
            .get_rule(job.tenant_id, rule_id)
            .await?
        else {
            info!(rule_id = %rule_id, "Rule deleted before delivery, cancelling job");
            self.finish(job, STATUS_CANCELLED, Some(json!({ "message": "rule deleted" })), now)
                .await?;
            return Ok(JobResult::Cancelled);
        };

        let log_entry = |status: &str| NewDeliveryLog {
            tenant_id: job.tenant_id,
            job_id: Some(job.id),
            rule_id: Some(rule_id),
            webhook_id: Some(webhook_id),
            event_type: event.event_type.clone(),
            status: status.to_string(),
            attempt_count: job.attempts,
            http_status: None,
            rendered_message: None,
            error_message: None,
            latency_ms: None,
        };

        // Same-tenant ownership is re-checked at delivery time
        let webhook = ChatWebhookRepository::new(self.db.as_ref())
            .get_webhook_by_id(webhook_id)
            .await?
            .filter(|webhook| webhook.tenant_id == job.tenant_id);
        let webhook = match webhook {
            Some(webhook) if webhook.is_active => webhook,
            other => {
                let reason = if other.is_some() {
                    "chat webhook is inactive"
                } else {
                    "chat webhook not found for tenant"
                };
                self.finish(job, STATUS_FAILED_PERMANENT, Some(json!({ "message": reason })), now)
                    .await?;
                self.record_attempt(NewDeliveryLog {
                    error_message: Some(reason.to_string()),
                    ..log_entry(STATUS_FAILED)
                })
                .await;
                counter!("pipenotify_deliveries_total", "outcome" => "permanent").increment(1);
                return Ok(JobResult::FailedPermanent);
            }
        };

        let mode = rule
            .template_mode
            .parse::<TemplateMode>()
            .unwrap_or(TemplateMode::Simple);
        let body = render(mode, rule.custom_template.as_deref(), &event, &self.render_ctx);
        let result = self.chat.post_message(&webhook.url, &body).await;
        let outcome = DeliveryOutcome::classify(&result);

        let (http_status, latency_ms) = match &result {
            Ok(response) => (Some(response.status_code as i32), Some(response.latency_ms)),
            Err(_) => (None, None),
        };
        if let Some(latency) = latency_ms {
            histogram!("pipenotify_chat_latency_ms").record(latency as f64);
        }
        let attempt_entry = |status: &str, error_message: Option<String>| NewDeliveryLog {
            http_status,
            latency_ms,
            rendered_message: Some(body.to_chat_json()),
            error_message,
            ..log_entry(status)
        };

        // The job row is settled first; everything after it is best-effort
        // so a bookkeeping error can never send the job round again.
        match outcome {
            DeliveryOutcome::Delivered => {
                self.finish(job, STATUS_DELIVERED, None, now).await?;
                self.record_attempt(attempt_entry(STATUS_SUCCESS, None)).await;
                if let Err(err) = ChatWebhookRepository::new(self.db.as_ref())
                    .record_success(webhook.id)
                    .await
                {
                    warn!(webhook_id = %webhook.id, error = %err, "Failed to reset webhook failure count");
                }
                if let Some(delayed_id) = job.delayed_notification_id {
                    if let Err(err) = DelayedNotificationRepository::new(self.db.as_ref())
                        .mark_sent(delayed_id, now)
                        .await
                    {
                        warn!(delayed_id = %delayed_id, error = %err, "Failed to mark delayed notification sent");
                    }
                }
                counter!("pipenotify_deliveries_total", "outcome" => "delivered").increment(1);
                info!(
                    target_host = %redacted_target(&webhook.url),
                    attempt = job.attempts,
                    "Notification delivered"
                );
                Ok(JobResult::Delivered)
            }
            DeliveryOutcome::Retryable {
                reason,
                retry_after_secs,
            } if job.attempts < job.max_attempts => {
                let backoff = compute_backoff_seconds(&self.config, job.attempts, retry_after_secs);
                let retry_after = now + chrono::Duration::milliseconds((backoff * 1_000.0) as i64);
                self.requeue(
                    job,
                    retry_after,
                    json!({
                        "message": reason,
                        "attempts": job.attempts,
                        "backoff_seconds": backoff,
                        "timestamp": now.to_rfc3339(),
                    }),
                    now,
                )
                .await?;
                self.record_attempt(attempt_entry(STATUS_RETRYING, Some(reason.clone())))
                    .await;

                counter!("pipenotify_deliveries_total", "outcome" => "retryable").increment(1);
                histogram!("pipenotify_retry_backoff_seconds").record(backoff);
                warn!(
                    target_host = %redacted_target(&webhook.url),
                    attempt = job.attempts,
                    max_attempts = job.max_attempts,
                    backoff_seconds = backoff,
                    "Delivery failed, retrying: {}",
                    reason
                );
                Ok(JobResult::Retrying)
            }
            DeliveryOutcome::Retryable { reason, .. } => {
                let reason = format!("{reason} (gave up after {} attempts)", job.attempts);
                self.finish(job, STATUS_FAILED_PERMANENT, Some(json!({ "message": reason })), now)
                    .await?;
                self.record_attempt(attempt_entry(STATUS_FAILED, Some(reason.clone())))
                    .await;
                counter!("pipenotify_deliveries_total", "outcome" => "exhausted").increment(1);
                warn!(
                    target_host = %redacted_target(&webhook.url),
                    attempts = job.attempts,
                    "Delivery retries exhausted"
                );
                Ok(JobResult::FailedPermanent)
            }
            DeliveryOutcome::Permanent { reason } => {
                self.finish(job, STATUS_FAILED_PERMANENT, Some(json!({ "message": reason })), now)
                    .await?;
                self.record_attempt(attempt_entry(STATUS_FAILED, Some(reason.clone())))
                    .await;

                match ChatWebhookRepository::new(self.db.as_ref())
                    .record_permanent_failure(
                        webhook.id,
                        self.config.permanent_failure_threshold,
                        now,
                    )
                    .await
                {
                    Ok(true) => {
                        warn!(
                            webhook_id = %webhook.id,
                            target_host = %redacted_target(&webhook.url),
                            "Chat webhook deactivated after repeated permanent failures"
                        );
                        counter!("pipenotify_webhooks_deactivated_total").increment(1);
                    }
                    Ok(false) => {}
                    Err(err) => {
                        warn!(webhook_id = %webhook.id, error = %err, "Failed to record permanent webhook failure")
                    }
                }

                counter!("pipenotify_deliveries_total", "outcome" => "permanent").increment(1);
                warn!(
                    target_host = %redacted_target(&webhook.url),
                    "Delivery failed permanently: {}",
                    reason
                );
                Ok(JobResult::FailedPermanent)
            }
        }
    }

    /// Writes the job's delivery log row; failures are logged, not raised.
    async fn record_attempt(&self, entry: NewDeliveryLog) {
        let job_id = entry.job_id;
        if let Err(err) = DeliveryLogRepository::new(self.db.as_ref())
            .upsert_for_job(entry)
            .await
        {
            warn!(job_id = ?job_id, error = %err, "Failed to write delivery log");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let config = DeliveryConfig {
            backoff_base_seconds: 5,
            backoff_max_seconds: 60,
            jitter_factor: 0.0,
            ..DeliveryConfig::default()
        };

        assert_eq!(compute_backoff_seconds(&config, 1, None), 5.0);
        assert_eq!(compute_backoff_seconds(&config, 2, None), 10.0);
        assert_eq!(compute_backoff_seconds(&config, 3, None), 20.0);
        assert_eq!(compute_backoff_seconds(&config, 10, None), 60.0);
    }

    #[test]
    fn backoff_honours_retry_after() {
        let config = DeliveryConfig {
            backoff_base_seconds: 5,
            backoff_max_seconds: 60,
            jitter_factor: 0.0,
            ..DeliveryConfig::default()
        };

        assert_eq!(compute_backoff_seconds(&config, 1, Some(120)), 120.0);
        assert_eq!(compute_backoff_seconds(&config, 3, Some(1)), 20.0);
    }

    #[test]
    fn jitter_stays_within_factor() {
        let config = DeliveryConfig {
            backoff_base_seconds: 10,
            backoff_max_seconds: 100,
            jitter_factor: 0.5,
            ..DeliveryConfig::default()
        };

        for _ in 0..50 {
            let backoff = compute_backoff_seconds(&config, 1, None);
            assert!((10.0..15.0).contains(&backoff));
        }
    }
}
