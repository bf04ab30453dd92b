//! # Delayed Notification Sweep
//!
//! Background task that promotes deferred notifications once their tenant's
//! quiet window has passed. Each tick also returns stuck `running` jobs to the
//! queue and periodically purges expired delivery history, finished jobs and
//! settled delayed notifications.
//!
//! Rows are claimed with a token, so several sweep instances may run against
//! the same database; promotion and the job insert commit together.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use metrics::{counter, gauge, histogram};
use sea_orm::{DatabaseConnection, TransactionTrait};
use tokio::time::{Duration as TokioDuration, Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::AppConfig;
use crate::error::RepositoryError;
use crate::models::delayed_notification::Model as DelayedModel;
use crate::pipeline::quiet_hours::QuietHoursGate;
use crate::pipeline::quota::month_start;
use crate::repositories::notification_job::NewDeliveryJob;
use crate::repositories::{
    DelayedNotificationRepository, DeliveryLogRepository, NotificationJobRepository,
};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    pub released_jobs: u64,
    pub claimed: u64,
    pub promoted: u64,
    pub rescheduled: u64,
    pub lost_claims: u64,
    pub errors: u64,
}

/// Background sweep service.
pub struct DelayedSweep {
    config: Arc<AppConfig>,
    db: Arc<DatabaseConnection>,
    last_purge_at: Option<DateTime<Utc>>,
}

impl DelayedSweep {
    pub fn new(config: Arc<AppConfig>, db: Arc<DatabaseConnection>) -> Self {
        Self {
            config,
            db,
            last_purge_at: None,
        }
    }

    /// Run the sweep loop until the provided shutdown token fires.
    #[instrument(skip_all)]
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!("Starting delayed notification sweep");
        let tick_interval = TokioDuration::from_secs(self.config.sweep.tick_interval_seconds);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Delayed notification sweep shutdown requested");
                    break;
                }
                _ = sleep(tick_interval) => {
                    let tick_started = Instant::now();
                    if let Err(err) = self.tick_at(Utc::now()).await {
                        error!(error = %err, "Sweep tick failed");
                    }
                    histogram!("pipenotify_sweep_tick_duration_ms")
                        .record(tick_started.elapsed().as_secs_f64() * 1_000.0);
                }
            }
        }

        info!("Delayed notification sweep stopped");
    }

    /// One sweep pass as of `now`.
    pub async fn tick_at(&mut self, now: DateTime<Utc>) -> Result<SweepStats, RepositoryError> {
        let mut stats = SweepStats::default();
        let claim_timeout = Duration::seconds(self.config.sweep.claim_timeout_seconds.max(1));

        stats.released_jobs = NotificationJobRepository::new(self.db.as_ref())
            .release_stale(now - claim_timeout)
            .await?;
        if stats.released_jobs > 0 {
            warn!(count = stats.released_jobs, "Released stale running jobs");
            counter!("pipenotify_jobs_released_stale_total").increment(stats.released_jobs);
        }

        let claimed = DelayedNotificationRepository::new(self.db.as_ref())
            .claim_due(now, self.config.sweep.batch_size, now - claim_timeout)
            .await?;
        stats.claimed = claimed.len() as u64;
        gauge!("pipenotify_sweep_claimed").set(stats.claimed as f64);

        for row in claimed {
            if let Err(err) = self.process_row(&row, now, &mut stats).await {
                stats.errors += 1;
                error!(
                    error = %err,
                    delayed_id = %row.id,
                    tenant_id = %row.tenant_id,
                    "Failed to process delayed notification"
                );
            }
        }

        self.maybe_purge(now).await?;

        debug!(
            released = stats.released_jobs,
            claimed = stats.claimed,
            promoted = stats.promoted,
            rescheduled = stats.rescheduled,
            lost_claims = stats.lost_claims,
            errors = stats.errors,
            "Sweep tick completed"
        );
        Ok(stats)
    }

    async fn process_row(
        &self,
        row: &DelayedModel,
        now: DateTime<Utc>,
        stats: &mut SweepStats,
    ) -> Result<(), RepositoryError> {
        let Some(claim_token) = row.claim_token else {
            return Ok(());
        };

        // Quiet hours may have been edited since the row was scheduled
        let decision = QuietHoursGate::new(self.db.as_ref())
            .should_defer_now(row.tenant_id, now)
            .await?;
        if decision.defer {
            let next = decision.next_allowed_at.unwrap_or(now);
            DelayedNotificationRepository::new(self.db.as_ref())
                .reschedule(row.id, claim_token, next, now)
                .await?;
            stats.rescheduled += 1;
            debug!(delayed_id = %row.id, scheduled_for = %next, "Still quiet, rescheduled");
            return Ok(());
        }

        let txn = self
            .db
            .begin()
            .await
            .map_err(RepositoryError::database_error)?;

        let job = NotificationJobRepository::new(&txn)
            .enqueue_delivery_job(
                NewDeliveryJob {
                    tenant_id: row.tenant_id,
                    rule_id: row.rule_id,
                    webhook_id: row.webhook_id,
                    payload: row.payload.clone(),
                    delayed_notification_id: Some(row.id),
                    max_attempts: self.config.delivery.max_attempts,
                },
                now,
            )
            .await?;

        let promoted = DelayedNotificationRepository::new(&txn)
            .mark_promoted(row.id, claim_token, job.id, now)
            .await?;

        if !promoted {
            txn.rollback()
                .await
                .map_err(RepositoryError::database_error)?;
            stats.lost_claims += 1;
            debug!(delayed_id = %row.id, "Claim lost to another sweeper");
            return Ok(());
        }

        txn.commit().await.map_err(RepositoryError::database_error)?;
        stats.promoted += 1;
        counter!("pipenotify_delayed_promoted_total").increment(1);
        info!(
            delayed_id = %row.id,
            job_id = %job.id,
            tenant_id = %row.tenant_id,
            "Promoted delayed notification"
        );
        Ok(())
    }

    async fn maybe_purge(&mut self, now: DateTime<Utc>) -> Result<(), RepositoryError> {
        let interval = Duration::seconds(self.config.retention.purge_interval_seconds as i64);
        if self
            .last_purge_at
            .is_some_and(|last| now - last < interval)
        {
            return Ok(());
        }
        self.last_purge_at = Some(now);

        let cutoff = now - Duration::days(self.config.retention.delivery_log_days.max(1));
        // Monthly quota usage is counted from this month's successful logs
        let log_cutoff = cutoff.min(month_start(now));
        let logs = DeliveryLogRepository::new(self.db.as_ref())
            .purge_older_than(log_cutoff)
            .await?;
        let delayed = DelayedNotificationRepository::new(self.db.as_ref())
            .purge_settled_before(cutoff)
            .await?;
        let jobs = NotificationJobRepository::new(self.db.as_ref())
            .purge_finished_before(cutoff)
            .await?;

        if logs > 0 || delayed > 0 || jobs > 0 {
            info!(logs, delayed, jobs, cutoff = %cutoff, "Purged expired delivery history");
            counter!("pipenotify_purged_rows_total").increment(logs + delayed + jobs);
        }
        Ok(())
    }
}
