//! Migration to create the notification_jobs table.
//!
//! This is the durable work queue. `event` jobs carry a normalized CRM event
//! awaiting rule matching; `delivery` jobs carry one rule/webhook pair to post.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(NotificationJobs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(NotificationJobs::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(NotificationJobs::TenantId).uuid().not_null())
                    .col(ColumnDef::new(NotificationJobs::Kind).text().not_null())
                    .col(
                        ColumnDef::new(NotificationJobs::Status)
                            .text()
                            .not_null()
                            .default("queued"),
                    )
                    .col(
                        ColumnDef::new(NotificationJobs::Attempts)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(NotificationJobs::MaxAttempts)
                            .integer()
                            .not_null()
                            .default(5),
                    )
                    .col(
                        ColumnDef::new(NotificationJobs::Payload)
                            .json_binary()
                            .not_null(),
                    )
                    .col(ColumnDef::new(NotificationJobs::RuleId).uuid().null())
                    .col(ColumnDef::new(NotificationJobs::WebhookId).uuid().null())
                    .col(
                        ColumnDef::new(NotificationJobs::DelayedNotificationId)
                            .uuid()
                            .null(),
                    )
                    .col(ColumnDef::new(NotificationJobs::ClaimToken).uuid().null())
                    .col(
                        ColumnDef::new(NotificationJobs::ScheduledAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(NotificationJobs::RetryAfter)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(NotificationJobs::StartedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(NotificationJobs::FinishedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(NotificationJobs::Error).json_binary().null())
                    .col(
                        ColumnDef::new(NotificationJobs::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(NotificationJobs::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_notification_jobs_tenant_id")
                            .from(NotificationJobs::Table, NotificationJobs::TenantId)
                            .to(Tenants::Table, Tenants::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Claim query scans queued jobs by due time
        manager
            .create_index(
                Index::create()
                    .name("idx_notification_jobs_status_scheduled")
                    .table(NotificationJobs::Table)
                    .col(NotificationJobs::Status)
                    .col(NotificationJobs::ScheduledAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_notification_jobs_claim_token")
                    .table(NotificationJobs::Table)
                    .col(NotificationJobs::ClaimToken)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_notification_jobs_claim_token")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_index(
                Index::drop()
                    .name("idx_notification_jobs_status_scheduled")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(NotificationJobs::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum NotificationJobs {
    Table,
    Id,
    TenantId,
    Kind,
    Status,
    Attempts,
    MaxAttempts,
    Payload,
    RuleId,
    WebhookId,
    DelayedNotificationId,
    ClaimToken,
    ScheduledAt,
    RetryAfter,
    StartedAt,
    FinishedAt,
    Error,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Tenants {
    Table,
    Id,
}
