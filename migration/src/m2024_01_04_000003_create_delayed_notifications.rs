//! Migration to create the delayed_notifications table.
//!
//! Rows are written when quiet hours defer a delivery and promoted into
//! delivery jobs by the sweep once the window ends.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(DelayedNotifications::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(DelayedNotifications::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(DelayedNotifications::TenantId)
                            .uuid()
                            .not_null(),
                    )
                    .col(ColumnDef::new(DelayedNotifications::RuleId).uuid().not_null())
                    .col(
                        ColumnDef::new(DelayedNotifications::WebhookId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(DelayedNotifications::Payload)
                            .json_binary()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(DelayedNotifications::ScheduledFor)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(DelayedNotifications::ClaimedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(DelayedNotifications::ClaimToken)
                            .uuid()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(DelayedNotifications::RescheduleCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(DelayedNotifications::PromotedJobId)
                            .uuid()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(DelayedNotifications::SentAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(DelayedNotifications::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(DelayedNotifications::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_delayed_notifications_tenant_id")
                            .from(DelayedNotifications::Table, DelayedNotifications::TenantId)
                            .to(Tenants::Table, Tenants::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_delayed_notifications_scheduled_for")
                    .table(DelayedNotifications::Table)
                    .col(DelayedNotifications::ScheduledFor)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_delayed_notifications_scheduled_for")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(DelayedNotifications::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum DelayedNotifications {
    Table,
    Id,
    TenantId,
    RuleId,
    WebhookId,
    Payload,
    ScheduledFor,
    ClaimedAt,
    ClaimToken,
    RescheduleCount,
    PromotedJobId,
    SentAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Tenants {
    Table,
    Id,
}
