//! Migration to create the delivery_logs table.
//!
//! One row per delivery job (or per skipped rule match), updated in place as
//! attempts progress.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(DeliveryLogs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(DeliveryLogs::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(DeliveryLogs::TenantId).uuid().not_null())
                    .col(ColumnDef::new(DeliveryLogs::JobId).uuid().null())
                    .col(ColumnDef::new(DeliveryLogs::RuleId).uuid().null())
                    .col(ColumnDef::new(DeliveryLogs::WebhookId).uuid().null())
                    .col(ColumnDef::new(DeliveryLogs::EventType).text().not_null())
                    .col(ColumnDef::new(DeliveryLogs::Status).text().not_null())
                    .col(
                        ColumnDef::new(DeliveryLogs::AttemptCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(DeliveryLogs::HttpStatus).integer().null())
                    .col(
                        ColumnDef::new(DeliveryLogs::RenderedMessage)
                            .json_binary()
                            .null(),
                    )
                    .col(ColumnDef::new(DeliveryLogs::ErrorMessage).text().null())
                    .col(ColumnDef::new(DeliveryLogs::LatencyMs).big_integer().null())
                    .col(
                        ColumnDef::new(DeliveryLogs::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(DeliveryLogs::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_delivery_logs_tenant_id")
                            .from(DeliveryLogs::Table, DeliveryLogs::TenantId)
                            .to(Tenants::Table, Tenants::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_delivery_logs_tenant_created")
                    .table(DeliveryLogs::Table)
                    .col(DeliveryLogs::TenantId)
                    .col(DeliveryLogs::CreatedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_delivery_logs_job_id")
                    .table(DeliveryLogs::Table)
                    .col(DeliveryLogs::JobId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_delivery_logs_job_id").to_owned())
            .await?;

        manager
            .drop_index(
                Index::drop()
                    .name("idx_delivery_logs_tenant_created")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(DeliveryLogs::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum DeliveryLogs {
    Table,
    Id,
    TenantId,
    JobId,
    RuleId,
    WebhookId,
    EventType,
    Status,
    AttemptCount,
    HttpStatus,
    RenderedMessage,
    ErrorMessage,
    LatencyMs,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Tenants {
    Table,
    Id,
}
