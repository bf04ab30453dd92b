//! Migration to create the rules table.
//!
//! Rules route a tenant's CRM events to one of its chat webhooks. Filters are
//! stored as JSON and parsed into typed conditions at match time.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Rules::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Rules::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Rules::TenantId).uuid().not_null())
                    .col(ColumnDef::new(Rules::Name).text().not_null())
                    .col(ColumnDef::new(Rules::EventType).text().not_null())
                    .col(ColumnDef::new(Rules::Filters).json_binary().null())
                    .col(ColumnDef::new(Rules::TargetWebhookId).uuid().not_null())
                    .col(
                        ColumnDef::new(Rules::TemplateMode)
                            .text()
                            .not_null()
                            .default("simple"),
                    )
                    .col(ColumnDef::new(Rules::CustomTemplate).text().null())
                    .col(
                        ColumnDef::new(Rules::Enabled)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(Rules::Priority)
                            .integer()
                            .not_null()
                            .default(100),
                    )
                    .col(
                        ColumnDef::new(Rules::IsDefault)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Rules::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Rules::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_rules_tenant_id")
                            .from(Rules::Table, Rules::TenantId)
                            .to(Tenants::Table, Tenants::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_rules_target_webhook_id")
                            .from(Rules::Table, Rules::TargetWebhookId)
                            .to(ChatWebhooks::Table, ChatWebhooks::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )
            .await?;

        // Matching loads enabled rules per tenant
        manager
            .create_index(
                Index::create()
                    .name("idx_rules_tenant_enabled_priority")
                    .table(Rules::Table)
                    .col(Rules::TenantId)
                    .col(Rules::Enabled)
                    .col(Rules::Priority)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_rules_tenant_enabled_priority")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(Rules::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Rules {
    Table,
    Id,
    TenantId,
    Name,
    EventType,
    Filters,
    TargetWebhookId,
    TemplateMode,
    CustomTemplate,
    Enabled,
    Priority,
    IsDefault,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Tenants {
    Table,
    Id,
}

#[derive(DeriveIden)]
enum ChatWebhooks {
    Table,
    Id,
}
