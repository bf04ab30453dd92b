//! Migration to create the chat_webhooks table.
//!
//! Chat webhooks are the Google Chat incoming-webhook destinations a tenant
//! routes notifications to.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ChatWebhooks::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ChatWebhooks::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ChatWebhooks::TenantId).uuid().not_null())
                    .col(ColumnDef::new(ChatWebhooks::Name).text().not_null())
                    .col(ColumnDef::new(ChatWebhooks::Url).text().not_null())
                    .col(
                        ColumnDef::new(ChatWebhooks::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(ChatWebhooks::ConsecutiveFailures)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(ChatWebhooks::LastFailureAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ChatWebhooks::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(ChatWebhooks::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_chat_webhooks_tenant_id")
                            .from(ChatWebhooks::Table, ChatWebhooks::TenantId)
                            .to(Tenants::Table, Tenants::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_chat_webhooks_tenant_id")
                    .table(ChatWebhooks::Table)
                    .col(ChatWebhooks::TenantId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_chat_webhooks_tenant_id").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(ChatWebhooks::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ChatWebhooks {
    Table,
    Id,
    TenantId,
    Name,
    Url,
    IsActive,
    ConsecutiveFailures,
    LastFailureAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Tenants {
    Table,
    Id,
}
