//! Migration to create the tenants table.
//!
//! A tenant is the multi-tenant boundary. The Pipedrive company id is unique so
//! one CRM account can never resolve to two tenants.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Tenants::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Tenants::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Tenants::Name).text().null())
                    .col(ColumnDef::new(Tenants::PipedriveCompanyId).text().null())
                    .col(
                        ColumnDef::new(Tenants::Plan)
                            .text()
                            .not_null()
                            .default("free"),
                    )
                    .col(
                        ColumnDef::new(Tenants::SubscriptionStatus)
                            .text()
                            .not_null()
                            .default("active"),
                    )
                    .col(ColumnDef::new(Tenants::WebhookSecret).text().null())
                    .col(
                        ColumnDef::new(Tenants::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Tenants::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_tenants_pipedrive_company_id")
                    .table(Tenants::Table)
                    .col(Tenants::PipedriveCompanyId)
                    .unique()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_tenants_pipedrive_company_id")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(Tenants::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Tenants {
    Table,
    Id,
    Name,
    PipedriveCompanyId,
    Plan,
    SubscriptionStatus,
    WebhookSecret,
    CreatedAt,
    UpdatedAt,
}
