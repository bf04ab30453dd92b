//! Database migrations for Pipenotify.
//!
//! This module contains all database migrations using SeaORM Migration.

pub use sea_orm_migration::prelude::*;

mod m2024_01_01_000001_create_tenants;
mod m2024_01_02_000001_create_chat_webhooks;
mod m2024_01_02_000002_create_rules;
mod m2024_01_03_000001_create_quiet_hours;
mod m2024_01_04_000001_create_notification_jobs;
mod m2024_01_04_000002_create_delivery_logs;
mod m2024_01_04_000003_create_delayed_notifications;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2024_01_01_000001_create_tenants::Migration),
            Box::new(m2024_01_02_000001_create_chat_webhooks::Migration),
            Box::new(m2024_01_02_000002_create_rules::Migration),
            Box::new(m2024_01_03_000001_create_quiet_hours::Migration),
            Box::new(m2024_01_04_000001_create_notification_jobs::Migration),
            Box::new(m2024_01_04_000002_create_delivery_logs::Migration),
            Box::new(m2024_01_04_000003_create_delayed_notifications::Migration),
        ]
    }
}
