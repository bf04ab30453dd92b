//! DelayedNotification entity model
//!
//! A delivery deferred by quiet hours. `sent_at` stays null until the promoted
//! delivery job succeeds.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "delayed_notifications")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub tenant_id: Uuid,

    pub rule_id: Uuid,

    pub webhook_id: Uuid,

    /// Normalized event snapshot
    #[sea_orm(column_type = "JsonBinary")]
    pub payload: JsonValue,

    pub scheduled_for: DateTimeWithTimeZone,

    /// Set while a sweep run owns the row
    pub claimed_at: Option<DateTimeWithTimeZone>,

    pub claim_token: Option<Uuid>,

    pub reschedule_count: i32,

    /// Delivery job created when the row was promoted
    pub promoted_job_id: Option<Uuid>,

    pub sent_at: Option<DateTimeWithTimeZone>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
