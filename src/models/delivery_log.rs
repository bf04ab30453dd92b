//! DeliveryLog entity model
//!
//! One row per delivery job, updated after each attempt, or one row per rule
//! skipped by quota.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;

pub const STATUS_SUCCESS: &str = "success";
pub const STATUS_RETRYING: &str = "retrying";
pub const STATUS_FAILED: &str = "failed";
pub const STATUS_SKIPPED_QUOTA: &str = "skipped_quota";

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "delivery_logs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub tenant_id: Uuid,

    pub job_id: Option<Uuid>,

    pub rule_id: Option<Uuid>,

    pub webhook_id: Option<Uuid>,

    pub event_type: String,

    /// success, retrying, failed or skipped_quota
    pub status: String,

    pub attempt_count: i32,

    pub http_status: Option<i32>,

    /// Body posted to Google Chat
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub rendered_message: Option<JsonValue>,

    pub error_message: Option<String>,

    pub latency_ms: Option<i64>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
