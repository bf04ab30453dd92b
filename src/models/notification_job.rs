//! NotificationJob entity model
//!
//! Rows of the durable work queue consumed by the delivery worker.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;

/// Job kinds
pub const KIND_EVENT: &str = "event";
pub const KIND_DELIVERY: &str = "delivery";

/// Job statuses
pub const STATUS_QUEUED: &str = "queued";
pub const STATUS_RUNNING: &str = "running";
pub const STATUS_COMPLETED: &str = "completed";
pub const STATUS_NO_OP: &str = "no_op";
pub const STATUS_DELIVERED: &str = "delivered";
pub const STATUS_FAILED_PERMANENT: &str = "failed_permanent";
pub const STATUS_CANCELLED: &str = "cancelled";

/// Statuses a job never leaves
pub const TERMINAL_STATUSES: [&str; 5] = [
    STATUS_COMPLETED,
    STATUS_NO_OP,
    STATUS_DELIVERED,
    STATUS_FAILED_PERMANENT,
    STATUS_CANCELLED,
];

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "notification_jobs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub tenant_id: Uuid,

    /// `event` or `delivery`
    pub kind: String,

    pub status: String,

    /// Attempts started so far (incremented on claim)
    pub attempts: i32,

    pub max_attempts: i32,

    /// Normalized event snapshot
    #[sea_orm(column_type = "JsonBinary")]
    pub payload: JsonValue,

    /// Set on delivery jobs
    pub rule_id: Option<Uuid>,

    /// Set on delivery jobs
    pub webhook_id: Option<Uuid>,

    /// Set when the job was promoted from a deferred notification
    pub delayed_notification_id: Option<Uuid>,

    pub claim_token: Option<Uuid>,

    pub scheduled_at: DateTimeWithTimeZone,

    /// Earliest time a re-queued job may be claimed again
    pub retry_after: Option<DateTimeWithTimeZone>,

    pub started_at: Option<DateTimeWithTimeZone>,

    pub finished_at: Option<DateTimeWithTimeZone>,

    /// Structured details of the last failure
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub error: Option<JsonValue>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
