//! Rule entity model
//!
//! A rule routes a tenant's events of one type pattern, optionally narrowed by
//! filter conditions, to one of the tenant's chat webhooks.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "rules")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub tenant_id: Uuid,

    pub name: String,

    /// Exact type (`deal.won`), object wildcard (`deal.*`) or `*`
    pub event_type: String,

    /// Stored filter JSON, typed or shorthand form
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub filters: Option<JsonValue>,

    pub target_webhook_id: Uuid,

    /// simple, compact, detailed or custom
    pub template_mode: String,

    pub custom_template: Option<String>,

    pub enabled: bool,

    /// Lower values are processed first
    pub priority: i32,

    /// Created by plan-based provisioning rather than by the user
    pub is_default: bool,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::chat_webhook::Entity",
        from = "Column::TargetWebhookId",
        to = "super::chat_webhook::Column::Id"
    )]
    ChatWebhook,
}

impl Related<super::chat_webhook::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ChatWebhook.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
