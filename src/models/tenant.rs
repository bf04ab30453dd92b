//! Tenant entity model
//!
//! A tenant is the multi-tenant boundary and owns every other row by foreign
//! key. It is bound to exactly one Pipedrive account through
//! `pipedrive_company_id`.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;

/// Tenant entity representing multi-tenant isolation
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "tenants")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Display name for the tenant (optional)
    pub name: Option<String>,

    /// Pipedrive company id this tenant receives events for (unique)
    #[sea_orm(unique)]
    pub pipedrive_company_id: Option<String>,

    /// Subscription tier: free, starter, pro or team
    pub plan: String,

    /// Soft lifecycle: active, trialing, past_due or canceled
    pub subscription_status: String,

    /// Per-tenant HMAC secret for inbound webhooks
    pub webhook_secret: Option<String>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Canceled tenants keep their data but stop receiving notifications.
    pub fn is_canceled(&self) -> bool {
        self.subscription_status == "canceled"
    }
}
