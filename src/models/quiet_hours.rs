//! QuietHours entity model (one optional row per tenant).

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "quiet_hours")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub tenant_id: Uuid,

    /// Local time of day the window opens, `HH:MM`
    pub start_time: String,

    /// Local time of day the window closes, `HH:MM` (exclusive)
    pub end_time: String,

    /// IANA zone name, e.g. `Europe/Berlin`
    pub timezone: String,

    pub quiet_weekends: bool,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
