//! # Data Models
//!
//! SeaORM entities for every table Pipenotify owns, plus the small status
//! vocabularies stored as text columns.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod chat_webhook;
pub mod delayed_notification;
pub mod delivery_log;
pub mod notification_job;
pub mod quiet_hours;
pub mod rule;
pub mod tenant;

pub use chat_webhook::Entity as ChatWebhook;
pub use delayed_notification::Entity as DelayedNotification;
pub use delivery_log::Entity as DeliveryLog;
pub use notification_job::Entity as NotificationJob;
pub use quiet_hours::Entity as QuietHours;
pub use rule::Entity as Rule;
pub use tenant::Entity as Tenant;

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "pipenotify".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
