//! # Repository Layer
//!
//! Repository implementations that encapsulate SeaORM operations for the
//! Pipenotify tables. Every tenant-owned lookup is scoped by tenant id.

pub mod chat_webhook;
pub mod delayed_notification;
pub mod delivery_log;
pub mod notification_job;
pub mod quiet_hours;
pub mod rule;
pub mod tenant;

pub use chat_webhook::ChatWebhookRepository;
pub use delayed_notification::DelayedNotificationRepository;
pub use delivery_log::DeliveryLogRepository;
pub use notification_job::NotificationJobRepository;
pub use quiet_hours::QuietHoursRepository;
pub use rule::RuleRepository;
pub use tenant::TenantRepository;
