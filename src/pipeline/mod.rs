//! # Notification pipeline
//!
//! Pure building blocks of the dispatch path: event normalization, rule
//! filters and matching, message rendering, the quiet-hours gate and plan
//! quotas. The worker and sweep compose these with the database.

pub mod event;
pub mod filter;
pub mod matcher;
pub mod quiet_hours;
pub mod quota;
pub mod template;

pub use event::{NormalizeError, NormalizedEvent, normalize};
pub use filter::{FilterCondition, FilterError, RuleFilter, ThresholdOp};
pub use matcher::{RuleMatcher, match_rules, pattern_matches};
pub use quiet_hours::{DeferDecision, QuietHoursGate, QuietWindow};
pub use quota::{Plan, QuotaDecision, QuotaService, plan_for};
pub use template::{MessageBody, RenderContext, TemplateMode, render};
