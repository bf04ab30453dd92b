//! Plan limits on notification volume.
//!
//! Deliveries over a plan's monthly volume, or beyond its per-event rule cap,
//! are recorded as `skipped_quota` instead of being attempted.

use std::str::FromStr;

use chrono::{DateTime, Datelike, TimeZone, Utc};
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::RepositoryError;
use crate::repositories::DeliveryLogRepository;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    Free,
    Starter,
    Pro,
    Team,
}

impl Plan {
    pub fn as_str(&self) -> &'static str {
        match self {
            Plan::Free => "free",
            Plan::Starter => "starter",
            Plan::Pro => "pro",
            Plan::Team => "team",
        }
    }

    /// Successful deliveries allowed per calendar month (UTC); `None` is unlimited.
    pub fn monthly_limit(&self) -> Option<i64> {
        match self {
            Plan::Free => Some(100),
            Plan::Starter => Some(1_000),
            Plan::Pro => Some(10_000),
            Plan::Team => None,
        }
    }

    /// Matched rules delivered per event; `None` is unlimited.
    pub fn rules_per_event(&self) -> Option<usize> {
        match self {
            Plan::Free => Some(1),
            Plan::Starter => Some(3),
            Plan::Pro => Some(10),
            Plan::Team => None,
        }
    }

    /// Event types provisioned as default rules.
    pub fn default_event_types(&self) -> &'static [&'static str] {
        match self {
            Plan::Free | Plan::Starter => &["deal.won", "deal.lost", "deal.added"],
            Plan::Pro | Plan::Team => &["deal.won", "deal.lost", "deal.added", "deal.updated"],
        }
    }
}

impl FromStr for Plan {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(Plan::Free),
            "starter" => Ok(Plan::Starter),
            "pro" => Ok(Plan::Pro),
            "team" => Ok(Plan::Team),
            other => Err(format!("unknown plan '{other}'")),
        }
    }
}

/// Unknown stored plans are treated as free.
pub fn plan_for(stored: &str) -> Plan {
    stored.parse().unwrap_or(Plan::Free)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaDecision {
    Allowed,
    MonthlyLimitReached { limit: i64, used: i64 },
    RuleCapReached { cap: usize },
}

impl QuotaDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, QuotaDecision::Allowed)
    }

    /// Message stored on the `skipped_quota` log row.
    pub fn reason(&self) -> Option<String> {
        match self {
            QuotaDecision::Allowed => None,
            QuotaDecision::MonthlyLimitReached { limit, used } => Some(format!(
                "monthly notification limit reached ({used}/{limit})"
            )),
            QuotaDecision::RuleCapReached { cap } => {
                Some(format!("plan allows {cap} rule(s) per event"))
            }
        }
    }
}

/// Decides whether the `rule_index`-th matched rule (0-based) may be delivered
/// given `used` successful deliveries this month.
pub fn evaluate(plan: Plan, used: i64, rule_index: usize) -> QuotaDecision {
    if let Some(cap) = plan.rules_per_event()
        && rule_index >= cap
    {
        return QuotaDecision::RuleCapReached { cap };
    }

    match plan.monthly_limit() {
        Some(limit) if used >= limit => QuotaDecision::MonthlyLimitReached { limit, used },
        _ => QuotaDecision::Allowed,
    }
}

pub fn month_start(now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
        .single()
        .unwrap_or(now)
}

pub struct QuotaService<'a> {
    db: &'a DatabaseConnection,
}

impl<'a> QuotaService<'a> {
    pub fn new(db: &'a DatabaseConnection) -> Self {
        Self { db }
    }

    /// Successful deliveries for the tenant in the current month.
    pub async fn usage(&self, tenant_id: Uuid, now: DateTime<Utc>) -> Result<i64, RepositoryError> {
        DeliveryLogRepository::new(self.db)
            .count_successful_since(tenant_id, month_start(now))
            .await
    }

    pub async fn check(
        &self,
        tenant_id: Uuid,
        plan: Plan,
        rule_index: usize,
        now: DateTime<Utc>,
    ) -> Result<QuotaDecision, RepositoryError> {
        // Unlimited plans skip the count query
        if plan.monthly_limit().is_none() {
            return Ok(evaluate(plan, 0, rule_index));
        }

        let used = self.usage(tenant_id, now).await?;
        Ok(evaluate(plan, used, rule_index))
    }
}
