//! Quiet-hours gate.
//!
//! A tenant may configure a nightly window (local time, `[start, end)`) and
//! optionally quiet weekends. Deliveries that would land inside the window are
//! deferred to the first instant the tenant is no longer quiet.

use chrono::{DateTime, Datelike, Duration, NaiveDateTime, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use uuid::Uuid;

use crate::error::RepositoryError;
use crate::models::quiet_hours::Model as QuietHoursModel;
use crate::repositories::QuietHoursRepository;

/// Result of asking the gate about one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeferDecision {
    pub defer: bool,
    pub next_allowed_at: Option<DateTime<Utc>>,
}

impl DeferDecision {
    pub fn immediate() -> Self {
        Self {
            defer: false,
            next_allowed_at: None,
        }
    }
}

/// Parses `HH:MM` (or `HH:MM:SS`) local times.
pub fn parse_time_of_day(value: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value.trim(), "%H:%M:%S"))
        .ok()
}

/// A parsed quiet-hours configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuietWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub timezone: Tz,
    pub quiet_weekends: bool,
}

impl QuietWindow {
    /// Builds a window from a stored row. Unknown zones fall back to UTC;
    /// unparseable times disable the window.
    pub fn from_model(model: &QuietHoursModel) -> Option<Self> {
        let (Some(start), Some(end)) = (
            parse_time_of_day(&model.start_time),
            parse_time_of_day(&model.end_time),
        ) else {
            tracing::warn!(
                tenant_id = %model.tenant_id,
                start = %model.start_time,
                end = %model.end_time,
                "Ignoring quiet hours with unparseable times"
            );
            return None;
        };

        let timezone = model.timezone.parse::<Tz>().unwrap_or_else(|_| {
            tracing::warn!(
                tenant_id = %model.tenant_id,
                timezone = %model.timezone,
                "Unknown quiet-hours timezone, using UTC"
            );
            Tz::UTC
        });

        Some(Self {
            start,
            end,
            timezone,
            quiet_weekends: model.quiet_weekends,
        })
    }

    pub fn is_quiet(&self, at: DateTime<Utc>) -> bool {
        let local = at.with_timezone(&self.timezone);

        if self.quiet_weekends && matches!(local.weekday(), Weekday::Sat | Weekday::Sun) {
            return true;
        }

        let time = local.time();
        if self.start == self.end {
            false
        } else if self.start < self.end {
            time >= self.start && time < self.end
        } else {
            time >= self.start || time < self.end
        }
    }

    /// First instant at or after `now` that is outside the window.
    pub fn next_allowed(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        if !self.is_quiet(now) {
            return now;
        }

        let today = now.with_timezone(&self.timezone).date_naive();
        let candidate_times = [self.end, NaiveTime::MIN];

        (0..=8)
            .filter_map(|offset| today.checked_add_signed(Duration::days(offset)))
            .flat_map(|date| candidate_times.map(|time| date.and_time(time)))
            .filter_map(|naive| resolve_local(self.timezone, naive))
            .map(|local| local.with_timezone(&Utc))
            .filter(|candidate| *candidate > now && !self.is_quiet(*candidate))
            .min()
            .unwrap_or_else(|| now + Duration::days(1))
    }

    pub fn decide(&self, now: DateTime<Utc>) -> DeferDecision {
        if self.is_quiet(now) {
            DeferDecision {
                defer: true,
                next_allowed_at: Some(self.next_allowed(now)),
            }
        } else {
            DeferDecision::immediate()
        }
    }
}

/// Local time to an instant. A time inside a DST gap resolves to the end
/// of the gap, the first minute that exists on the wall clock.
fn resolve_local(timezone: Tz, naive: NaiveDateTime) -> Option<DateTime<Tz>> {
    (0..=180)
        .map(|minutes| naive + Duration::minutes(minutes))
        .find_map(|local| timezone.from_local_datetime(&local).earliest())
}

/// Database-backed gate keyed by tenant.
pub struct QuietHoursGate<'a> {
    db: &'a DatabaseConnection,
}

impl<'a> QuietHoursGate<'a> {
    pub fn new(db: &'a DatabaseConnection) -> Self {
        Self { db }
    }

    /// Tenants without configuration are never deferred.
    pub async fn should_defer_now(
        &self,
        tenant_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<DeferDecision, RepositoryError> {
        let config = QuietHoursRepository::new(self.db)
            .get_quiet_hours_config(tenant_id)
            .await?;

        Ok(config
            .as_ref()
            .and_then(QuietWindow::from_model)
            .map(|window| window.decide(now))
            .unwrap_or_else(DeferDecision::immediate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(start: &str, end: &str, tz: &str, weekends: bool) -> QuietWindow {
        let now = Utc::now().fixed_offset();
        QuietWindow::from_model(&QuietHoursModel {
            tenant_id: Uuid::nil(),
            start_time: start.to_string(),
            end_time: end.to_string(),
            timezone: tz.to_string(),
            quiet_weekends: weekends,
            created_at: now,
            updated_at: now,
        })
        .unwrap()
    }

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn wrapping_window_defers_until_end() {
        // 2024-03-05 is a Tuesday
        let quiet = window("22:00", "06:00", "UTC", false);

        assert!(quiet.is_quiet(utc(2024, 3, 5, 23, 0)));
        assert!(quiet.is_quiet(utc(2024, 3, 5, 2, 0)));
        assert!(!quiet.is_quiet(utc(2024, 3, 5, 6, 0)));
        assert!(!quiet.is_quiet(utc(2024, 3, 5, 21, 59)));

        let decision = quiet.decide(utc(2024, 3, 5, 23, 0));
        assert!(decision.defer);
        assert_eq!(decision.next_allowed_at, Some(utc(2024, 3, 6, 6, 0)));

        assert_eq!(quiet.next_allowed(utc(2024, 3, 5, 2, 0)), utc(2024, 3, 5, 6, 0));
    }

    #[test]
    fn equal_bounds_are_never_quiet() {
        let quiet = window("08:00", "08:00", "UTC", false);
        assert!(!quiet.is_quiet(utc(2024, 3, 5, 8, 0)));
        assert_eq!(quiet.decide(utc(2024, 3, 5, 8, 0)), DeferDecision::immediate());
    }

    #[test]
    fn weekend_defers_to_monday_morning() {
        // Friday 23:00 with a 22:00-06:00 window and quiet weekends
        let quiet = window("22:00", "06:00", "UTC", true);
        assert!(quiet.is_quiet(utc(2024, 3, 9, 12, 0)));
        assert_eq!(quiet.next_allowed(utc(2024, 3, 8, 23, 0)), utc(2024, 3, 11, 6, 0));
    }

    #[test]
    fn weekend_only_releases_at_monday_midnight() {
        let quiet = window("00:00", "00:00", "UTC", true);
        assert_eq!(quiet.next_allowed(utc(2024, 3, 9, 15, 30)), utc(2024, 3, 11, 0, 0));
    }

    #[test]
    fn converts_to_tenant_timezone() {
        // 21:30 UTC is 22:30 in Berlin (CET, UTC+1) in early March
        let quiet = window("22:00", "06:00", "Europe/Berlin", false);
        assert!(quiet.is_quiet(utc(2024, 3, 5, 21, 30)));
        assert_eq!(quiet.next_allowed(utc(2024, 3, 5, 21, 30)), utc(2024, 3, 6, 5, 0));
    }

    #[test]
    fn end_inside_dst_gap_resolves_after_gap() {
        // New York springs forward 2024-03-10 02:00 -> 03:00
        let quiet = window("22:00", "02:30", "America/New_York", false);
        let at = utc(2024, 3, 10, 5, 0); // 00:00 EST
        assert!(quiet.is_quiet(at));
        let next = quiet.next_allowed(at);
        assert_eq!(next, utc(2024, 3, 10, 7, 0)); // 03:00 EDT, the end of the gap
        assert!(!quiet.is_quiet(next));
    }

    #[test]
    fn invalid_timezone_falls_back_to_utc() {
        let quiet = window("22:00", "06:00", "Mars/Olympus", false);
        assert_eq!(quiet.timezone, Tz::UTC);
    }

    #[test]
    fn parses_times() {
        assert_eq!(parse_time_of_day("07:15"), NaiveTime::from_hms_opt(7, 15, 0));
        assert!(parse_time_of_day("25:00").is_none());
        assert!(parse_time_of_day("noon").is_none());
    }
}
