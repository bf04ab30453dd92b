//! Rule matching: which of a tenant's rules fire for an event, in order.

use sea_orm::DatabaseConnection;
use uuid::Uuid;

use super::event::NormalizedEvent;
use super::filter::RuleFilter;
use crate::error::RepositoryError;
use crate::models::rule::Model as RuleModel;
use crate::repositories::RuleRepository;

/// True when `pattern` selects `event_type`.
///
/// Patterns are an exact type (`deal.won`), an object wildcard (`deal.*`)
/// whose prefix must equal the object segment, or `*`.
pub fn pattern_matches(pattern: &str, event_type: &str) -> bool {
    if pattern == "*" || pattern == event_type {
        return true;
    }

    match pattern.strip_suffix(".*") {
        Some(prefix) => event_type
            .split_once('.')
            .is_some_and(|(object, _)| object == prefix),
        None => false,
    }
}

/// Rejects patterns that can never match a normalized event type.
pub fn validate_pattern(pattern: &str) -> Result<(), String> {
    if pattern == "*" {
        return Ok(());
    }

    let Some((object, action)) = pattern.split_once('.') else {
        return Err(format!(
            "event type '{pattern}' must look like '<object>.<action>', '<object>.*' or '*'"
        ));
    };

    let valid_segment = |segment: &str| {
        !segment.is_empty()
            && segment
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    };

    if !valid_segment(object) || !(action == "*" || valid_segment(action)) {
        return Err(format!("event type '{pattern}' is not a valid pattern"));
    }

    Ok(())
}

/// Selects and orders the rules that fire for `event`.
///
/// Disabled rules are ignored. A rule whose stored filter cannot be parsed is
/// skipped without affecting the others. The result is ordered by ascending
/// priority, then creation time, then id.
pub fn match_rules(rules: Vec<RuleModel>, event: &NormalizedEvent) -> Vec<RuleModel> {
    let mut matched: Vec<RuleModel> = rules
        .into_iter()
        .filter(|rule| rule.enabled)
        .filter(|rule| pattern_matches(&rule.event_type, &event.event_type))
        .filter(|rule| match RuleFilter::from_json(rule.filters.as_ref()) {
            Ok(filter) => filter.matches(event),
            Err(error) => {
                tracing::warn!(
                    rule_id = %rule.id,
                    tenant_id = %rule.tenant_id,
                    error = %error,
                    "Skipping rule with unparseable filters"
                );
                false
            }
        })
        .collect();

    matched.sort_by(|a, b| {
        a.priority
            .cmp(&b.priority)
            .then_with(|| a.created_at.cmp(&b.created_at))
            .then_with(|| a.id.cmp(&b.id))
    });

    matched
}

/// Database-backed matcher over a tenant's enabled rules.
pub struct RuleMatcher<'a> {
    db: &'a DatabaseConnection,
}

impl<'a> RuleMatcher<'a> {
    pub fn new(db: &'a DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn match_event(
        &self,
        tenant_id: Uuid,
        event: &NormalizedEvent,
    ) -> Result<Vec<RuleModel>, RepositoryError> {
        let rules = RuleRepository::new(self.db)
            .get_enabled_rules_for_tenant(tenant_id)
            .await?;

        Ok(match_rules(rules, event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use serde_json::{Value, json};

    fn rule(pattern: &str, priority: i32, age_minutes: i64, filters: Option<Value>) -> RuleModel {
        let created = (Utc::now() - Duration::minutes(age_minutes)).fixed_offset();
        RuleModel {
            id: Uuid::new_v4(),
            tenant_id: Uuid::nil(),
            name: pattern.to_string(),
            event_type: pattern.to_string(),
            filters,
            target_webhook_id: Uuid::nil(),
            template_mode: "simple".to_string(),
            custom_template: None,
            enabled: true,
            priority,
            is_default: false,
            created_at: created,
            updated_at: created,
        }
    }

    #[test]
    fn pattern_semantics() {
        assert!(pattern_matches("deal.won", "deal.won"));
        assert!(pattern_matches("deal.*", "deal.won"));
        assert!(pattern_matches("*", "person.added"));
        assert!(!pattern_matches("deal.*", "dealer.won"));
        assert!(!pattern_matches("deal.won", "deal.lost"));
        assert!(!pattern_matches("person.*", "deal.won"));
    }

    #[test]
    fn validates_patterns() {
        assert!(validate_pattern("deal.won").is_ok());
        assert!(validate_pattern("deal.*").is_ok());
        assert!(validate_pattern("*").is_ok());
        assert!(validate_pattern("deal").is_err());
        assert!(validate_pattern("*.won").is_err());
        assert!(validate_pattern("Deal.Won").is_err());
    }

    #[test]
    fn orders_by_priority_then_creation() {
        let event = NormalizedEvent::new("deal.won", "1", json!({ "value": 10 }));
        let late = rule("deal.*", 10, 1, None);
        let early = rule("deal.won", 10, 30, None);
        let urgent = rule("*", 1, 0, None);

        let matched = match_rules(vec![late.clone(), early.clone(), urgent.clone()], &event);
        let ids: Vec<Uuid> = matched.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![urgent.id, early.id, late.id]);
    }

    #[test]
    fn every_match_satisfies_pattern_and_filters() {
        let event = NormalizedEvent::new("deal.won", "1", json!({ "value": 500 }));
        let mut disabled = rule("deal.won", 1, 0, None);
        disabled.enabled = false;
        let rules = vec![
            disabled,
            rule("deal.lost", 1, 0, None),
            rule("deal.won", 1, 0, Some(json!({ "value_min": 1000 }))),
            rule("deal.won", 2, 0, Some(json!({ "value_min": 100 }))),
            rule("deal.*", 3, 0, Some(json!({ "bogus": 1 }))),
        ];

        let matched = match_rules(rules, &event);
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].priority, 2);
        for rule in &matched {
            assert!(rule.enabled);
            assert!(pattern_matches(&rule.event_type, &event.event_type));
        }
    }

    #[test]
    fn matching_is_idempotent() {
        let event = NormalizedEvent::new("deal.won", "1", json!({}));
        let rules = vec![rule("deal.*", 5, 3, None), rule("*", 5, 3, None), rule("deal.won", 1, 1, None)];

        let first = match_rules(rules.clone(), &event);
        let second = match_rules(rules, &event);
        assert_eq!(first, second);
    }

    #[test]
    fn no_rules_yields_empty() {
        let event = NormalizedEvent::new("note.added", "1", json!({}));
        assert!(match_rules(Vec::new(), &event).is_empty());
    }
}
