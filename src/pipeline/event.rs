//! Normalization of Pipedrive webhook payloads.
//!
//! Pipedrive sends two payload generations. v1 carries `event:
//! "updated.deal"`, `meta.object`, `current` and `previous`; v2 carries
//! `meta.entity`, `meta.action: create|change|delete` and `data`. Both collapse
//! into a [`NormalizedEvent`] whose type is `<object>.<action>`.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors raised while normalizing an inbound payload.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("payload must be a JSON object")]
    NotAnObject,
    #[error("payload has no meta object")]
    MissingMeta,
    #[error("payload does not identify the object type")]
    MissingObjectType,
    #[error("payload does not identify the action")]
    MissingAction,
    #[error("payload has no company id")]
    MissingCompanyId,
}

/// The normalized, tenant-resolvable form of one CRM event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedEvent {
    /// `<object>.<action>`, e.g. `deal.won`
    pub event_type: String,
    pub object_type: String,
    pub action: String,
    pub object_id: Option<String>,
    /// Pipedrive company id; resolves the tenant
    pub company_id: String,
    pub user_id: Option<String>,
    /// Pipedrive host of the account, e.g. `acme.pipedrive.com`
    pub host: Option<String>,
    pub occurred_at: DateTime<Utc>,
    #[serde(default)]
    pub current: Map<String, Value>,
    #[serde(default)]
    pub previous: Map<String, Value>,
    /// Values computed during normalization (`hours_since_update`, `owner_id`)
    #[serde(default)]
    pub derived: Map<String, Value>,
}

impl NormalizedEvent {
    /// Builds an event from a type and a field snapshot.
    pub fn new(event_type: &str, company_id: &str, current: Value) -> Self {
        let (object_type, action) = match event_type.split_once('.') {
            Some((object, action)) => (object.to_string(), action.to_string()),
            None => (event_type.to_string(), String::new()),
        };
        let current = match current {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        let object_id = current.get("id").and_then(scalar_to_string);

        let mut event = Self {
            event_type: event_type.to_string(),
            object_type,
            action,
            object_id,
            company_id: company_id.to_string(),
            user_id: None,
            host: None,
            occurred_at: Utc::now(),
            current,
            previous: Map::new(),
            derived: Map::new(),
        };
        event.derive_fields();
        event
    }

    /// Looks up a dotted field path in the current snapshot, then in derived values.
    pub fn field(&self, path: &str) -> Option<&Value> {
        lookup_path(&self.current, path).or_else(|| lookup_path(&self.derived, path))
    }

    /// Looks up a dotted field path in the previous snapshot.
    pub fn previous_field(&self, path: &str) -> Option<&Value> {
        lookup_path(&self.previous, path)
    }

    /// Human label of the CRM record: title, then name, then `<object> #<id>`.
    pub fn title(&self) -> String {
        ["title", "name", "subject"]
            .iter()
            .filter_map(|key| self.current.get(*key).and_then(scalar_to_string))
            .find(|value| !value.is_empty())
            .unwrap_or_else(|| match &self.object_id {
                Some(id) => format!("{} #{}", self.object_type, id),
                None => self.object_type.clone(),
            })
    }

    fn derive_fields(&mut self) {
        let owner = self
            .current
            .get("owner_id")
            .or_else(|| self.current.get("user_id"))
            .and_then(scalar_to_string);
        if let Some(owner) = owner {
            self.derived.insert("owner_id".to_string(), Value::String(owner));
        }

        let last_update = self
            .previous
            .get("update_time")
            .or_else(|| self.current.get("update_time"))
            .and_then(Value::as_str)
            .and_then(parse_pipedrive_time);
        let reference = if self.previous.contains_key("update_time") {
            last_update
        } else {
            None
        };
        if let Some(updated_at) = reference {
            let minutes = (self.occurred_at - updated_at).num_minutes().max(0);
            if let Some(hours) = serde_json::Number::from_f64(minutes as f64 / 60.0) {
                self.derived
                    .insert("hours_since_update".to_string(), Value::Number(hours));
            }
        }
    }
}

/// Normalizes a raw webhook payload received at `received_at`.
pub fn normalize(payload: &Value, received_at: DateTime<Utc>) -> Result<NormalizedEvent, NormalizeError> {
    let root = payload.as_object().ok_or(NormalizeError::NotAnObject)?;
    let meta = root
        .get("meta")
        .and_then(Value::as_object)
        .ok_or(NormalizeError::MissingMeta)?;

    // v1 carries "event": "<action>.<object>"
    let legacy_event = root.get("event").and_then(Value::as_str).and_then(|event| {
        event
            .split_once('.')
            .map(|(action, object)| (action.to_string(), object.to_string()))
    });

    let object_type = meta
        .get("entity")
        .or_else(|| meta.get("object"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| legacy_event.as_ref().map(|(_, object)| object.clone()))
        .filter(|object| !object.is_empty() && object != "*")
        .ok_or(NormalizeError::MissingObjectType)?
        .to_ascii_lowercase();

    let raw_action = meta
        .get("action")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| legacy_event.as_ref().map(|(action, _)| action.clone()))
        .filter(|action| !action.is_empty() && action != "*")
        .ok_or(NormalizeError::MissingAction)?;
    let action = normalize_action(&raw_action);

    let company_id = meta
        .get("company_id")
        .and_then(scalar_to_string)
        .filter(|id| !id.is_empty())
        .ok_or(NormalizeError::MissingCompanyId)?;

    let current = root
        .get("data")
        .or_else(|| root.get("current"))
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    let previous = root
        .get("previous")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    let object_id = meta
        .get("entity_id")
        .or_else(|| meta.get("id"))
        .and_then(scalar_to_string)
        .or_else(|| current.get("id").and_then(scalar_to_string))
        .or_else(|| previous.get("id").and_then(scalar_to_string));

    let occurred_at = meta
        .get("timestamp")
        .and_then(parse_timestamp)
        .unwrap_or(received_at);

    let event_type = derive_event_type(&object_type, &action, &current, &previous);

    let mut event = NormalizedEvent {
        event_type,
        object_type,
        action,
        object_id,
        company_id,
        user_id: meta.get("user_id").and_then(scalar_to_string),
        host: meta
            .get("host")
            .and_then(Value::as_str)
            .filter(|host| !host.is_empty())
            .map(str::to_string),
        occurred_at,
        current,
        previous,
        derived: Map::new(),
    };
    event.derive_fields();

    Ok(event)
}

fn normalize_action(raw: &str) -> String {
    match raw.to_ascii_lowercase().as_str() {
        "create" | "added" | "add" => "added".to_string(),
        "change" | "updated" | "update" => "updated".to_string(),
        "delete" | "deleted" => "deleted".to_string(),
        "merge" | "merged" => "merged".to_string(),
        other => other.to_string(),
    }
}

/// An updated deal whose status moved to won or lost becomes `deal.won`/`deal.lost`.
fn derive_event_type(
    object_type: &str,
    action: &str,
    current: &Map<String, Value>,
    previous: &Map<String, Value>,
) -> String {
    if object_type == "deal" && action == "updated" {
        let status = current.get("status").and_then(Value::as_str);
        let previous_status = previous.get("status").and_then(Value::as_str);
        if let (Some(status @ ("won" | "lost")), Some(before)) = (status, previous_status)
            && before != status
        {
            return format!("deal.{status}");
        }
    }

    format!("{object_type}.{action}")
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(number) => {
            let raw = number.as_i64()?;
            // Anything past year 33658 in seconds is really milliseconds
            if raw > 1_000_000_000_000 {
                Utc.timestamp_millis_opt(raw).single()
            } else {
                Utc.timestamp_opt(raw, 0).single()
            }
        }
        Value::String(text) => text
            .parse::<i64>()
            .ok()
            .and_then(|raw| parse_timestamp(&Value::from(raw)))
            .or_else(|| parse_pipedrive_time(text)),
        _ => None,
    }
}

/// Parses Pipedrive's `YYYY-MM-DD HH:MM:SS` (UTC) or RFC 3339 timestamps.
fn parse_pipedrive_time(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|naive| naive.and_utc())
        })
}

fn lookup_path<'a>(root: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = root.get(first)?;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Renders a JSON scalar as text. Pipedrive reference objects
/// (`{"id": 7, "name": "Ann", "value": 7}`) collapse to their `value` or `id`.
pub fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number_to_string(number)),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Object(map) => map
            .get("value")
            .or_else(|| map.get("id"))
            .and_then(scalar_to_string),
        _ => None,
    }
}

fn number_to_string(number: &serde_json::Number) -> String {
    if let Some(int) = number.as_i64() {
        return int.to_string();
    }
    match number.as_f64() {
        Some(float) if float.fract() == 0.0 && float.abs() < 1e15 => format!("{}", float as i64),
        _ => number.to_string(),
    }
}

/// Numeric view of a field: numbers, numeric strings and reference objects.
pub fn scalar_to_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        Value::Object(map) => map.get("value").and_then(scalar_to_f64),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn received() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn normalizes_v1_won_deal() {
        let payload = json!({
            "event": "updated.deal",
            "meta": {
                "action": "updated",
                "object": "deal",
                "id": 42,
                "company_id": 777,
                "user_id": 9,
                "host": "acme.pipedrive.com",
                "timestamp": 1709294400
            },
            "current": { "id": 42, "title": "Big deal", "value": 15000, "status": "won", "user_id": 9 },
            "previous": { "id": 42, "status": "open", "update_time": "2024-03-01 06:00:00" }
        });

        let event = normalize(&payload, received()).unwrap();
        assert_eq!(event.event_type, "deal.won");
        assert_eq!(event.object_type, "deal");
        assert_eq!(event.action, "updated");
        assert_eq!(event.object_id.as_deref(), Some("42"));
        assert_eq!(event.company_id, "777");
        assert_eq!(event.host.as_deref(), Some("acme.pipedrive.com"));
        assert_eq!(event.field("value"), Some(&json!(15000)));
        assert_eq!(event.field("owner_id"), Some(&json!("9")));
        assert_eq!(event.field("hours_since_update"), Some(&json!(6.0)));
    }

    #[test]
    fn normalizes_v2_change_to_updated() {
        let payload = json!({
            "meta": { "action": "change", "entity": "person", "entity_id": "5", "company_id": "12" },
            "data": { "id": 5, "name": "Ann" },
            "previous": { "name": "Anne" }
        });

        let event = normalize(&payload, received()).unwrap();
        assert_eq!(event.event_type, "person.updated");
        assert_eq!(event.object_id.as_deref(), Some("5"));
        assert_eq!(event.occurred_at, received());
        assert_eq!(event.previous_field("name"), Some(&json!("Anne")));
    }

    #[test]
    fn v2_create_becomes_added() {
        let payload = json!({
            "meta": { "action": "create", "entity": "deal", "company_id": 1, "timestamp": "2024-03-01T10:00:00Z" },
            "data": { "id": 1, "status": "open" }
        });

        let event = normalize(&payload, received()).unwrap();
        assert_eq!(event.event_type, "deal.added");
        assert_eq!(
            event.occurred_at,
            Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap()
        );
    }

    #[test]
    fn updated_deal_without_status_change_stays_updated() {
        let payload = json!({
            "meta": { "action": "change", "entity": "deal", "company_id": 1 },
            "data": { "id": 1, "status": "won", "value": 10 },
            "previous": { "value": 5 }
        });

        let event = normalize(&payload, received()).unwrap();
        assert_eq!(event.event_type, "deal.updated");
    }

    #[test]
    fn millisecond_timestamps_are_detected() {
        let payload = json!({
            "meta": { "action": "added", "object": "note", "company_id": 1, "timestamp": 1709294400000i64 }
        });

        let event = normalize(&payload, received()).unwrap();
        assert_eq!(event.occurred_at, Utc.timestamp_opt(1709294400, 0).unwrap());
    }

    #[test]
    fn rejects_payloads_without_company() {
        let payload = json!({ "meta": { "action": "added", "object": "deal" } });
        assert_eq!(
            normalize(&payload, received()),
            Err(NormalizeError::MissingCompanyId)
        );
        assert_eq!(
            normalize(&json!([1, 2]), received()),
            Err(NormalizeError::NotAnObject)
        );
        assert_eq!(
            normalize(&json!({ "meta": { "company_id": 1, "action": "added" } }), received()),
            Err(NormalizeError::MissingObjectType)
        );
    }

    #[test]
    fn nested_paths_and_reference_objects() {
        let event = NormalizedEvent::new(
            "deal.added",
            "1",
            json!({ "id": 3, "org_id": { "name": "Acme", "value": 11 }, "tags": ["a", "b"] }),
        );

        assert_eq!(event.field("org_id.name"), Some(&json!("Acme")));
        assert_eq!(event.field("tags.1"), Some(&json!("b")));
        assert_eq!(scalar_to_string(event.field("org_id").unwrap()).as_deref(), Some("11"));
        assert_eq!(event.title(), "deal #3");
    }
}
