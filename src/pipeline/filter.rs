//! Rule filter conditions.
//!
//! Stored filter JSON is either the typed form
//! `{"conditions": [{"kind": "threshold", ...}]}` or the flat shorthand the
//! dashboard writes (`{"value_min": 1000, "stage_ids": [3, 4]}`). Both parse
//! into a [`RuleFilter`], a conjunction of [`FilterCondition`]s.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use super::event::{NormalizedEvent, scalar_to_f64, scalar_to_string};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FilterError {
    #[error("filters must be a JSON object")]
    NotAnObject,
    #[error("unknown filter key '{0}'")]
    UnknownKey(String),
    #[error("filter '{key}' is invalid: {reason}")]
    InvalidValue { key: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdOp {
    Gte,
    Lte,
}

/// One filter condition. Every variant is handled by [`FilterCondition::evaluate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FilterCondition {
    /// Numeric comparison against a fixed bound
    Threshold {
        field: String,
        op: ThresholdOp,
        value: f64,
    },
    /// Field value must be one of `values`
    Membership { field: String, values: Vec<Value> },
    /// Field must be present and non-empty (or absent when `exists` is false)
    Existence { field: String, exists: bool },
}

impl FilterCondition {
    pub fn evaluate(&self, event: &NormalizedEvent) -> bool {
        match self {
            FilterCondition::Threshold { field, op, value } => {
                let Some(actual) = event.field(field).and_then(scalar_to_f64) else {
                    return false;
                };
                match op {
                    ThresholdOp::Gte => actual >= *value,
                    ThresholdOp::Lte => actual <= *value,
                }
            }
            FilterCondition::Membership { field, values } => {
                let Some(actual) = event.field(field).and_then(scalar_to_string) else {
                    return false;
                };
                values
                    .iter()
                    .filter_map(scalar_to_string)
                    .any(|candidate| candidate == actual)
            }
            FilterCondition::Existence { field, exists } => {
                let present = event.field(field).is_some_and(is_present);
                present == *exists
            }
        }
    }
}

/// Conjunction of conditions; empty matches everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleFilter {
    #[serde(default)]
    pub conditions: Vec<FilterCondition>,
}

impl RuleFilter {
    /// Parses the stored column. `None`, `null` and `{}` yield an empty filter.
    pub fn from_json(raw: Option<&Value>) -> Result<Self, FilterError> {
        let object = match raw {
            None | Some(Value::Null) => return Ok(Self::default()),
            Some(Value::Object(object)) => object,
            Some(_) => return Err(FilterError::NotAnObject),
        };

        if object.contains_key("conditions") {
            return serde_json::from_value(Value::Object(object.clone())).map_err(|err| {
                FilterError::InvalidValue {
                    key: "conditions".to_string(),
                    reason: err.to_string(),
                }
            });
        }

        parse_shorthand(object)
    }

    pub fn matches(&self, event: &NormalizedEvent) -> bool {
        self.conditions.iter().all(|condition| condition.evaluate(event))
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }
}

fn parse_shorthand(object: &Map<String, Value>) -> Result<RuleFilter, FilterError> {
    let mut conditions = Vec::new();

    for (key, value) in object {
        if is_blank(value) {
            continue;
        }

        let condition = match key.as_str() {
            "value_min" => threshold(key, "value", ThresholdOp::Gte, value)?,
            "value_max" => threshold(key, "value", ThresholdOp::Lte, value)?,
            "probability_min" => threshold(key, "probability", ThresholdOp::Gte, value)?,
            "min_hours_since_update" => {
                threshold(key, "hours_since_update", ThresholdOp::Gte, value)?
            }
            "stage_ids" => membership(key, "stage_id", value)?,
            "pipeline_ids" => membership(key, "pipeline_id", value)?,
            "owner_ids" | "user_ids" => membership(key, "owner_id", value)?,
            "statuses" => membership(key, "status", value)?,
            "required_fields" => {
                let fields = value.as_array().ok_or_else(|| invalid(key, "expected an array"))?;
                for field in fields {
                    let field = field
                        .as_str()
                        .ok_or_else(|| invalid(key, "field names must be strings"))?;
                    conditions.push(FilterCondition::Existence {
                        field: field.to_string(),
                        exists: true,
                    });
                }
                continue;
            }
            other => return Err(FilterError::UnknownKey(other.to_string())),
        };
        conditions.push(condition);
    }

    Ok(RuleFilter { conditions })
}

fn threshold(
    key: &str,
    field: &str,
    op: ThresholdOp,
    value: &Value,
) -> Result<FilterCondition, FilterError> {
    let bound = scalar_to_f64(value).ok_or_else(|| invalid(key, "expected a number"))?;
    Ok(FilterCondition::Threshold {
        field: field.to_string(),
        op,
        value: bound,
    })
}

fn membership(key: &str, field: &str, value: &Value) -> Result<FilterCondition, FilterError> {
    let values = match value {
        Value::Array(items) => items.clone(),
        Value::String(_) | Value::Number(_) => vec![value.clone()],
        _ => return Err(invalid(key, "expected an array")),
    };
    Ok(FilterCondition::Membership {
        field: field.to_string(),
        values,
    })
}

fn invalid(key: &str, reason: &str) -> FilterError {
    FilterError::InvalidValue {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(text) => text.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

fn is_present(value: &Value) -> bool {
    !is_blank(value)
}
