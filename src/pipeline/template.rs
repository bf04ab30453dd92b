//! Message rendering for Google Chat.
//!
//! Rendering never fails: unknown placeholders render empty and a custom rule
//! without a template falls back to the simple mode.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use utoipa::ToSchema;

use super::event::{NormalizedEvent, scalar_to_f64, scalar_to_string};

/// Template modes a rule can select.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TemplateMode {
    Simple,
    Compact,
    Detailed,
    Custom,
}

impl TemplateMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateMode::Simple => "simple",
            TemplateMode::Compact => "compact",
            TemplateMode::Detailed => "detailed",
            TemplateMode::Custom => "custom",
        }
    }
}

impl fmt::Display for TemplateMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TemplateMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "simple" => Ok(TemplateMode::Simple),
            "compact" => Ok(TemplateMode::Compact),
            "detailed" => Ok(TemplateMode::Detailed),
            "custom" => Ok(TemplateMode::Custom),
            other => Err(format!("unknown template mode '{other}'")),
        }
    }
}

/// Rendered chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageBody {
    Text { text: String },
    Card { fallback_text: String, card: Value },
}

impl MessageBody {
    /// Google Chat incoming-webhook request body.
    pub fn to_chat_json(&self) -> Value {
        match self {
            MessageBody::Text { text } => json!({ "text": text }),
            MessageBody::Card {
                fallback_text,
                card,
            } => json!({
                "text": fallback_text,
                "cardsV2": [{ "cardId": "pipenotify", "card": card }],
            }),
        }
    }

    /// Plain-text view, used for logs and tests.
    pub fn text(&self) -> &str {
        match self {
            MessageBody::Text { text } => text,
            MessageBody::Card { fallback_text, .. } => fallback_text,
        }
    }
}

/// Deployment settings the renderer needs.
#[derive(Debug, Clone)]
pub struct RenderContext {
    /// Used for deep links when the event carries no host
    pub app_base: String,
}

impl Default for RenderContext {
    fn default() -> Self {
        Self {
            app_base: "https://app.pipedrive.com".to_string(),
        }
    }
}

pub fn render(
    mode: TemplateMode,
    custom_template: Option<&str>,
    event: &NormalizedEvent,
    ctx: &RenderContext,
) -> MessageBody {
    match mode {
        TemplateMode::Simple => render_simple(event),
        TemplateMode::Compact => render_compact(event),
        TemplateMode::Detailed => render_detailed(event, ctx),
        TemplateMode::Custom => match custom_template.filter(|t| !t.trim().is_empty()) {
            Some(template) => MessageBody::Text {
                text: render_custom(template, event),
            },
            None => render_simple(event),
        },
    }
}

fn headline(event: &NormalizedEvent) -> String {
    let object = capitalize(&event.object_type);
    match event.event_type.as_str() {
        "deal.won" => "🎉 Deal won".to_string(),
        "deal.lost" => "Deal lost".to_string(),
        _ => match event.action.as_str() {
            "added" => format!("New {}", event.object_type),
            "updated" => format!("{object} updated"),
            "deleted" => format!("{object} deleted"),
            "merged" => format!("{object} merged"),
            other => format!("{object} {other}"),
        },
    }
}

fn formatted_value(event: &NormalizedEvent) -> Option<String> {
    let amount = event.field("value").and_then(scalar_to_f64)?;
    let amount = if amount.fract() == 0.0 {
        format!("{}", amount as i64)
    } else {
        format!("{amount:.2}")
    };
    match event.field("currency").and_then(scalar_to_string) {
        Some(currency) if !currency.is_empty() => Some(format!("{amount} {currency}")),
        _ => Some(amount),
    }
}

fn render_simple(event: &NormalizedEvent) -> MessageBody {
    let mut text = format!("{}: {}", headline(event), event.title());
    if let Some(value) = formatted_value(event) {
        text.push_str(&format!(" ({value})"));
    }
    MessageBody::Text { text }
}

/// Up to three labelled key fields, in priority order.
fn key_fields(event: &NormalizedEvent) -> Vec<(String, String)> {
    let mut fields = Vec::new();
    if let Some(value) = formatted_value(event) {
        fields.push(("Value".to_string(), value));
    }

    let candidates = [
        ("Organization", "org_name", "org_id"),
        ("Contact", "person_name", "person_id"),
        ("Owner", "owner_name", "user_id"),
        ("Stage", "stage_name", "stage_id"),
        ("Status", "status", "status"),
    ];
    for (label, name_key, ref_key) in candidates {
        if fields.len() >= 3 {
            break;
        }
        let display = event
            .field(name_key)
            .and_then(scalar_to_string)
            .or_else(|| {
                event
                    .field(ref_key)
                    .and_then(|value| value.get("name"))
                    .and_then(scalar_to_string)
            });
        if let Some(display) = display.filter(|d| !d.is_empty()) {
            fields.push((label.to_string(), display));
        }
    }

    fields
}

fn render_compact(event: &NormalizedEvent) -> MessageBody {
    let mut lines = vec![format!("*{}*: {}", headline(event), event.title())];
    lines.extend(
        key_fields(event)
            .into_iter()
            .map(|(label, value)| format!("{label}: {value}")),
    );
    MessageBody::Text {
        text: lines.join("\n"),
    }
}

/// Deep link to the record, e.g. `https://acme.pipedrive.com/deal/42`.
pub fn deep_link(event: &NormalizedEvent, ctx: &RenderContext) -> Option<String> {
    let id = event.object_id.as_deref()?;
    let base = match event.host.as_deref() {
        Some(host) => format!("https://{host}"),
        None => ctx.app_base.trim_end_matches('/').to_string(),
    };
    Some(format!("{base}/{}/{id}", event.object_type))
}

fn render_detailed(event: &NormalizedEvent, ctx: &RenderContext) -> MessageBody {
    let title = event.title();
    let headline = headline(event);

    let mut widgets: Vec<Value> = key_fields(event)
        .into_iter()
        .map(|(label, value)| json!({ "decoratedText": { "topLabel": label, "text": value } }))
        .collect();

    for (label, key) in [("Expected close", "expected_close_date"), ("Probability", "probability")] {
        if let Some(value) = event.field(key).and_then(scalar_to_string).filter(|v| !v.is_empty()) {
            widgets.push(json!({ "decoratedText": { "topLabel": label, "text": value } }));
        }
    }

    widgets.push(json!({
        "decoratedText": {
            "topLabel": "When",
            "text": event.occurred_at.format("%Y-%m-%d %H:%M UTC").to_string(),
        }
    }));

    if let Some(link) = deep_link(event, ctx) {
        widgets.push(json!({
            "buttonList": {
                "buttons": [{
                    "text": "View in Pipedrive",
                    "onClick": { "openLink": { "url": link } },
                }]
            }
        }));
    }

    let card = json!({
        "header": { "title": headline, "subtitle": title },
        "sections": [{ "widgets": widgets }],
    });

    MessageBody::Card {
        fallback_text: format!("{headline}: {title}"),
        card,
    }
}

fn placeholder_pattern() -> Option<&'static Regex> {
    static PLACEHOLDER: OnceLock<Option<Regex>> = OnceLock::new();
    PLACEHOLDER
        .get_or_init(|| Regex::new(r"\{([A-Za-z0-9_]+(?:\.[A-Za-z0-9_]+)*)\}").ok())
        .as_ref()
}

/// Substitutes `{a.b}` placeholders; unresolved ones become empty strings.
pub fn render_custom(template: &str, event: &NormalizedEvent) -> String {
    let Some(pattern) = placeholder_pattern() else {
        return template.to_string();
    };

    pattern
        .replace_all(template, |caps: &Captures| {
            resolve_placeholder(&caps[1], event).unwrap_or_default()
        })
        .into_owned()
}

fn resolve_placeholder(path: &str, event: &NormalizedEvent) -> Option<String> {
    let (head, rest) = match path.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (path, None),
    };

    match (head, rest) {
        ("event", Some(key)) => match key {
            "type" => Some(event.event_type.clone()),
            "object" => Some(event.object_type.clone()),
            "action" => Some(event.action.clone()),
            "id" => event.object_id.clone(),
            "company_id" => Some(event.company_id.clone()),
            "timestamp" => Some(event.occurred_at.to_rfc3339()),
            _ => None,
        },
        ("current", Some(key)) => event.field(key).and_then(scalar_to_string),
        ("previous", Some(key)) => event.previous_field(key).and_then(scalar_to_string),
        (object, Some(key)) if object == event.object_type => {
            event.field(key).and_then(scalar_to_string)
        }
        _ => event.field(path).and_then(scalar_to_string),
    }
}

fn capitalize(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
