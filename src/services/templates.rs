//! WhatsApp template lookup and content resolution.
//!
//! Outbound template messages are stored with either a `template_id` or a
//! bracketed marker in the text (`[Template: welcome_client]` or just
//! `[welcome_client]`). For display we swap in the approved body and fill
//! its `{{n}}` placeholders from the stored parameters.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{FromRow, PgPool};

/// An approved message template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct WhatsAppTemplate {
    pub id: i64,
    pub name: String,
    pub language: String,
    pub content: String,
}

/// Load all active templates.
///
/// # Errors
///
/// Returns a database error if the query fails.
pub async fn load_templates(pool: &PgPool) -> Result<Vec<WhatsAppTemplate>, sqlx::Error> {
    sqlx::query_as::<_, WhatsAppTemplate>(
        "SELECT id, name, language, content FROM whatsapp_templates WHERE active ORDER BY id",
    )
    .fetch_all(pool)
    .await
}

/// Shortest name fragment that may match by containment.
const MIN_CONTAINMENT_CHARS: usize = 3;

/// Which bracketed markers in a message's text may name a template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Markers {
    /// Outbound template sends: a marker anywhere in the text.
    Anywhere,
    /// Other outbound text: only when the whole message is one marker.
    WholeMessage,
    /// Inbound text is shown as the client wrote it.
    Ignored,
}

impl Markers {
    #[must_use]
    pub fn for_message(outbound: bool, message_type: &str) -> Self {
        match (outbound, message_type) {
            (false, _) => Self::Ignored,
            (true, "template") => Self::Anywhere,
            (true, _) => Self::WholeMessage,
        }
    }

    fn marker(self, text: &str) -> Option<String> {
        match self {
            Self::Anywhere => extract_marker(text),
            Self::WholeMessage => {
                let trimmed = text.trim();
                let whole = trimmed.starts_with('[') && trimmed.ends_with(']') && trimmed.matches(']').count() == 1;
                if whole { extract_marker(trimmed) } else { None }
            }
            Self::Ignored => None,
        }
    }
}

/// Resolve a message's display text.
///
/// Order: explicit `template_id`, then a bracketed marker (as allowed by
/// `markers`) fuzzy-matched against template names, then the raw text
/// unchanged.
#[must_use]
pub fn resolve_content(
    text: &str,
    template_id: Option<i64>,
    params: Option<&Value>,
    templates: &[WhatsAppTemplate],
    markers: Markers,
) -> String {
    let by_id = template_id.and_then(|id| templates.iter().find(|t| t.id == id));
    let template = by_id.or_else(|| markers.marker(text).and_then(|marker| find_by_name(&marker, templates)));
    match template {
        Some(t) => fill_placeholders(&t.content, params),
        None => text.to_owned(),
    }
}

/// Pull the template name out of `[Template: name]` or `[name]`.
#[must_use]
pub fn extract_marker(text: &str) -> Option<String> {
    let start = text.find('[')?;
    let end = start + text[start..].find(']')?;
    let inner = text[start + 1..end].trim();
    let name = match inner.split_once(':') {
        Some((label, rest)) if label.trim().eq_ignore_ascii_case("template") => rest.trim(),
        _ => inner,
    };
    if name.is_empty() { None } else { Some(name.to_owned()) }
}

/// Lowercase and collapse `_`, `-` and whitespace runs to a single space.
fn normalize_name(raw: &str) -> String {
    raw.to_lowercase()
        .split(|c: char| c == '_' || c == '-' || c.is_whitespace())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Exact normalized match first, then containment either way. Fragments
/// shorter than three characters only match exactly.
#[must_use]
pub fn find_by_name<'a>(marker: &str, templates: &'a [WhatsAppTemplate]) -> Option<&'a WhatsAppTemplate> {
    let wanted = normalize_name(marker);
    if wanted.is_empty() {
        return None;
    }
    let named: Vec<(String, &WhatsAppTemplate)> = templates.iter().map(|t| (normalize_name(&t.name), t)).collect();
    named
        .iter()
        .find(|(name, _)| *name == wanted)
        .or_else(|| {
            named
                .iter()
                .find(|(name, _)| {
                    let long_enough = |fragment: &str| fragment.chars().count() >= MIN_CONTAINMENT_CHARS;
                    (long_enough(&wanted) && name.contains(&wanted))
                        || (long_enough(name) && wanted.contains(name.as_str()))
                })
        })
        .map(|(_, t)| *t)
}

/// Replace `{{1}}`, `{{2}}`… with the positional parameters. Accepts an
/// array of values or an object keyed by position.
#[must_use]
pub fn fill_placeholders(content: &str, params: Option<&Value>) -> String {
    let values: Vec<String> = match params {
        Some(Value::Array(items)) => items.iter().map(param_text).collect(),
        Some(Value::Object(map)) => {
            let mut keyed: Vec<(usize, String)> = map
                .iter()
                .filter_map(|(k, v)| k.parse::<usize>().ok().map(|n| (n, param_text(v))))
                .collect();
            keyed.sort_by_key(|(n, _)| *n);
            let mut out = Vec::new();
            for (n, text) in keyed {
                if n == 0 {
                    continue;
                }
                if out.len() < n {
                    out.resize(n, String::new());
                }
                out[n - 1] = text;
            }
            out
        }
        _ => Vec::new(),
    };

    let mut result = content.to_owned();
    for (idx, value) in values.iter().enumerate() {
        result = result.replace(&format!("{{{{{}}}}}", idx + 1), value);
    }
    result
}

fn param_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        // Cloud API parameter objects: { "type": "text", "text": "..." }.
        Value::Object(map) => map
            .get("text")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .unwrap_or_default(),
        other => other.to_string(),
    }
}

#[cfg(test)]
#[path = "templates_test.rs"]
mod tests;
