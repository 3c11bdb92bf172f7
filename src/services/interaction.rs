//! Interaction model and per-source normalizers.
//!
//! DESIGN
//! ======
//! Five sources feed the timeline: manual notes (jsonb on the lead), the
//! `emails`, `whatsapp_messages` and `call_logs` tables, and the legacy
//! `leads_leadinteractions` table. Each row type gets one `normalize_*`
//! function that produces the common [`Interaction`] shape plus a
//! [`ContactHint`] used later for contact attribution.
//!
//! Ids are prefixed per source (`email_`, `whatsapp_`, `call_`, `legacy_`)
//! so deduplication by id never collides across tables. Manual note ids are
//! kept as stored.
//!
//! An interaction whose instant cannot be determined keeps `raw_date: None`
//! and is dropped by the aggregator.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;

use super::templates::{self, WhatsAppTemplate};

const DATE_FORMAT: &str = "%d.%m.%y";
const TIME_FORMAT: &str = "%H:%M";
const NO_EMPLOYEE: &str = "—";

// =============================================================================
// ENUMS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    /// Lenient parse used for every source. Anything not recognisably
    /// inbound counts as outbound.
    #[must_use]
    pub fn parse_loose(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "in" | "i" | "incoming" | "inbound" | "received" => Self::In,
            _ => Self::Out,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::In => "in",
            Self::Out => "out",
        }
    }
}

/// Channel label shown on the timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionKind {
    Email,
    Whatsapp,
    Call,
    Sms,
    Meeting,
    Office,
    Note,
}

impl InteractionKind {
    /// Recognise a kind name, ignoring case and punctuation.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized: String = raw
            .trim()
            .to_ascii_lowercase()
            .chars()
            .filter(char::is_ascii_alphanumeric)
            .collect();
        match normalized.as_str() {
            "email" | "mail" => Some(Self::Email),
            "whatsapp" | "wa" => Some(Self::Whatsapp),
            "call" | "phone" | "phonecall" => Some(Self::Call),
            "sms" | "text" => Some(Self::Sms),
            "meeting" => Some(Self::Meeting),
            "office" | "officevisit" => Some(Self::Office),
            "note" | "notes" | "other" => Some(Self::Note),
            _ => None,
        }
    }

    /// Parse a free-form kind name (manual notes store whatever the UI sent).
    #[must_use]
    pub fn parse_loose(raw: &str) -> Self {
        Self::parse(raw).unwrap_or(Self::Note)
    }

    /// Single-letter code used by `leads_leadinteractions.kind`.
    #[must_use]
    pub fn legacy_code(self) -> &'static str {
        match self {
            Self::Email => "e",
            Self::Whatsapp => "w",
            Self::Call => "c",
            Self::Sms => "s",
            Self::Meeting => "m",
            Self::Office => "o",
            Self::Note => "n",
        }
    }

    /// Map a legacy single-letter kind code.
    #[must_use]
    pub fn from_legacy_code(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().chars().next() {
            Some('e') => Self::Email,
            Some('w') => Self::Whatsapp,
            Some('c') => Self::Call,
            Some('s') => Self::Sms,
            Some('m') => Self::Meeting,
            Some('o') => Self::Office,
            _ => Self::Note,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Whatsapp => "whatsapp",
            Self::Call => "call",
            Self::Sms => "sms",
            Self::Meeting => "meeting",
            Self::Office => "office",
            Self::Note => "note",
        }
    }
}

/// Which table an interaction came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionSource {
    Manual,
    Email,
    Whatsapp,
    Call,
    Legacy,
}

// =============================================================================
// INTERACTION
// =============================================================================

/// Contact attributed to an interaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactTag {
    pub id: i64,
    pub name: String,
}

/// One entry on a lead's timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub id: String,
    /// `dd.mm.yy`, empty when the instant is unknown.
    pub date: String,
    /// `HH:MM`, empty when the instant is unknown.
    pub time: String,
    pub raw_date: Option<DateTime<Utc>>,
    pub employee: String,
    pub direction: Direction,
    pub kind: InteractionKind,
    pub length: Option<String>,
    pub content: String,
    pub observation: Option<String>,
    pub editable: bool,
    pub source: InteractionSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact: Option<ContactTag>,
}

/// Evidence for contact attribution, gathered during normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContactHint {
    pub contact_id: Option<i64>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

/// A normalized interaction and its attribution hint.
#[derive(Debug, Clone)]
pub struct Normalized {
    pub interaction: Interaction,
    pub hint: ContactHint,
}

// =============================================================================
// DATE HELPERS
// =============================================================================

/// Render `(date, time)` display strings for an instant.
#[must_use]
pub fn display_parts(raw: Option<DateTime<Utc>>) -> (String, String) {
    match raw {
        Some(dt) => (dt.format(DATE_FORMAT).to_string(), dt.format(TIME_FORMAT).to_string()),
        None => (String::new(), String::new()),
    }
}

/// Parse a timestamp string: RFC 3339 first, then naive ISO forms as UTC.
#[must_use]
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Parse a display-style date plus optional time (`dd.mm.yy`, `dd.mm.yyyy`,
/// `dd/mm/yyyy`, or ISO date; `HH:MM[:SS]`).
#[must_use]
pub fn parse_date_time(date: &str, time: Option<&str>) -> Option<DateTime<Utc>> {
    let date = date.trim();
    let day = ["%d.%m.%y", "%d.%m.%Y", "%d/%m/%y", "%d/%m/%Y", "%Y-%m-%d"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(date, fmt).ok())?;
    let clock = time
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .and_then(|t| {
            NaiveTime::parse_from_str(t, "%H:%M:%S")
                .or_else(|_| NaiveTime::parse_from_str(t, "%H:%M"))
                .ok()
        })
        .unwrap_or(NaiveTime::MIN);
    Some(day.and_time(clock).and_utc())
}

/// `m:ss` from a second count.
#[must_use]
pub fn format_duration(seconds: i64) -> String {
    let seconds = seconds.max(0);
    format!("{}:{:02}", seconds / 60, seconds % 60)
}

fn nonempty(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|v| !v.is_empty()).map(str::to_owned)
}

fn build(
    id: String,
    raw_date: Option<DateTime<Utc>>,
    employee: String,
    direction: Direction,
    kind: InteractionKind,
    source: InteractionSource,
) -> Interaction {
    let (date, time) = display_parts(raw_date);
    Interaction {
        id,
        date,
        time,
        raw_date,
        employee,
        direction,
        kind,
        length: None,
        content: String::new(),
        observation: None,
        editable: matches!(source, InteractionSource::Manual),
        source,
        status: None,
        contact: None,
    }
}

// =============================================================================
// MANUAL NOTES
// =============================================================================

fn json_str<'a>(entry: &'a Value, key: &str) -> Option<&'a str> {
    entry.get(key).and_then(Value::as_str)
}

fn json_id(entry: &Value, key: &str) -> Option<String> {
    match entry.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_owned()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// The id an entry was stored with, string or numeric.
pub(crate) fn stored_manual_id(entry: &Value) -> Option<String> {
    json_id(entry, "id")
}

/// Timeline id of a manual entry: its stored id, else `manual_<index>`.
#[must_use]
pub fn manual_id(entry: &Value, index: usize) -> String {
    stored_manual_id(entry).unwrap_or_else(|| format!("manual_{index}"))
}

/// Normalize one entry of `leads.manual_interactions`. `index` names
/// entries stored without an id.
#[must_use]
pub fn normalize_manual(entry: &Value, index: usize) -> Normalized {
    let id = manual_id(entry, index);
    let raw_date = json_str(entry, "raw_date")
        .and_then(parse_timestamp)
        .or_else(|| json_str(entry, "date").and_then(|d| parse_date_time(d, json_str(entry, "time"))));
    let employee = nonempty(json_str(entry, "employee")).unwrap_or_else(|| NO_EMPLOYEE.to_owned());
    let direction = json_str(entry, "direction").map_or(Direction::Out, Direction::parse_loose);
    let kind = json_str(entry, "kind").map_or(InteractionKind::Note, InteractionKind::parse_loose);

    let mut interaction = build(id, raw_date, employee, direction, kind, InteractionSource::Manual);
    interaction.length = nonempty(json_str(entry, "length"));
    interaction.content = json_str(entry, "content").unwrap_or_default().to_owned();
    interaction.observation = nonempty(json_str(entry, "observation"));

    let contact_id = entry.get("contact_id").and_then(|v| match v {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    });
    Normalized { interaction, hint: ContactHint { contact_id, ..ContactHint::default() } }
}

// =============================================================================
// EMAILS
// =============================================================================

#[derive(Debug, Clone, FromRow)]
pub struct EmailRow {
    pub message_id: String,
    pub contact_id: Option<i64>,
    pub sender_name: Option<String>,
    pub sender_email: Option<String>,
    pub recipient_list: Option<String>,
    pub subject: Option<String>,
    pub body_preview: Option<String>,
    pub direction: String,
    pub sent_at: DateTime<Utc>,
}

#[must_use]
pub fn normalize_email(row: &EmailRow, lead_name: &str) -> Normalized {
    let direction = Direction::parse_loose(&row.direction);
    let employee = match direction {
        Direction::Out => nonempty(row.sender_name.as_deref()).unwrap_or_else(|| NO_EMPLOYEE.to_owned()),
        Direction::In => lead_name.to_owned(),
    };
    let mut interaction = build(
        format!("email_{}", row.message_id),
        Some(row.sent_at),
        employee,
        direction,
        InteractionKind::Email,
        InteractionSource::Email,
    );
    interaction.content = [row.subject.as_deref(), row.body_preview.as_deref()]
        .into_iter()
        .filter_map(nonempty)
        .collect::<Vec<_>>()
        .join("\n\n");

    // The client's address is the sender on inbound mail and the first
    // recipient on outbound mail.
    let email = match direction {
        Direction::In => nonempty(row.sender_email.as_deref()),
        Direction::Out => row
            .recipient_list
            .as_deref()
            .and_then(|list| list.split([',', ';']).map(str::trim).find(|s| !s.is_empty()))
            .map(str::to_owned),
    };
    Normalized { interaction, hint: ContactHint { contact_id: row.contact_id, email, phone: None } }
}

// =============================================================================
// WHATSAPP
// =============================================================================

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct WhatsAppRow {
    pub id: i64,
    pub contact_id: Option<i64>,
    pub phone_number: Option<String>,
    pub sender_name: Option<String>,
    pub direction: String,
    pub message: Option<String>,
    pub message_type: String,
    pub media_url: Option<String>,
    pub template_id: Option<i64>,
    pub template_params: Option<Value>,
    pub whatsapp_message_id: Option<String>,
    pub status: String,
    pub error_message: Option<String>,
    pub sent_at: DateTime<Utc>,
}

#[must_use]
pub fn normalize_whatsapp(row: &WhatsAppRow, lead_name: &str, templates: &[WhatsAppTemplate]) -> Normalized {
    let direction = Direction::parse_loose(&row.direction);
    let employee = match direction {
        Direction::Out => nonempty(row.sender_name.as_deref()).unwrap_or_else(|| NO_EMPLOYEE.to_owned()),
        Direction::In => lead_name.to_owned(),
    };
    let mut interaction = build(
        format!("whatsapp_{}", row.id),
        Some(row.sent_at),
        employee,
        direction,
        InteractionKind::Whatsapp,
        InteractionSource::Whatsapp,
    );

    let text = row.message.as_deref().unwrap_or_default();
    let markers = templates::Markers::for_message(direction == Direction::Out, &row.message_type);
    let resolved =
        templates::resolve_content(text, row.template_id, row.template_params.as_ref(), templates, markers);
    interaction.content = if resolved.trim().is_empty() && row.message_type != "text" {
        format!("[{}]", row.message_type)
    } else {
        resolved
    };
    interaction.status = Some(row.status.clone());
    interaction.observation = nonempty(row.error_message.as_deref());

    Normalized {
        interaction,
        hint: ContactHint { contact_id: row.contact_id, email: None, phone: nonempty(row.phone_number.as_deref()) },
    }
}

// =============================================================================
// CALL LOGS
// =============================================================================

#[derive(Debug, Clone, FromRow)]
pub struct CallLogRow {
    pub id: i64,
    pub contact_id: Option<i64>,
    pub cdate: Option<NaiveDate>,
    pub ctime: Option<NaiveTime>,
    pub direction: Option<String>,
    pub source: Option<String>,
    pub destination: Option<String>,
    pub duration: Option<i32>,
    pub employee: Option<String>,
    pub status: Option<String>,
}

#[must_use]
pub fn normalize_call(row: &CallLogRow) -> Normalized {
    let direction = row
        .direction
        .as_deref()
        .map_or(Direction::Out, Direction::parse_loose);
    let raw_date = row
        .cdate
        .map(|day| day.and_time(row.ctime.unwrap_or(NaiveTime::MIN)).and_utc());
    let employee = nonempty(row.employee.as_deref()).unwrap_or_else(|| NO_EMPLOYEE.to_owned());

    let mut interaction = build(
        format!("call_{}", row.id),
        raw_date,
        employee,
        direction,
        InteractionKind::Call,
        InteractionSource::Call,
    );
    interaction.length = row.duration.map(|secs| format_duration(i64::from(secs)));
    interaction.content = match (nonempty(row.source.as_deref()), nonempty(row.destination.as_deref())) {
        (Some(from), Some(to)) => format!("{from} → {to}"),
        (Some(one), None) | (None, Some(one)) => one,
        (None, None) => String::new(),
    };
    interaction.status = nonempty(row.status.as_deref());

    // The client's number is the caller on inbound calls and the callee otherwise.
    let phone = match direction {
        Direction::In => nonempty(row.source.as_deref()),
        Direction::Out => nonempty(row.destination.as_deref()),
    };
    Normalized { interaction, hint: ContactHint { contact_id: row.contact_id, email: None, phone } }
}

// =============================================================================
// LEGACY INTERACTIONS
// =============================================================================

#[derive(Debug, Clone, FromRow)]
pub struct LegacyInteractionRow {
    pub id: i64,
    pub contact_id: Option<i64>,
    pub cdate: Option<DateTime<Utc>>,
    pub kind: Option<String>,
    pub direction: Option<String>,
    pub employee: Option<String>,
    pub minutes: Option<i32>,
    pub content: Option<String>,
    pub description: Option<String>,
}

#[must_use]
pub fn normalize_legacy(row: &LegacyInteractionRow) -> Normalized {
    let direction = row
        .direction
        .as_deref()
        .map_or(Direction::Out, Direction::parse_loose);
    let kind = row
        .kind
        .as_deref()
        .map_or(InteractionKind::Note, InteractionKind::from_legacy_code);
    let employee = nonempty(row.employee.as_deref()).unwrap_or_else(|| NO_EMPLOYEE.to_owned());

    let mut interaction = build(
        format!("legacy_{}", row.id),
        row.cdate,
        employee,
        direction,
        kind,
        InteractionSource::Legacy,
    );
    interaction.length = row
        .minutes
        .filter(|m| *m > 0)
        .map(|m| format_duration(i64::from(m) * 60));
    interaction.content = row.content.clone().unwrap_or_default();
    interaction.observation = nonempty(row.description.as_deref());

    Normalized { interaction, hint: ContactHint { contact_id: row.contact_id, ..ContactHint::default() } }
}

#[cfg(test)]
#[path = "interaction_test.rs"]
mod tests;
