//! Manual interactions — notes an employee records by hand on a lead.
//!
//! DESIGN
//! ======
//! New-schema leads keep manual entries as a jsonb array on
//! `leads.manual_interactions`; appends are a single `||` update and edits
//! are a read-modify-write under `FOR UPDATE`. Legacy leads get a row in
//! `leads_leadinteractions` instead, and those rows are never editable.
//!
//! Every successful mutation invalidates the lead's cached timeline.

use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

use super::interaction::{self, Direction, Interaction, InteractionKind, LegacyInteractionRow};
use super::lead::{self, LeadError, LeadRef};
use crate::error::ErrorCode;
use crate::state::AppState;

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum NoteError {
    #[error("note content is empty")]
    EmptyContent,
    #[error("unknown interaction kind: {0}")]
    InvalidKind(String),
    #[error("invalid note date: {0}")]
    InvalidDate(String),
    #[error("interactions on legacy leads cannot be edited")]
    NotEditable,
    #[error("interaction not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Lead(#[from] LeadError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl ErrorCode for NoteError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::EmptyContent => "E_EMPTY_CONTENT",
            Self::InvalidKind(_) => "E_INVALID_KIND",
            Self::InvalidDate(_) => "E_INVALID_DATE",
            Self::NotEditable => "E_NOT_EDITABLE",
            Self::NotFound(_) => "E_INTERACTION_NOT_FOUND",
            Self::Lead(e) => e.error_code(),
            Self::Database(_) => "E_DATABASE",
        }
    }

    fn http_status(&self) -> StatusCode {
        match self {
            Self::EmptyContent | Self::InvalidKind(_) | Self::InvalidDate(_) => StatusCode::BAD_REQUEST,
            Self::NotEditable => StatusCode::CONFLICT,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Lead(e) => e.http_status(),
            Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Body of `POST /api/leads/{id}/interactions`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewNote {
    pub content: String,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub direction: Option<String>,
    /// `m:ss` or whole minutes.
    #[serde(default)]
    pub length: Option<String>,
    #[serde(default)]
    pub observation: Option<String>,
    #[serde(default)]
    pub contact_id: Option<i64>,
    /// When the interaction happened; defaults to now. RFC 3339 or `dd.mm.yy[ HH:MM]`.
    #[serde(default)]
    pub date: Option<String>,
}

/// Body of `PATCH /api/leads/{id}/interactions/{interaction_id}`. Absent
/// fields keep their stored value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotePatch {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub observation: Option<String>,
    #[serde(default)]
    pub direction: Option<String>,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub length: Option<String>,
}

// =============================================================================
// VALIDATION
// =============================================================================

fn validate_content(raw: &str) -> Result<String, NoteError> {
    let content = raw.trim();
    if content.is_empty() {
        return Err(NoteError::EmptyContent);
    }
    Ok(content.to_owned())
}

fn validate_kind(raw: Option<&str>) -> Result<InteractionKind, NoteError> {
    match raw.map(str::trim).filter(|k| !k.is_empty()) {
        None => Ok(InteractionKind::Note),
        Some(k) => InteractionKind::parse(k).ok_or_else(|| NoteError::InvalidKind(k.to_owned())),
    }
}

fn resolve_date(raw: Option<&str>, now: DateTime<Utc>) -> Result<DateTime<Utc>, NoteError> {
    let Some(raw) = raw.map(str::trim).filter(|d| !d.is_empty()) else {
        return Ok(now);
    };
    interaction::parse_timestamp(raw)
        .or_else(|| {
            let (date, time) = raw.split_once(' ').map_or((raw, None), |(d, t)| (d, Some(t)));
            interaction::parse_date_time(date, time)
        })
        .ok_or_else(|| NoteError::InvalidDate(raw.to_owned()))
}

/// Whole minutes from `m:ss` or a bare number. Seconds round up.
pub(crate) fn parse_minutes(length: &str) -> Option<i32> {
    let length = length.trim();
    match length.split_once(':') {
        Some((m, s)) => {
            let minutes: i32 = m.trim().parse().ok()?;
            let seconds: i32 = s.trim().parse().ok()?;
            Some(minutes + i32::from(seconds > 0))
        }
        None => length.parse().ok(),
    }
}

fn nonempty(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim).filter(|s| !s.is_empty()).map(str::to_owned)
}

/// The jsonb entry appended to `leads.manual_interactions`.
pub(crate) fn build_entry(note: &NewNote, employee: &str, id: &str, now: DateTime<Utc>) -> Result<Value, NoteError> {
    let content = validate_content(&note.content)?;
    let kind = validate_kind(note.kind.as_deref())?;
    let when = resolve_date(note.date.as_deref(), now)?;
    let direction = note.direction.as_deref().map_or(Direction::Out, Direction::parse_loose);
    let (date, time) = interaction::display_parts(Some(when));

    Ok(json!({
        "id": id,
        "raw_date": when.to_rfc3339(),
        "date": date,
        "time": time,
        "employee": employee,
        "direction": direction.as_str(),
        "kind": kind.as_str(),
        "length": nonempty(note.length.as_deref()),
        "content": content,
        "observation": nonempty(note.observation.as_deref()),
        "contact_id": note.contact_id,
        "created_at": now.to_rfc3339(),
    }))
}

/// Apply `patch` to the entry the timeline shows as `id`, returning the
/// updated entry. Entries stored without an id keep their positional id
/// from then on.
pub(crate) fn apply_patch(
    entries: &mut [Value],
    id: &str,
    patch: &NotePatch,
    employee: &str,
    now: DateTime<Utc>,
) -> Result<Value, NoteError> {
    let slot = entries
        .iter_mut()
        .enumerate()
        .find(|(index, e)| interaction::manual_id(e, *index) == id)
        .map(|(_, e)| e)
        .ok_or_else(|| NoteError::NotFound(id.to_owned()))?;
    let positional = interaction::stored_manual_id(slot).is_none();
    let entry = slot.as_object_mut().ok_or_else(|| NoteError::NotFound(id.to_owned()))?;
    if positional {
        entry.insert("id".to_owned(), Value::String(id.to_owned()));
    }

    let mut set = |key: &str, value: Value| {
        entry.insert(key.to_owned(), value);
    };
    if let Some(content) = patch.content.as_deref() {
        set("content", Value::String(validate_content(content)?));
    }
    if let Some(kind) = patch.kind.as_deref() {
        set("kind", Value::String(validate_kind(Some(kind))?.as_str().to_owned()));
    }
    if let Some(direction) = patch.direction.as_deref() {
        set("direction", Value::String(Direction::parse_loose(direction).as_str().to_owned()));
    }
    if let Some(observation) = patch.observation.as_deref() {
        set("observation", nonempty(Some(observation)).map_or(Value::Null, Value::String));
    }
    if let Some(length) = patch.length.as_deref() {
        set("length", nonempty(Some(length)).map_or(Value::Null, Value::String));
    }
    set("edited_by", Value::String(employee.to_owned()));
    set("edited_at", Value::String(now.to_rfc3339()));

    Ok(Value::Object(entry.clone()))
}

// =============================================================================
// OPERATIONS
// =============================================================================

/// Record a manual interaction on a lead.
///
/// # Errors
///
/// Validation errors, [`LeadError::NotFound`] for an unknown lead, or a
/// database error.
pub async fn add_note(state: &AppState, lead: LeadRef, note: &NewNote, employee: &str) -> Result<Interaction, NoteError> {
    let now = Utc::now();
    let created = match lead {
        LeadRef::New(lead_id) => {
            let id = format!("manual_{}", Uuid::new_v4().simple());
            let entry = build_entry(note, employee, &id, now)?;
            let result = sqlx::query(
                "UPDATE leads
                 SET manual_interactions = COALESCE(manual_interactions, '[]'::jsonb) || jsonb_build_array($2::jsonb)
                 WHERE id = $1",
            )
            .bind(lead_id)
            .bind(&entry)
            .execute(&state.pool)
            .await?;
            if result.rows_affected() == 0 {
                return Err(LeadError::NotFound(lead).into());
            }
            interaction::normalize_manual(&entry, 0).interaction
        }
        LeadRef::Legacy(legacy_id) => insert_legacy(state, legacy_id, note, employee, now).await?,
    };

    state.timeline_cache.invalidate(lead).await;
    tracing::info!(%lead, id = %created.id, %employee, "manual interaction added");
    Ok(created)
}

async fn insert_legacy(
    state: &AppState,
    legacy_id: i64,
    note: &NewNote,
    employee: &str,
    now: DateTime<Utc>,
) -> Result<Interaction, NoteError> {
    let content = validate_content(&note.content)?;
    let kind = validate_kind(note.kind.as_deref())?;
    let when = resolve_date(note.date.as_deref(), now)?;
    let direction = note.direction.as_deref().map_or(Direction::Out, Direction::parse_loose);
    let minutes = note.length.as_deref().and_then(parse_minutes);
    let observation = nonempty(note.observation.as_deref());
    let direction_code = match direction {
        Direction::In => "i",
        Direction::Out => "o",
    };

    let row = sqlx::query_as::<_, LegacyInteractionRow>(
        "INSERT INTO leads_leadinteractions
             (lead_id, contact_id, cdate, kind, direction, employee, minutes, content, description)
         SELECT $1, $2, $3, $4, $5, $6, $7, $8, $9
         WHERE EXISTS (SELECT 1 FROM leads_lead WHERE id = $1)
         RETURNING id, contact_id, cdate, kind, direction, employee, minutes, content, description",
    )
    .bind(legacy_id)
    .bind(note.contact_id)
    .bind(when)
    .bind(kind.legacy_code())
    .bind(direction_code)
    .bind(employee)
    .bind(minutes)
    .bind(&content)
    .bind(observation)
    .fetch_optional(&state.pool)
    .await?
    .ok_or(LeadError::NotFound(LeadRef::Legacy(legacy_id)))?;

    Ok(interaction::normalize_legacy(&row).interaction)
}

/// Edit a manual interaction on a new-schema lead.
///
/// # Errors
///
/// [`NoteError::NotEditable`] for legacy leads, [`NoteError::NotFound`] for
/// an unknown entry id, validation or database errors otherwise.
pub async fn edit_note(
    state: &AppState,
    lead: LeadRef,
    interaction_id: &str,
    patch: &NotePatch,
    employee: &str,
) -> Result<Interaction, NoteError> {
    let LeadRef::New(lead_id) = lead else {
        return Err(NoteError::NotEditable);
    };

    let mut tx = state.pool.begin().await?;
    let stored: Option<(Option<Value>,)> =
        sqlx::query_as("SELECT manual_interactions FROM leads WHERE id = $1 FOR UPDATE")
            .bind(lead_id)
            .fetch_optional(&mut *tx)
            .await?;
    let Some((stored,)) = stored else {
        return Err(LeadError::NotFound(lead).into());
    };

    let mut entries = lead::manual_entries(stored);
    let updated = apply_patch(&mut entries, interaction_id, patch, employee, Utc::now())?;

    sqlx::query("UPDATE leads SET manual_interactions = $2 WHERE id = $1")
        .bind(lead_id)
        .bind(Value::Array(entries))
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    state.timeline_cache.invalidate(lead).await;
    tracing::info!(%lead, id = interaction_id, %employee, "manual interaction edited");
    Ok(interaction::normalize_manual(&updated, 0).interaction)
}

#[cfg(test)]
#[path = "notes_test.rs"]
mod tests;
