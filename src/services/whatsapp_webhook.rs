//! WhatsApp Cloud API webhook: delivery statuses and inbound messages.
//!
//! DESIGN
//! ======
//! Statuses only move forward (`pending → sent → delivered → read`, with
//! `failed` allowed from `pending`/`sent`). The guard lives in SQL
//! (`status = ANY($n)`) so out-of-order webhook deliveries are harmless.
//!
//! Inbound messages are attached to the first lead whose mobile or phone
//! shares the sender's last nine digits, new-schema leads first. Messages
//! with no matching lead are logged and dropped. Replays are absorbed by
//! the unique `whatsapp_message_id`.

use std::collections::HashSet;

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use sqlx::PgPool;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::lead::LeadRef;
use super::whatsapp::WhatsAppError;
use crate::config::WhatsAppConfig;
use crate::state::AppState;

const MATCH_DIGITS: usize = 9;

// =============================================================================
// PAYLOAD
// =============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub entry: Vec<WebhookEntry>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WebhookEntry {
    #[serde(default)]
    pub changes: Vec<WebhookChange>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WebhookChange {
    #[serde(default)]
    pub value: ChangeValue,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChangeValue {
    #[serde(default)]
    pub statuses: Vec<StatusUpdate>,
    #[serde(default)]
    pub messages: Vec<InboundMessage>,
    #[serde(default)]
    pub contacts: Vec<InboundContact>,
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdate {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub errors: Vec<StatusErrorDetail>,
}

#[derive(Debug, Deserialize)]
pub struct StatusErrorDetail {
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct InboundContact {
    #[serde(default)]
    pub wa_id: Option<String>,
    #[serde(default)]
    pub profile: Option<InboundProfile>,
}

#[derive(Debug, Deserialize)]
pub struct InboundProfile {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct InboundMessage {
    pub id: String,
    pub from: String,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub text: Option<InboundText>,
    #[serde(default)]
    pub image: Option<InboundMedia>,
    #[serde(default)]
    pub document: Option<InboundMedia>,
    #[serde(default)]
    pub audio: Option<InboundMedia>,
    #[serde(default)]
    pub video: Option<InboundMedia>,
}

#[derive(Debug, Deserialize)]
pub struct InboundText {
    pub body: String,
}

#[derive(Debug, Deserialize)]
pub struct InboundMedia {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
}

impl InboundMessage {
    fn media(&self) -> Option<&InboundMedia> {
        self.image
            .as_ref()
            .or(self.document.as_ref())
            .or(self.audio.as_ref())
            .or(self.video.as_ref())
    }

    /// Stored message text: the body for text, the caption for media.
    fn body(&self) -> Option<String> {
        self.text
            .as_ref()
            .map(|t| t.body.clone())
            .or_else(|| self.media().and_then(|m| m.caption.clone()))
            .filter(|b| !b.trim().is_empty())
    }

    fn media_url(&self) -> Option<String> {
        self.media().and_then(|m| m.id.as_ref()).map(|id| format!("media:{id}"))
    }

    fn sent_at(&self) -> DateTime<Utc> {
        self.timestamp
            .as_deref()
            .and_then(|t| t.parse::<i64>().ok())
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
            .unwrap_or_else(Utc::now)
    }
}

/// What one webhook delivery changed.
#[derive(Debug, Default, Clone, PartialEq, Eq, serde::Serialize)]
pub struct WebhookOutcome {
    pub statuses_applied: usize,
    pub messages_stored: usize,
    pub unmatched: usize,
}

// =============================================================================
// PURE HELPERS
// =============================================================================

/// Statuses that `new` may overwrite. Empty for unknown or initial states.
#[must_use]
pub fn superseded_statuses(new: &str) -> &'static [&'static str] {
    match new {
        "sent" => &["pending"],
        "delivered" => &["pending", "sent"],
        "read" => &["pending", "sent", "delivered"],
        "failed" => &["pending", "sent"],
        _ => &[],
    }
}

/// Last nine digits of a phone number, if it has that many.
#[must_use]
pub fn match_key(raw: &str) -> Option<String> {
    let digits: Vec<char> = raw.chars().filter(char::is_ascii_digit).collect();
    (digits.len() >= MATCH_DIGITS).then(|| digits[digits.len() - MATCH_DIGITS..].iter().collect())
}

fn failure_message(update: &StatusUpdate) -> Option<String> {
    update.errors.first().map(|e| {
        let text = e.message.as_deref().or(e.title.as_deref()).unwrap_or("delivery failed");
        match e.code {
            Some(code) => format!("{code}: {text}"),
            None => text.to_owned(),
        }
    })
}

/// Answer the subscription handshake: echo `challenge` when the token
/// matches the configured one.
#[must_use]
pub fn verify_subscription(
    config: Option<&WhatsAppConfig>,
    mode: Option<&str>,
    token: Option<&str>,
    challenge: Option<&str>,
) -> Option<String> {
    let expected = config?.verify_token.as_deref()?;
    (mode == Some("subscribe") && token == Some(expected))
        .then(|| challenge.map(str::to_owned))
        .flatten()
}

// =============================================================================
// APPLY
// =============================================================================

/// Apply a webhook delivery, invalidating every touched lead.
///
/// # Errors
///
/// Database errors only; unmatched messages and unknown ids are skipped.
pub async fn apply_webhook(state: &AppState, payload: &WebhookPayload) -> Result<WebhookOutcome, WhatsAppError> {
    let mut outcome = WebhookOutcome::default();
    let mut touched: HashSet<LeadRef> = HashSet::new();

    for value in payload.entry.iter().flat_map(|e| &e.changes).map(|c| &c.value) {
        for update in &value.statuses {
            if let Some(lead) = apply_status(&state.pool, update).await? {
                outcome.statuses_applied += 1;
                touched.insert(lead);
            }
        }
        for message in &value.messages {
            let sender = value
                .contacts
                .iter()
                .find(|c| c.wa_id.as_deref() == Some(message.from.as_str()))
                .and_then(|c| c.profile.as_ref())
                .and_then(|p| p.name.as_deref());
            match store_inbound(&state.pool, message, sender).await? {
                Some(lead) => {
                    outcome.messages_stored += 1;
                    touched.insert(lead);
                }
                None => outcome.unmatched += 1,
            }
        }
    }

    for lead in &touched {
        state.timeline_cache.invalidate(*lead).await;
    }
    info!(
        statuses = outcome.statuses_applied,
        inbound = outcome.messages_stored,
        unmatched = outcome.unmatched,
        "whatsapp webhook applied"
    );
    Ok(outcome)
}

async fn apply_status(pool: &PgPool, update: &StatusUpdate) -> Result<Option<LeadRef>, sqlx::Error> {
    let from = superseded_statuses(&update.status);
    if from.is_empty() {
        debug!(wamid = %update.id, status = %update.status, "ignoring status");
        return Ok(None);
    }
    let from: Vec<String> = from.iter().map(|s| (*s).to_owned()).collect();
    let row: Option<(Option<Uuid>, Option<i64>)> = sqlx::query_as(
        "UPDATE whatsapp_messages
         SET status = $2, error_message = COALESCE($4, error_message)
         WHERE whatsapp_message_id = $1 AND status = ANY($3)
         RETURNING lead_id, legacy_id",
    )
    .bind(&update.id)
    .bind(&update.status)
    .bind(&from)
    .bind(failure_message(update))
    .fetch_optional(pool)
    .await?;

    Ok(row.and_then(|(new, legacy)| new.map(LeadRef::New).or(legacy.map(LeadRef::Legacy))))
}

async fn find_lead_by_phone(pool: &PgPool, key: &str) -> Result<Option<LeadRef>, sqlx::Error> {
    const DIGITS: &str = "right(regexp_replace(COALESCE({col}, ''), '[^0-9]', '', 'g'), 9)";
    let mobile = DIGITS.replace("{col}", "mobile");
    let phone = DIGITS.replace("{col}", "phone");

    let new: Option<(Uuid,)> = sqlx::query_as(&format!(
        "SELECT id FROM leads WHERE {mobile} = $1 OR {phone} = $1 ORDER BY created_at DESC LIMIT 1"
    ))
    .bind(key)
    .fetch_optional(pool)
    .await?;
    if let Some((id,)) = new {
        return Ok(Some(LeadRef::New(id)));
    }

    let legacy: Option<(i64,)> = sqlx::query_as(&format!(
        "SELECT id FROM leads_lead WHERE {mobile} = $1 OR {phone} = $1 ORDER BY id DESC LIMIT 1"
    ))
    .bind(key)
    .fetch_optional(pool)
    .await?;
    Ok(legacy.map(|(id,)| LeadRef::Legacy(id)))
}

async fn store_inbound(
    pool: &PgPool,
    message: &InboundMessage,
    sender: Option<&str>,
) -> Result<Option<LeadRef>, sqlx::Error> {
    let Some(key) = match_key(&message.from) else {
        warn!(from = %message.from, "inbound whatsapp with unusable sender number");
        return Ok(None);
    };
    let Some(lead) = find_lead_by_phone(pool, &key).await? else {
        warn!(wamid = %message.id, "inbound whatsapp matched no lead");
        return Ok(None);
    };

    let kind = if message.kind.is_empty() { "text" } else { message.kind.as_str() };
    sqlx::query(
        "INSERT INTO whatsapp_messages
             (lead_id, legacy_id, phone_number, sender_name, direction, message, message_type,
              media_url, whatsapp_message_id, status, sent_at)
         VALUES ($1, $2, $3, $4, 'in', $5, $6, $7, $8, 'received', $9)
         ON CONFLICT (whatsapp_message_id) DO NOTHING",
    )
    .bind(lead.new_id())
    .bind(lead.legacy_id())
    .bind(&message.from)
    .bind(sender)
    .bind(message.body())
    .bind(kind)
    .bind(message.media_url())
    .bind(&message.id)
    .bind(message.sent_at())
    .execute(pool)
    .await?;

    Ok(Some(lead))
}

#[cfg(test)]
#[path = "whatsapp_webhook_test.rs"]
mod tests;
