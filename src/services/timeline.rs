//! Timeline service — cross-channel interaction aggregation for one lead.
//!
//! DESIGN
//! ======
//! `build_timeline` issues every source fetch concurrently through the
//! [`TimelineSource`] trait, normalizes each row into an [`Interaction`],
//! attributes contacts, then dedupes by id, drops undated entries and sorts
//! newest first. The result is cached by `TimelineCache`; "load more" pages
//! over the cached list and never re-queries.
//!
//! ERROR HANDLING
//! ==============
//! Only the lead lookup is fatal. Any other source that fails is logged and
//! contributes nothing, so a broken channel hides itself instead of hiding
//! the whole timeline.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgPool};
use tracing::{debug, warn};

use super::contacts;
use super::interaction::{
    self, CallLogRow, EmailRow, Interaction, LegacyInteractionRow, Normalized, WhatsAppRow,
};
use super::lead::{self, Contact, Lead, LeadError, LeadRef};
use super::templates::{self, WhatsAppTemplate};

// =============================================================================
// SOURCE TRAIT
// =============================================================================

/// Everything the aggregator reads. Implemented over Postgres in
/// production and by in-memory mocks in tests.
#[async_trait::async_trait]
pub trait TimelineSource: Send + Sync {
    async fn lead(&self, lead: LeadRef) -> Result<Lead, LeadError>;
    async fn contacts(&self, lead: LeadRef) -> Result<Vec<Contact>, LeadError>;
    async fn emails(&self, lead: LeadRef, limit: i64) -> Result<Vec<EmailRow>, sqlx::Error>;
    async fn whatsapp(&self, lead: LeadRef, limit: i64) -> Result<Vec<WhatsAppRow>, sqlx::Error>;
    async fn calls(&self, lead: LeadRef, limit: i64) -> Result<Vec<CallLogRow>, sqlx::Error>;
    async fn legacy_interactions(&self, legacy_id: i64, limit: i64) -> Result<Vec<LegacyInteractionRow>, sqlx::Error>;
    async fn templates(&self) -> Result<Vec<WhatsAppTemplate>, sqlx::Error>;
}

/// Postgres-backed source.
pub struct PgTimelineSource {
    pool: PgPool,
}

impl PgTimelineSource {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

pub(crate) const EMAIL_COLUMNS: &str =
    "message_id, contact_id, sender_name, sender_email, recipient_list, subject, body_preview, direction, sent_at";

pub(crate) const WHATSAPP_COLUMNS: &str = "id, contact_id, phone_number, sender_name, direction, message, message_type, \
     media_url, template_id, template_params, whatsapp_message_id, status, error_message, sent_at";

const CALL_COLUMNS: &str = "id, contact_id, cdate, ctime, direction, source, destination, duration, employee, status";

/// Run a per-lead query whose lead column differs by schema family.
/// `sql` contains a `{lead_col}` placeholder, `$1` is the lead key and `$2`
/// the row limit.
async fn fetch_for_lead<T>(
    pool: &PgPool,
    sql: &str,
    lead: LeadRef,
    new_col: &str,
    legacy_col: &str,
    limit: i64,
) -> Result<Vec<T>, sqlx::Error>
where
    T: for<'r> FromRow<'r, PgRow> + Send + Unpin,
{
    let column = if lead.is_legacy() { legacy_col } else { new_col };
    let sql = sql.replace("{lead_col}", column);
    let query = sqlx::query_as::<_, T>(&sql);
    let query = match lead {
        LeadRef::New(id) => query.bind(id),
        LeadRef::Legacy(id) => query.bind(id),
    };
    query.bind(limit).fetch_all(pool).await
}

#[async_trait::async_trait]
impl TimelineSource for PgTimelineSource {
    async fn lead(&self, lead: LeadRef) -> Result<Lead, LeadError> {
        lead::load_lead(&self.pool, lead).await
    }

    async fn contacts(&self, lead: LeadRef) -> Result<Vec<Contact>, LeadError> {
        lead::load_contacts(&self.pool, lead).await
    }

    async fn emails(&self, lead: LeadRef, limit: i64) -> Result<Vec<EmailRow>, sqlx::Error> {
        let sql = format!("SELECT {EMAIL_COLUMNS} FROM emails WHERE {{lead_col}} = $1 ORDER BY sent_at DESC LIMIT $2");
        fetch_for_lead(&self.pool, &sql, lead, "client_id", "legacy_id", limit).await
    }

    async fn whatsapp(&self, lead: LeadRef, limit: i64) -> Result<Vec<WhatsAppRow>, sqlx::Error> {
        let sql = format!(
            "SELECT {WHATSAPP_COLUMNS} FROM whatsapp_messages WHERE {{lead_col}} = $1 ORDER BY sent_at DESC LIMIT $2"
        );
        fetch_for_lead(&self.pool, &sql, lead, "lead_id", "legacy_id", limit).await
    }

    async fn calls(&self, lead: LeadRef, limit: i64) -> Result<Vec<CallLogRow>, sqlx::Error> {
        let sql = format!(
            "SELECT {CALL_COLUMNS} FROM call_logs WHERE {{lead_col}} = $1
             ORDER BY cdate DESC NULLS LAST, ctime DESC NULLS LAST LIMIT $2"
        );
        fetch_for_lead(&self.pool, &sql, lead, "client_id", "lead_id", limit).await
    }

    async fn legacy_interactions(&self, legacy_id: i64, limit: i64) -> Result<Vec<LegacyInteractionRow>, sqlx::Error> {
        sqlx::query_as::<_, LegacyInteractionRow>(
            "SELECT id, contact_id, cdate, kind, direction, employee, minutes, content, description
             FROM leads_leadinteractions WHERE lead_id = $1
             ORDER BY cdate DESC NULLS LAST LIMIT $2",
        )
        .bind(legacy_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }

    async fn templates(&self) -> Result<Vec<WhatsAppTemplate>, sqlx::Error> {
        templates::load_templates(&self.pool).await
    }
}

// =============================================================================
// TIMELINE
// =============================================================================

/// An aggregated, sorted timeline for one lead.
#[derive(Debug, Clone, Serialize)]
pub struct Timeline {
    pub lead: Lead,
    pub contacts: Vec<Contact>,
    pub items: Vec<Interaction>,
    pub built_at: DateTime<Utc>,
}

/// One "load more" window over a cached timeline.
#[derive(Debug, Clone, Serialize)]
pub struct TimelinePage {
    pub lead_id: LeadRef,
    pub items: Vec<Interaction>,
    pub total: usize,
    pub offset: usize,
    pub has_more: bool,
    pub next_offset: Option<usize>,
}

impl Timeline {
    /// Slice `[offset, offset + limit)`. An offset past the end yields an
    /// empty page.
    #[must_use]
    pub fn page(&self, offset: usize, limit: usize) -> TimelinePage {
        let total = self.items.len();
        let start = offset.min(total);
        let end = start.saturating_add(limit.max(1)).min(total);
        let has_more = end < total;
        TimelinePage {
            lead_id: self.lead.id,
            items: self.items[start..end].to_vec(),
            total,
            offset: start,
            has_more,
            next_offset: has_more.then_some(end),
        }
    }
}

fn or_empty<T>(result: Result<Vec<T>, impl std::fmt::Display>, lead: LeadRef, source: &'static str) -> Vec<T> {
    match result {
        Ok(rows) => rows,
        Err(e) => {
            warn!(%lead, source, error = %e, "timeline source failed; omitting");
            Vec::new()
        }
    }
}

/// Fetch, normalize, attribute, dedupe, filter and sort.
///
/// # Errors
///
/// Returns [`LeadError`] if the lead itself cannot be loaded.
pub async fn build_timeline(
    source: &dyn TimelineSource,
    lead_ref: LeadRef,
    batch_size: i64,
) -> Result<Timeline, LeadError> {
    let legacy = async {
        match lead_ref.legacy_id() {
            Some(id) => source.legacy_interactions(id, batch_size).await,
            None => Ok(Vec::new()),
        }
    };

    let (lead, contacts, emails, whatsapp, calls, legacy, templates) = futures::join!(
        source.lead(lead_ref),
        source.contacts(lead_ref),
        source.emails(lead_ref, batch_size),
        source.whatsapp(lead_ref, batch_size),
        source.calls(lead_ref, batch_size),
        legacy,
        source.templates(),
    );

    let lead = lead?;
    let contacts = or_empty(contacts, lead_ref, "contacts");
    let emails = or_empty(emails, lead_ref, "emails");
    let whatsapp = or_empty(whatsapp, lead_ref, "whatsapp");
    let calls = or_empty(calls, lead_ref, "call_logs");
    let legacy = or_empty(legacy, lead_ref, "legacy_interactions");
    let templates = or_empty(templates, lead_ref, "templates");

    let mut normalized: Vec<Normalized> = Vec::new();
    normalized.extend(
        lead.manual_interactions
            .iter()
            .enumerate()
            .map(|(idx, entry)| interaction::normalize_manual(entry, idx)),
    );
    normalized.extend(emails.iter().map(|row| interaction::normalize_email(row, &lead.name)));
    normalized.extend(
        whatsapp
            .iter()
            .map(|row| interaction::normalize_whatsapp(row, &lead.name, &templates)),
    );
    normalized.extend(calls.iter().map(interaction::normalize_call));
    normalized.extend(legacy.iter().map(interaction::normalize_legacy));

    let fetched = normalized.len();
    let items = merge(normalized, &contacts, &lead);
    debug!(lead = %lead_ref, fetched, kept = items.len(), "timeline built");

    Ok(Timeline { lead, contacts, items, built_at: Utc::now() })
}

/// Attribute contacts, dedupe by id (first wins), drop undated entries and
/// sort newest first. The sort is stable, so equal instants keep source order.
pub(crate) fn merge(normalized: Vec<Normalized>, contacts: &[Contact], lead: &Lead) -> Vec<Interaction> {
    let mut seen = HashSet::new();
    let mut items: Vec<Interaction> = normalized
        .into_iter()
        .filter(|n| n.interaction.raw_date.is_some())
        .filter(|n| seen.insert(n.interaction.id.clone()))
        .map(|n| {
            let mut interaction = n.interaction;
            interaction.contact = contacts::attribute(&n.hint, contacts, lead);
            interaction
        })
        .collect();
    items.sort_by(|a, b| b.raw_date.cmp(&a.raw_date));
    items
}

#[cfg(test)]
#[path = "timeline_test.rs"]
mod tests;
