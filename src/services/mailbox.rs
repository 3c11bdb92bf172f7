//! Mailbox service — email send, sync and attachments through Microsoft Graph.
//!
//! DESIGN
//! ======
//! One shared mailbox (`GRAPH_MAILBOX`) is driven with an app-only token
//! from the client-credentials flow. The token is cached behind a
//! `tokio::sync::Mutex` and refreshed 60 seconds before it expires. The
//! lock is held across the refresh call.
//!
//! Outgoing mail is stamped with a generated `internetMessageId` and stored
//! under that id; sync upserts on the same key.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sqlx::PgPool;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use super::lead::{self, LeadError, LeadRef};
use crate::config::GraphConfig;
use crate::error::ErrorCode;
use crate::state::AppState;

const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);
const GRAPH_SCOPE: &str = "https://graph.microsoft.com/.default";
const REQUEST_TIMEOUT_SECS: u64 = 30;
const SYNC_PAGE_SIZE: u32 = 50;
const MESSAGE_FIELDS: &str =
    "id,internetMessageId,subject,bodyPreview,from,toRecipients,ccRecipients,receivedDateTime,sentDateTime,hasAttachments";

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    #[error("mailbox is not configured")]
    NotConfigured,
    #[error("no recipients: pass `to` or store an email on the lead")]
    NoRecipients,
    #[error("invalid email address: {0}")]
    InvalidEmail(String),
    #[error("email subject is empty")]
    EmptySubject,
    #[error("invalid Graph id: {0}")]
    InvalidId(String),
    #[error("mailbox sign-in failed: {0}")]
    Auth(String),
    #[error("Graph API error {status}: {message}")]
    Api { status: u16, message: String },
    #[error("Graph request failed: {0}")]
    Request(String),
    #[error(transparent)]
    Lead(#[from] LeadError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl ErrorCode for MailboxError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotConfigured => "E_MAILBOX_NOT_CONFIGURED",
            Self::NoRecipients => "E_NO_RECIPIENTS",
            Self::InvalidEmail(_) => "E_INVALID_EMAIL",
            Self::EmptySubject => "E_EMPTY_SUBJECT",
            Self::InvalidId(_) => "E_INVALID_ID",
            Self::Auth(_) => "E_MAILBOX_AUTH",
            Self::Api { .. } => "E_GRAPH_API",
            Self::Request(_) => "E_GRAPH_REQUEST",
            Self::Lead(e) => e.error_code(),
            Self::Database(_) => "E_DATABASE",
        }
    }

    fn http_status(&self) -> StatusCode {
        match self {
            Self::NoRecipients | Self::InvalidEmail(_) | Self::EmptySubject | Self::InvalidId(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::NotConfigured => StatusCode::SERVICE_UNAVAILABLE,
            Self::Auth(_) | Self::Api { .. } | Self::Request(_) => StatusCode::BAD_GATEWAY,
            Self::Lead(e) => e.http_status(),
            Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

// =============================================================================
// ADDRESSES & BODIES
// =============================================================================

/// Lowercase and check for a single `@` with both sides non-empty.
#[must_use]
pub fn normalize_email(email: &str) -> Option<String> {
    let normalized = email.trim().to_ascii_lowercase();
    let (local, domain) = normalized.split_once('@')?;
    if local.is_empty() || domain.is_empty() || domain.contains('@') || normalized.contains(char::is_whitespace) {
        return None;
    }
    Some(normalized)
}

/// Explicit recipients when given, else the lead's stored address.
///
/// # Errors
///
/// [`MailboxError::InvalidEmail`] for a malformed explicit address and
/// [`MailboxError::NoRecipients`] when nothing usable remains.
pub fn resolve_recipients(explicit: &[String], lead_email: Option<&str>) -> Result<Vec<String>, MailboxError> {
    let explicit: Vec<&str> = explicit.iter().map(|s| s.trim()).filter(|s| !s.is_empty()).collect();
    let mut out: Vec<String> = Vec::new();
    if explicit.is_empty() {
        if let Some(addr) = lead_email.and_then(normalize_email) {
            out.push(addr);
        }
    } else {
        for raw in explicit {
            let addr = normalize_email(raw).ok_or_else(|| MailboxError::InvalidEmail(raw.to_owned()))?;
            if !out.contains(&addr) {
                out.push(addr);
            }
        }
    }
    if out.is_empty() {
        return Err(MailboxError::NoRecipients);
    }
    Ok(out)
}

/// Append the signature unless the body already carries it.
#[must_use]
pub fn append_signature(body: &str, signature: Option<&str>, html: bool) -> String {
    let Some(signature) = signature.map(str::trim).filter(|s| !s.is_empty()) else {
        return body.to_owned();
    };
    let rendered = if html { signature.replace('\n', "<br>") } else { signature.to_owned() };
    if body.contains(&rendered) {
        return body.to_owned();
    }
    if html {
        format!("{body}<br><br>{rendered}")
    } else {
        format!("{}\n\n--\n{rendered}", body.trim_end())
    }
}

fn recipients_json(addresses: &[String]) -> Vec<Value> {
    addresses.iter().map(|a| json!({ "emailAddress": { "address": a } })).collect()
}

pub(crate) fn send_mail_payload(
    internet_message_id: &str,
    subject: &str,
    body: &str,
    html: bool,
    to: &[String],
    cc: &[String],
) -> Value {
    json!({
        "message": {
            "subject": subject,
            "body": { "contentType": if html { "HTML" } else { "Text" }, "content": body },
            "toRecipients": recipients_json(to),
            "ccRecipients": recipients_json(cc),
            "internetMessageId": internet_message_id,
        },
        "saveToSentItems": true,
    })
}

fn preview(body: &str) -> String {
    const PREVIEW_CHARS: usize = 255;
    body.split_whitespace().collect::<Vec<_>>().join(" ").chars().take(PREVIEW_CHARS).collect()
}

// =============================================================================
// GRAPH TYPES
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphMessage {
    pub id: String,
    #[serde(default)]
    pub internet_message_id: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub body_preview: Option<String>,
    #[serde(default)]
    pub from: Option<GraphRecipient>,
    #[serde(default)]
    pub to_recipients: Vec<GraphRecipient>,
    #[serde(default)]
    pub cc_recipients: Vec<GraphRecipient>,
    #[serde(default)]
    pub received_date_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sent_date_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub has_attachments: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphRecipient {
    pub email_address: GraphAddress,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GraphAddress {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessagePage {
    #[serde(default)]
    value: Vec<GraphMessage>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AttachmentMeta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    content_type: Option<String>,
}

/// A downloaded attachment.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// One `emails` row to upsert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailRecord {
    pub message_id: String,
    pub sender_name: Option<String>,
    pub sender_email: Option<String>,
    pub recipient_list: String,
    pub subject: Option<String>,
    pub body_preview: Option<String>,
    pub direction: &'static str,
    pub sent_at: DateTime<Utc>,
    pub has_attachments: bool,
}

/// Map a Graph message to a row. Mail sent from the shared mailbox is
/// outgoing; everything else is incoming.
#[must_use]
pub fn record_from_message(message: &GraphMessage, mailbox: &str) -> EmailRecord {
    let sender = message.from.as_ref().map(|f| &f.email_address);
    let sender_email = sender.and_then(|a| a.address.as_deref()).and_then(normalize_email);
    let outgoing = sender_email.as_deref().is_some_and(|s| s.eq_ignore_ascii_case(mailbox.trim()));
    let recipient_list = message
        .to_recipients
        .iter()
        .chain(&message.cc_recipients)
        .filter_map(|r| r.email_address.address.as_deref())
        .collect::<Vec<_>>()
        .join(", ");

    EmailRecord {
        message_id: message.internet_message_id.clone().unwrap_or_else(|| message.id.clone()),
        sender_name: sender.and_then(|a| a.name.clone()),
        sender_email,
        recipient_list,
        subject: message.subject.clone(),
        body_preview: message.body_preview.clone(),
        direction: if outgoing { "out" } else { "in" },
        sent_at: message.sent_date_time.or(message.received_date_time).unwrap_or_else(Utc::now),
        has_attachments: message.has_attachments,
    }
}

/// Human-readable message from a Graph or login error body.
pub(crate) fn error_message(body: &str) -> String {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    parsed
        .as_ref()
        .and_then(|v| {
            v.pointer("/error/message")
                .or_else(|| v.get("error_description"))
                .and_then(Value::as_str)
        })
        .map_or_else(|| body.trim().to_owned(), str::to_owned)
}

fn classify_error(status: u16, body: &str) -> MailboxError {
    MailboxError::Api { status, message: error_message(body) }
}

/// A message or attachment id must stay a single path segment under the
/// shared mailbox.
///
/// # Errors
///
/// [`MailboxError::InvalidId`] for empty ids, dot segments, or ids carrying
/// a path separator.
pub fn graph_id(raw: &str) -> Result<&str, MailboxError> {
    let id = raw.trim();
    if id.is_empty() || id == "." || id == ".." || id.contains(['/', '\\']) {
        return Err(MailboxError::InvalidId(raw.to_owned()));
    }
    Ok(id)
}

/// One record per message, first occurrence wins.
#[must_use]
pub fn unique_records(messages: impl IntoIterator<Item = GraphMessage>, mailbox: &str) -> Vec<EmailRecord> {
    let mut seen = HashSet::new();
    messages
        .into_iter()
        .map(|m| record_from_message(&m, mailbox))
        .filter(|r| seen.insert(r.message_id.clone()))
        .collect()
}

// =============================================================================
// CLIENT
// =============================================================================

struct CachedToken {
    token: String,
    expires_at: Instant,
}

pub struct MailboxClient {
    http: reqwest::Client,
    config: GraphConfig,
    token: Mutex<Option<CachedToken>>,
}

impl MailboxClient {
    /// # Errors
    ///
    /// Returns [`MailboxError::Request`] if the HTTP client cannot be built.
    pub fn new(config: GraphConfig) -> Result<Self, MailboxError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| MailboxError::Request(e.to_string()))?;
        Ok(Self { http, config, token: Mutex::new(None) })
    }

    #[must_use]
    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    /// `{base}/users/{mailbox}/{segments..}`, each segment percent-encoded.
    fn mailbox_url(&self, segments: &[&str]) -> Result<reqwest::Url, MailboxError> {
        let mut url = reqwest::Url::parse(&self.config.base_url)
            .map_err(|e| MailboxError::Request(format!("invalid GRAPH_BASE_URL: {e}")))?;
        url.path_segments_mut()
            .map_err(|()| MailboxError::Request("GRAPH_BASE_URL cannot carry a path".into()))?
            .pop_if_empty()
            .push("users")
            .push(&self.config.mailbox)
            .extend(segments);
        Ok(url)
    }

    /// App token, refreshed when within 60s of expiry.
    ///
    /// # Errors
    ///
    /// [`MailboxError::Auth`] when the login endpoint rejects the credentials.
    pub async fn access_token(&self) -> Result<String, MailboxError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() + TOKEN_REFRESH_MARGIN < token.expires_at {
                return Ok(token.token.clone());
            }
        }

        let response = self
            .http
            .post(self.config.token_url())
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("scope", GRAPH_SCOPE),
            ])
            .send()
            .await
            .map_err(|e| MailboxError::Request(e.to_string()))?;
        let status = response.status().as_u16();
        let text = response.text().await.map_err(|e| MailboxError::Request(e.to_string()))?;
        if !(200..300).contains(&status) {
            return Err(MailboxError::Auth(error_message(&text)));
        }
        let parsed: TokenResponse = serde_json::from_str(&text).map_err(|e| MailboxError::Auth(e.to_string()))?;

        let lifetime = Duration::from_secs(parsed.expires_in.unwrap_or(3600));
        *cached = Some(CachedToken { token: parsed.access_token.clone(), expires_at: Instant::now() + lifetime });
        info!(expires_in = lifetime.as_secs(), "graph token refreshed");
        Ok(parsed.access_token)
    }

    async fn get(&self, url: reqwest::Url, query: &[(&str, String)]) -> Result<reqwest::Response, MailboxError> {
        let token = self.access_token().await?;
        let response = self
            .http
            .get(url)
            .bearer_auth(token)
            .query(query)
            .send()
            .await
            .map_err(|e| MailboxError::Request(e.to_string()))?;
        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_error(status, &body));
        }
        Ok(response)
    }

    /// # Errors
    ///
    /// Auth, transport or Graph errors.
    pub async fn send_mail(&self, payload: &Value) -> Result<(), MailboxError> {
        let token = self.access_token().await?;
        let response = self
            .http
            .post(self.mailbox_url(&["sendMail"])?)
            .bearer_auth(token)
            .json(payload)
            .send()
            .await
            .map_err(|e| MailboxError::Request(e.to_string()))?;
        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_error(status, &body));
        }
        Ok(())
    }

    /// Recent messages in which `address` participates.
    ///
    /// # Errors
    ///
    /// Auth, transport or Graph errors.
    pub async fn messages_with(&self, address: &str) -> Result<Vec<GraphMessage>, MailboxError> {
        let response = self
            .get(
                self.mailbox_url(&["messages"])?,
                &[
                    ("$search", format!("\"participants:{address}\"")),
                    ("$top", SYNC_PAGE_SIZE.to_string()),
                    ("$select", MESSAGE_FIELDS.to_owned()),
                ],
            )
            .await?;
        let page: MessagePage = response.json().await.map_err(|e| MailboxError::Request(e.to_string()))?;
        Ok(page.value)
    }

    /// # Errors
    ///
    /// Auth, transport or Graph errors.
    pub async fn attachment(&self, message_id: &str, attachment_id: &str) -> Result<Attachment, MailboxError> {
        let message_id = graph_id(message_id)?;
        let attachment_id = graph_id(attachment_id)?;
        let segments = ["messages", message_id, "attachments", attachment_id];
        let meta: AttachmentMeta = self
            .get(self.mailbox_url(&segments)?, &[("$select", "name,contentType".to_owned())])
            .await?
            .json()
            .await
            .map_err(|e| MailboxError::Request(e.to_string()))?;
        let bytes = self
            .get(self.mailbox_url(&["messages", message_id, "attachments", attachment_id, "$value"])?, &[])
            .await?
            .bytes()
            .await
            .map_err(|e| MailboxError::Request(e.to_string()))?;
        Ok(Attachment {
            filename: meta.name.unwrap_or_else(|| attachment_id.to_owned()),
            content_type: meta.content_type.unwrap_or_else(|| "application/octet-stream".to_owned()),
            bytes: bytes.to_vec(),
        })
    }
}

// =============================================================================
// OPERATIONS
// =============================================================================

/// Body of `POST /api/mailbox/send`.
#[derive(Debug, Clone, Deserialize)]
pub struct SendEmailRequest {
    pub lead_id: LeadRef,
    #[serde(default)]
    pub to: Vec<String>,
    #[serde(default)]
    pub cc: Vec<String>,
    pub subject: String,
    pub body: String,
    #[serde(default)]
    pub html: bool,
    #[serde(default)]
    pub contact_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SentEmail {
    pub message_id: String,
    pub recipients: Vec<String>,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncResult {
    pub lead_id: LeadRef,
    pub synced: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct MailboxStatus {
    pub configured: bool,
    pub mailbox: Option<String>,
    pub authenticated: bool,
    pub error: Option<String>,
}

fn client(state: &AppState) -> Result<&MailboxClient, MailboxError> {
    state.mailbox.as_deref().ok_or(MailboxError::NotConfigured)
}

/// Send an email to a lead and record it on the timeline.
///
/// # Errors
///
/// See [`MailboxError`]; nothing is stored when Graph rejects the send.
pub async fn send_email(state: &AppState, req: &SendEmailRequest, employee: &str) -> Result<SentEmail, MailboxError> {
    let mailbox = client(state)?;
    let subject = req.subject.trim();
    if subject.is_empty() {
        return Err(MailboxError::EmptySubject);
    }
    let record = lead::load_lead(&state.pool, req.lead_id).await?;
    let to = resolve_recipients(&req.to, record.email.as_deref())?;
    let cc = req
        .cc
        .iter()
        .filter(|c| !c.trim().is_empty())
        .map(|c| normalize_email(c).ok_or_else(|| MailboxError::InvalidEmail(c.trim().to_owned())))
        .collect::<Result<Vec<_>, _>>()?;

    let body = append_signature(&req.body, mailbox.config().signature.as_deref(), req.html);
    let message_id = format!("<{}@lexcrm>", Uuid::new_v4().simple());
    mailbox
        .send_mail(&send_mail_payload(&message_id, subject, &body, req.html, &to, &cc))
        .await?;

    let sent_at = Utc::now();
    let stored = EmailRecord {
        message_id: message_id.clone(),
        sender_name: Some(employee.to_owned()),
        sender_email: Some(mailbox.config().mailbox.clone()),
        recipient_list: to.iter().chain(&cc).cloned().collect::<Vec<_>>().join(", "),
        subject: Some(subject.to_owned()),
        body_preview: Some(preview(&req.body)),
        direction: "out",
        sent_at,
        has_attachments: false,
    };
    upsert_email(&state.pool, req.lead_id, req.contact_id, &stored).await?;
    state.timeline_cache.invalidate(req.lead_id).await;
    info!(lead = %req.lead_id, recipients = to.len(), %employee, "email sent");

    Ok(SentEmail { message_id, recipients: to, sent_at })
}

/// Pull recent mail to or from the lead's addresses into `emails`.
///
/// # Errors
///
/// See [`MailboxError`].
pub async fn sync_lead(state: &AppState, lead_ref: LeadRef) -> Result<SyncResult, MailboxError> {
    let mailbox = client(state)?;
    let record = lead::load_lead(&state.pool, lead_ref).await?;
    let contacts = lead::load_contacts(&state.pool, lead_ref).await?;

    let mut addresses: Vec<String> = record.email.as_deref().and_then(normalize_email).into_iter().collect();
    for addr in contacts.iter().filter_map(|c| c.email.as_deref()).filter_map(normalize_email) {
        if !addresses.contains(&addr) {
            addresses.push(addr);
        }
    }
    if addresses.is_empty() {
        return Err(MailboxError::NoRecipients);
    }

    let mut messages = Vec::new();
    for address in &addresses {
        messages.extend(mailbox.messages_with(address).await?);
    }
    let records = unique_records(messages, &mailbox.config().mailbox);
    for row in &records {
        upsert_email(&state.pool, lead_ref, None, row).await?;
    }
    let synced = records.len();

    if synced > 0 {
        state.timeline_cache.invalidate(lead_ref).await;
    }
    info!(lead = %lead_ref, addresses = addresses.len(), synced, "mailbox synced");
    Ok(SyncResult { lead_id: lead_ref, synced })
}

/// Whether Graph is configured and a token can be acquired.
pub async fn status(state: &AppState) -> MailboxStatus {
    let Some(mailbox) = state.mailbox.as_deref() else {
        return MailboxStatus { configured: false, mailbox: None, authenticated: false, error: None };
    };
    let (authenticated, error) = match mailbox.access_token().await {
        Ok(_) => (true, None),
        Err(e) => {
            warn!(error = %e, "graph token check failed");
            (false, Some(e.to_string()))
        }
    };
    MailboxStatus { configured: true, mailbox: Some(mailbox.config().mailbox.clone()), authenticated, error }
}

/// # Errors
///
/// See [`MailboxError`].
pub async fn download_attachment(
    state: &AppState,
    message_id: &str,
    attachment_id: &str,
) -> Result<Attachment, MailboxError> {
    client(state)?.attachment(message_id, attachment_id).await
}

async fn upsert_email(
    pool: &PgPool,
    lead: LeadRef,
    contact_id: Option<i64>,
    row: &EmailRecord,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO emails
             (message_id, client_id, legacy_id, contact_id, sender_name, sender_email, recipient_list,
              subject, body_preview, direction, sent_at, has_attachments)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
         ON CONFLICT (message_id) DO UPDATE SET
             subject = EXCLUDED.subject,
             body_preview = COALESCE(EXCLUDED.body_preview, emails.body_preview),
             has_attachments = EXCLUDED.has_attachments",
    )
    .bind(&row.message_id)
    .bind(lead.new_id())
    .bind(lead.legacy_id())
    .bind(contact_id)
    .bind(row.sender_name.as_deref())
    .bind(row.sender_email.as_deref())
    .bind(&row.recipient_list)
    .bind(row.subject.as_deref())
    .bind(row.body_preview.as_deref())
    .bind(row.direction)
    .bind(row.sent_at)
    .bind(row.has_attachments)
    .execute(pool)
    .await?;
    Ok(())
}

#[cfg(test)]
#[path = "mailbox_test.rs"]
mod tests;
