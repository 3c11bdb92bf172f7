//! WhatsApp service — outbound messages through the WhatsApp Cloud API.
//!
//! DESIGN
//! ======
//! Sends are fire-once: the provider call either succeeds, in which case a
//! `pending` row is inserted with the provider message id and the lead's
//! timeline cache is invalidated, or fails and nothing is stored. Delivery
//! progress (`sent`, `delivered`, `read`, `failed`) arrives later through
//! the status webhook (`whatsapp_webhook`).
//!
//! Payload building, phone normalization and provider error classification
//! are pure functions; only [`WhatsAppClient`] does I/O.

use std::time::Duration;

use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sqlx::PgPool;
use tracing::{info, warn};

use super::lead::{self, Lead, LeadError, LeadRef};
use super::templates;
use super::timeline::WHATSAPP_COLUMNS;
use super::interaction::WhatsAppRow;
use crate::config::WhatsAppConfig;
use crate::error::ErrorCode;
use crate::state::AppState;

const REENGAGEMENT_ERROR_CODE: i64 = 131_047;
const MIN_PHONE_DIGITS: usize = 9;
const MAX_PHONE_DIGITS: usize = 15;
const REQUEST_TIMEOUT_SECS: u64 = 30;

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum WhatsAppError {
    #[error("WhatsApp is not configured")]
    NotConfigured,
    #[error("lead has no phone number")]
    MissingPhone,
    #[error("invalid phone number: {0}")]
    InvalidPhone(String),
    #[error("message has no text or template")]
    EmptyMessage,
    #[error("unsupported media type: {0}")]
    InvalidMediaType(String),
    #[error("media message needs a media_id or link")]
    MissingMedia,
    #[error("more than 24 hours since the client's last message; send an approved template instead ({0})")]
    ReengagementRequired(String),
    #[error("WhatsApp API error {status}: {message}")]
    Api { status: u16, message: String },
    #[error("WhatsApp request failed: {0}")]
    Request(String),
    #[error(transparent)]
    Lead(#[from] LeadError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl ErrorCode for WhatsAppError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotConfigured => "E_WHATSAPP_NOT_CONFIGURED",
            Self::MissingPhone => "E_MISSING_PHONE",
            Self::InvalidPhone(_) => "E_INVALID_PHONE",
            Self::EmptyMessage => "E_EMPTY_MESSAGE",
            Self::InvalidMediaType(_) => "E_INVALID_MEDIA_TYPE",
            Self::MissingMedia => "E_MISSING_MEDIA",
            Self::ReengagementRequired(_) => "E_REENGAGEMENT_REQUIRED",
            Self::Api { .. } => "E_WHATSAPP_API",
            Self::Request(_) => "E_WHATSAPP_REQUEST",
            Self::Lead(e) => e.error_code(),
            Self::Database(_) => "E_DATABASE",
        }
    }

    fn http_status(&self) -> StatusCode {
        match self {
            Self::MissingPhone
            | Self::InvalidPhone(_)
            | Self::EmptyMessage
            | Self::InvalidMediaType(_)
            | Self::MissingMedia => StatusCode::BAD_REQUEST,
            Self::ReengagementRequired(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::NotConfigured => StatusCode::SERVICE_UNAVAILABLE,
            Self::Api { .. } | Self::Request(_) => StatusCode::BAD_GATEWAY,
            Self::Lead(e) => e.http_status(),
            Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Map a non-2xx Cloud API response to an error.
pub(crate) fn classify_error(status: u16, body: &str) -> WhatsAppError {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let error = parsed.as_ref().and_then(|v| v.get("error"));
    let code = error.and_then(|e| e.get("code")).and_then(Value::as_i64);
    let message = error
        .and_then(|e| {
            e.get("error_data")
                .and_then(|d| d.get("details"))
                .or_else(|| e.get("message"))
        })
        .and_then(Value::as_str)
        .map_or_else(|| body.trim().to_owned(), str::to_owned);

    let lowered = message.to_ascii_lowercase();
    if code == Some(REENGAGEMENT_ERROR_CODE) || lowered.contains("24 hour") || lowered.contains("re-engagement") {
        return WhatsAppError::ReengagementRequired(message);
    }
    WhatsAppError::Api { status, message }
}

// =============================================================================
// PHONE NUMBERS
// =============================================================================

/// Reduce a number to international digits without `+`. A trunk `0` is
/// replaced by `country_code`.
///
/// # Errors
///
/// [`WhatsAppError::InvalidPhone`] outside 9–15 digits.
pub fn normalize_recipient(raw: &str, country_code: &str) -> Result<String, WhatsAppError> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    let digits = if let Some(rest) = digits.strip_prefix("00") {
        rest.to_owned()
    } else if let Some(rest) = digits.strip_prefix('0') {
        format!("{country_code}{rest}")
    } else {
        digits
    };
    if !(MIN_PHONE_DIGITS..=MAX_PHONE_DIGITS).contains(&digits.len()) {
        return Err(WhatsAppError::InvalidPhone(raw.trim().to_owned()));
    }
    Ok(digits)
}

// =============================================================================
// PAYLOADS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Image,
    Document,
    Audio,
    Video,
}

impl MediaType {
    /// # Errors
    ///
    /// [`WhatsAppError::InvalidMediaType`] for anything else.
    pub fn parse(raw: &str) -> Result<Self, WhatsAppError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "image" => Ok(Self::Image),
            "document" => Ok(Self::Document),
            "audio" => Ok(Self::Audio),
            "video" => Ok(Self::Video),
            other => Err(WhatsAppError::InvalidMediaType(other.to_owned())),
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Document => "document",
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }
}

/// An approved template to send.
#[derive(Debug, Clone, Deserialize)]
pub struct TemplateSend {
    pub name: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub params: Vec<String>,
}

pub(crate) fn text_payload(to: &str, body: &str) -> Value {
    json!({
        "messaging_product": "whatsapp",
        "recipient_type": "individual",
        "to": to,
        "type": "text",
        "text": { "preview_url": false, "body": body },
    })
}

pub(crate) fn template_payload(to: &str, name: &str, language: &str, params: &[String]) -> Value {
    let mut template = json!({ "name": name, "language": { "code": language } });
    if !params.is_empty() {
        let parameters: Vec<Value> = params.iter().map(|p| json!({ "type": "text", "text": p })).collect();
        template["components"] = json!([{ "type": "body", "parameters": parameters }]);
    }
    json!({
        "messaging_product": "whatsapp",
        "to": to,
        "type": "template",
        "template": template,
    })
}

/// Media by uploaded id or public link. Audio carries no caption; only
/// documents carry a filename.
pub(crate) fn media_payload(
    to: &str,
    media_type: MediaType,
    media_id: Option<&str>,
    link: Option<&str>,
    caption: Option<&str>,
    filename: Option<&str>,
) -> Result<Value, WhatsAppError> {
    let mut object = serde_json::Map::new();
    match (media_id.filter(|s| !s.is_empty()), link.filter(|s| !s.is_empty())) {
        (Some(id), _) => object.insert("id".into(), json!(id)),
        (None, Some(link)) => object.insert("link".into(), json!(link)),
        (None, None) => return Err(WhatsAppError::MissingMedia),
    };
    if let Some(caption) = caption.filter(|c| !c.trim().is_empty()) {
        if media_type != MediaType::Audio {
            object.insert("caption".into(), json!(caption));
        }
    }
    if let Some(filename) = filename.filter(|f| !f.trim().is_empty()) {
        if media_type == MediaType::Document {
            object.insert("filename".into(), json!(filename));
        }
    }
    let mut payload = json!({
        "messaging_product": "whatsapp",
        "to": to,
        "type": media_type.as_str(),
    });
    payload[media_type.as_str()] = Value::Object(object);
    Ok(payload)
}

/// Provider message id from a successful send response.
pub(crate) fn sent_message_id(body: &Value) -> Option<String> {
    body.get("messages")
        .and_then(Value::as_array)
        .and_then(|m| m.first())
        .and_then(|m| m.get("id"))
        .and_then(Value::as_str)
        .map(str::to_owned)
}

// =============================================================================
// CLIENT
// =============================================================================

pub struct WhatsAppClient {
    http: reqwest::Client,
    config: WhatsAppConfig,
}

impl WhatsAppClient {
    /// # Errors
    ///
    /// Returns [`WhatsAppError::Request`] if the HTTP client cannot be built.
    pub fn new(config: WhatsAppConfig) -> Result<Self, WhatsAppError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| WhatsAppError::Request(e.to_string()))?;
        Ok(Self { http, config })
    }

    #[must_use]
    pub fn config(&self) -> &WhatsAppConfig {
        &self.config
    }

    /// POST a message payload; returns the provider message id.
    ///
    /// # Errors
    ///
    /// Transport failures, classified provider errors, or a response
    /// without a message id.
    pub async fn send(&self, payload: &Value) -> Result<String, WhatsAppError> {
        let url = format!("{}/messages", self.config.phone_endpoint());
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.config.access_token)
            .json(payload)
            .send()
            .await
            .map_err(|e| WhatsAppError::Request(e.to_string()))?;
        let body = read_success(response).await?;
        sent_message_id(&body).ok_or_else(|| WhatsAppError::Api {
            status: 200,
            message: "response carried no message id".into(),
        })
    }

    /// Upload bytes to the media endpoint; returns the media id.
    ///
    /// # Errors
    ///
    /// Transport failures or classified provider errors.
    pub async fn upload_media(&self, bytes: Vec<u8>, filename: &str, mime: &str) -> Result<String, WhatsAppError> {
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(filename.to_owned())
            .mime_str(mime)
            .map_err(|e| WhatsAppError::Request(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .text("messaging_product", "whatsapp")
            .text("type", mime.to_owned())
            .part("file", part);
        let response = self
            .http
            .post(format!("{}/media", self.config.phone_endpoint()))
            .bearer_auth(&self.config.access_token)
            .multipart(form)
            .send()
            .await
            .map_err(|e| WhatsAppError::Request(e.to_string()))?;
        let body = read_success(response).await?;
        body.get("id")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| WhatsAppError::Api { status: 200, message: "upload response carried no id".into() })
    }
}

async fn read_success(response: reqwest::Response) -> Result<Value, WhatsAppError> {
    let status = response.status().as_u16();
    let text = response
        .text()
        .await
        .map_err(|e| WhatsAppError::Request(e.to_string()))?;
    if !(200..300).contains(&status) {
        return Err(classify_error(status, &text));
    }
    serde_json::from_str(&text).map_err(|e| WhatsAppError::Api { status, message: e.to_string() })
}

// =============================================================================
// REQUESTS
// =============================================================================

/// Body of `POST /api/whatsapp/send-message`.
#[derive(Debug, Clone, Deserialize)]
pub struct SendMessageRequest {
    pub lead_id: LeadRef,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub template: Option<TemplateSend>,
    #[serde(default)]
    pub contact_id: Option<i64>,
}

/// Body of `POST /api/whatsapp/send-media`.
#[derive(Debug, Clone, Deserialize)]
pub struct SendMediaRequest {
    pub lead_id: LeadRef,
    #[serde(default)]
    pub phone: Option<String>,
    pub media_type: String,
    #[serde(default)]
    pub media_id: Option<String>,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub contact_id: Option<i64>,
}

/// A lead's WhatsApp thread, oldest first.
#[derive(Debug, Clone, Serialize)]
pub struct WhatsAppThread {
    pub lead_id: LeadRef,
    pub messages: Vec<WhatsAppRow>,
    pub has_pending: bool,
}

/// What gets stored for an accepted outbound message.
struct Outgoing<'a> {
    lead: LeadRef,
    contact_id: Option<i64>,
    phone: &'a str,
    employee: &'a str,
    message: Option<String>,
    message_type: &'a str,
    media_url: Option<String>,
    template_id: Option<i64>,
    template_params: Option<Value>,
    provider_id: String,
}

fn client(state: &AppState) -> Result<&WhatsAppClient, WhatsAppError> {
    state.whatsapp.as_deref().ok_or(WhatsAppError::NotConfigured)
}

/// The lead's stored number (mobile, then phone), normalized.
pub(crate) fn lead_recipient(record: &Lead, country_code: &str) -> Result<String, WhatsAppError> {
    let raw = record.whatsapp_number().ok_or(WhatsAppError::MissingPhone)?;
    normalize_recipient(raw, country_code)
}

/// Explicit phone, else the lead's stored number.
async fn resolve_phone(
    state: &AppState,
    wa: &WhatsAppClient,
    lead: LeadRef,
    explicit: Option<&str>,
) -> Result<String, WhatsAppError> {
    let country_code = &wa.config().default_country_code;
    match explicit.map(str::trim).filter(|p| !p.is_empty()) {
        Some(phone) => normalize_recipient(phone, country_code),
        None => lead_recipient(&lead::load_lead(&state.pool, lead).await?, country_code),
    }
}

// =============================================================================
// OPERATIONS
// =============================================================================

/// Send a text or template message to a lead.
///
/// # Errors
///
/// See [`WhatsAppError`]; nothing is stored when the provider rejects the send.
pub async fn send_message(
    state: &AppState,
    req: &SendMessageRequest,
    employee: &str,
) -> Result<WhatsAppRow, WhatsAppError> {
    let wa = client(state)?;
    let text = req.message.as_deref().map(str::trim).filter(|m| !m.is_empty());
    if text.is_none() && req.template.is_none() {
        return Err(WhatsAppError::EmptyMessage);
    }
    let to = resolve_phone(state, wa, req.lead_id, req.phone.as_deref()).await?;

    let outgoing = if let Some(template) = &req.template {
        let known = templates::load_templates(&state.pool).await.unwrap_or_else(|e| {
            warn!(error = %e, "template lookup failed; sending by name only");
            Vec::new()
        });
        let matched = templates::find_by_name(&template.name, &known);
        let language = template
            .language
            .clone()
            .or_else(|| matched.map(|t| t.language.clone()))
            .unwrap_or_else(|| "he".to_owned());
        let payload = template_payload(&to, &template.name, &language, &template.params);
        let provider_id = wa.send(&payload).await?;
        Outgoing {
            lead: req.lead_id,
            contact_id: req.contact_id,
            phone: &to,
            employee,
            message: Some(format!("[Template: {}]", template.name)),
            message_type: "template",
            media_url: None,
            template_id: matched.map(|t| t.id),
            template_params: Some(json!(template.params)),
            provider_id,
        }
    } else {
        let body = text.unwrap_or_default();
        let provider_id = wa.send(&text_payload(&to, body)).await?;
        Outgoing {
            lead: req.lead_id,
            contact_id: req.contact_id,
            phone: &to,
            employee,
            message: Some(body.to_owned()),
            message_type: "text",
            media_url: None,
            template_id: None,
            template_params: None,
            provider_id,
        }
    };

    let row = insert_outgoing(&state.pool, &outgoing).await?;
    state.timeline_cache.invalidate(req.lead_id).await;
    info!(lead = %req.lead_id, wamid = %outgoing.provider_id, %employee, kind = outgoing.message_type, "whatsapp sent");
    Ok(row)
}

/// Send an image, document, audio or video message.
///
/// # Errors
///
/// See [`WhatsAppError`].
pub async fn send_media(state: &AppState, req: &SendMediaRequest, employee: &str) -> Result<WhatsAppRow, WhatsAppError> {
    let wa = client(state)?;
    let media_type = MediaType::parse(&req.media_type)?;
    let to = resolve_phone(state, wa, req.lead_id, req.phone.as_deref()).await?;
    let payload = media_payload(
        &to,
        media_type,
        req.media_id.as_deref(),
        req.link.as_deref(),
        req.caption.as_deref(),
        req.filename.as_deref(),
    )?;
    let provider_id = wa.send(&payload).await?;

    let media_url = req
        .link
        .clone()
        .filter(|l| !l.is_empty())
        .or_else(|| req.media_id.as_ref().map(|id| format!("media:{id}")));
    let outgoing = Outgoing {
        lead: req.lead_id,
        contact_id: req.contact_id,
        phone: &to,
        employee,
        message: req.caption.clone().filter(|c| !c.trim().is_empty()),
        message_type: media_type.as_str(),
        media_url,
        template_id: None,
        template_params: None,
        provider_id,
    };
    let row = insert_outgoing(&state.pool, &outgoing).await?;
    state.timeline_cache.invalidate(req.lead_id).await;
    info!(lead = %req.lead_id, wamid = %outgoing.provider_id, %employee, kind = media_type.as_str(), "whatsapp media sent");
    Ok(row)
}

/// Forward an uploaded file to the media endpoint.
///
/// # Errors
///
/// [`WhatsAppError::NotConfigured`] or provider errors.
pub async fn upload_media(state: &AppState, bytes: Vec<u8>, filename: &str, mime: &str) -> Result<String, WhatsAppError> {
    let wa = client(state)?;
    let media_id = wa.upload_media(bytes, filename, mime).await?;
    info!(%media_id, filename, mime, "whatsapp media uploaded");
    Ok(media_id)
}

async fn insert_outgoing(pool: &PgPool, out: &Outgoing<'_>) -> Result<WhatsAppRow, sqlx::Error> {
    let sql = format!(
        "INSERT INTO whatsapp_messages
             (lead_id, legacy_id, contact_id, phone_number, sender_name, direction, message,
              message_type, media_url, template_id, template_params, whatsapp_message_id, status, sent_at)
         VALUES ($1, $2, $3, $4, $5, 'out', $6, $7, $8, $9, $10, $11, 'pending', now())
         RETURNING {WHATSAPP_COLUMNS}"
    );
    sqlx::query_as::<_, WhatsAppRow>(&sql)
        .bind(out.lead.new_id())
        .bind(out.lead.legacy_id())
        .bind(out.contact_id)
        .bind(out.phone)
        .bind(out.employee)
        .bind(out.message.as_deref())
        .bind(out.message_type)
        .bind(out.media_url.as_deref())
        .bind(out.template_id)
        .bind(out.template_params.as_ref())
        .bind(&out.provider_id)
        .fetch_one(pool)
        .await
}

/// All WhatsApp messages for a lead, oldest first, with a pending flag the
/// client uses to decide whether to keep polling.
///
/// # Errors
///
/// [`LeadError::NotFound`] for an unknown lead, or a database error.
pub async fn list_messages(pool: &PgPool, lead: LeadRef) -> Result<WhatsAppThread, WhatsAppError> {
    lead::load_lead(pool, lead).await?;
    let column = if lead.is_legacy() { "legacy_id" } else { "lead_id" };
    let sql = format!("SELECT {WHATSAPP_COLUMNS} FROM whatsapp_messages WHERE {column} = $1 ORDER BY sent_at ASC, id ASC");
    let query = sqlx::query_as::<_, WhatsAppRow>(&sql);
    let messages = match lead {
        LeadRef::New(id) => query.bind(id).fetch_all(pool).await?,
        LeadRef::Legacy(id) => query.bind(id).fetch_all(pool).await?,
    };
    let has_pending = messages.iter().any(|m| m.status == "pending");
    Ok(WhatsAppThread { lead_id: lead, messages, has_pending })
}

#[cfg(test)]
#[path = "whatsapp_test.rs"]
mod tests;
