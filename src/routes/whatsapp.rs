//! WhatsApp routes: send, media, thread listing and the Cloud API webhook.

use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::routes::employee::Employee;
use crate::routes::leads::parse_lead;
use crate::services::interaction::WhatsAppRow;
use crate::services::whatsapp::{self, SendMediaRequest, SendMessageRequest, WhatsAppThread};
use crate::services::whatsapp_webhook::{self, WebhookOutcome, WebhookPayload};
use crate::state::AppState;

const DEFAULT_MIME: &str = "application/octet-stream";

#[derive(Serialize)]
pub struct UploadResponse {
    pub media_id: String,
}

/// `hub.*` parameters of the subscription handshake.
#[derive(Debug, Default, Deserialize)]
pub struct VerifyQuery {
    #[serde(rename = "hub.mode", default)]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token", default)]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge", default)]
    pub challenge: Option<String>,
}

/// `GET /api/leads/{lead_id}/whatsapp` — thread, oldest first.
pub async fn list_messages(
    State(state): State<AppState>,
    Path(lead_id): Path<String>,
) -> Result<Json<WhatsAppThread>, ApiError> {
    let lead_ref = parse_lead(&lead_id)?;
    Ok(Json(whatsapp::list_messages(&state.pool, lead_ref).await?))
}

/// `POST /api/whatsapp/send-message` (and `/whatsapp/send`).
pub async fn send_message(
    State(state): State<AppState>,
    employee: Employee,
    Json(body): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<WhatsAppRow>), ApiError> {
    let row = whatsapp::send_message(&state, &body, employee.as_str()).await?;
    Ok((StatusCode::CREATED, Json(row)))
}

/// `POST /api/whatsapp/send-media`
pub async fn send_media(
    State(state): State<AppState>,
    employee: Employee,
    Json(body): Json<SendMediaRequest>,
) -> Result<(StatusCode, Json<WhatsAppRow>), ApiError> {
    let row = whatsapp::send_media(&state, &body, employee.as_str()).await?;
    Ok((StatusCode::CREATED, Json(row)))
}

/// `POST /api/whatsapp/upload-media` — multipart field `file`.
pub async fn upload_media(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("invalid multipart body: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or("upload").to_owned();
        let mime = field.content_type().unwrap_or(DEFAULT_MIME).to_owned();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::bad_request(format!("failed to read upload: {e}")))?;
        if bytes.is_empty() {
            return Err(ApiError::bad_request("uploaded file is empty"));
        }
        let media_id = whatsapp::upload_media(&state, bytes.to_vec(), &filename, &mime).await?;
        return Ok(Json(UploadResponse { media_id }));
    }
    Err(ApiError::bad_request("multipart field `file` is required"))
}

/// `GET /api/whatsapp/webhook` — echo `hub.challenge` for a valid token.
pub async fn verify_webhook(State(state): State<AppState>, Query(query): Query<VerifyQuery>) -> Response {
    let config = state.whatsapp.as_deref().map(whatsapp::WhatsAppClient::config);
    match whatsapp_webhook::verify_subscription(
        config,
        query.mode.as_deref(),
        query.verify_token.as_deref(),
        query.challenge.as_deref(),
    ) {
        Some(challenge) => (StatusCode::OK, challenge).into_response(),
        None => {
            tracing::warn!(mode = ?query.mode, "whatsapp webhook verification rejected");
            StatusCode::FORBIDDEN.into_response()
        }
    }
}

/// `POST /api/whatsapp/webhook` — delivery statuses and inbound messages.
pub async fn receive_webhook(
    State(state): State<AppState>,
    Json(payload): Json<WebhookPayload>,
) -> Result<Json<WebhookOutcome>, ApiError> {
    Ok(Json(whatsapp_webhook::apply_webhook(&state, &payload).await?))
}

#[cfg(test)]
#[path = "whatsapp_test.rs"]
mod tests;
