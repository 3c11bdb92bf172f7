//! Mailbox routes: send, sync, status and attachment download.

use axum::extract::{Path, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;

use crate::error::ApiError;
use crate::routes::employee::Employee;
use crate::services::lead::LeadRef;
use crate::services::mailbox::{self, MailboxStatus, SendEmailRequest, SentEmail, SyncResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SyncBody {
    pub lead_id: LeadRef,
}

/// `POST /api/mailbox/send`
pub async fn send(
    State(state): State<AppState>,
    employee: Employee,
    Json(body): Json<SendEmailRequest>,
) -> Result<Json<SentEmail>, ApiError> {
    Ok(Json(mailbox::send_email(&state, &body, employee.as_str()).await?))
}

/// `POST /api/mailbox/sync` — `{ "lead_id": ... }`.
pub async fn sync(State(state): State<AppState>, Json(body): Json<SyncBody>) -> Result<Json<SyncResult>, ApiError> {
    Ok(Json(mailbox::sync_lead(&state, body.lead_id).await?))
}

/// `GET /api/mailbox/status`
pub async fn status(State(state): State<AppState>) -> Json<MailboxStatus> {
    Json(mailbox::status(&state).await)
}

/// Quote a filename for `Content-Disposition`, dropping characters that
/// would break the header.
pub(crate) fn content_disposition(filename: &str) -> String {
    let safe: String = filename.chars().filter(|c| !matches!(c, '"' | '\\' | '\r' | '\n')).collect();
    format!("attachment; filename=\"{safe}\"")
}

/// `GET /api/mailbox/messages/{message_id}/attachments/{attachment_id}`
pub async fn download_attachment(
    State(state): State<AppState>,
    Path((message_id, attachment_id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let attachment = mailbox::download_attachment(&state, &message_id, &attachment_id).await?;
    Ok((
        [
            (CONTENT_TYPE, attachment.content_type.clone()),
            (CONTENT_DISPOSITION, content_disposition(&attachment.filename)),
        ],
        attachment.bytes,
    )
        .into_response())
}

#[cfg(test)]
#[path = "mailbox_test.rs"]
mod tests;
