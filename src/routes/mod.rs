//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! One Axum router serves the JSON API consumed by the CRM front end and the
//! CLI, plus the WhatsApp webhook. Every handler returns `ApiError` on
//! failure so the front end can toast `message` and branch on `code`.

pub mod employee;
pub mod leads;
pub mod mailbox;
pub mod whatsapp;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::{get, patch, post};
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/leads/{lead_id}", get(leads::get_lead))
        .route(
            "/api/leads/{lead_id}/interactions",
            get(leads::list_interactions).post(leads::add_interaction),
        )
        .route("/api/leads/{lead_id}/interactions/{interaction_id}", patch(leads::edit_interaction))
        .route("/api/leads/{lead_id}/whatsapp", get(whatsapp::list_messages))
        .route("/api/leads/{lead_id}/summary", post(leads::summarize))
        .route("/whatsapp/send", post(whatsapp::send_message))
        .route("/api/whatsapp/send-message", post(whatsapp::send_message))
        .route("/api/whatsapp/send-media", post(whatsapp::send_media))
        .route("/api/whatsapp/upload-media", post(whatsapp::upload_media))
        .route("/api/whatsapp/webhook", get(whatsapp::verify_webhook).post(whatsapp::receive_webhook))
        .route("/api/mailbox/send", post(mailbox::send))
        .route("/api/mailbox/sync", post(mailbox::sync))
        .route("/api/mailbox/status", get(mailbox::status))
        .route(
            "/api/mailbox/messages/{message_id}/attachments/{attachment_id}",
            get(mailbox::download_attachment),
        )
        .route("/healthz", get(healthz))
        .layer(cors)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}
