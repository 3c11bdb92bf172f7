//! In-process stand-in for the WhatsApp Cloud API, served on a local port.
//!
//! Sends to [`REENGAGE_RECIPIENT`] fail with provider error 131047; any other
//! recipient gets `wamid.<n>`. Uploads return `media-<n>` and record the
//! file they received.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::Router;
use axum::extract::{Multipart, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::post;
use serde_json::{Value, json};

use super::whatsapp::WhatsAppClient;
use crate::config::WhatsAppConfig;
use crate::state::test_helpers;

pub const PHONE_NUMBER_ID: &str = "1001";
pub const ACCESS_TOKEN: &str = "wa-token";
pub const REENGAGE_RECIPIENT: &str = "972500000000";

/// A file the stub received on `/media`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    pub filename: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

#[derive(Clone, Default)]
pub struct CloudApi {
    counter: Arc<AtomicUsize>,
    sent: Arc<Mutex<Vec<Value>>>,
    uploads: Arc<Mutex<Vec<Upload>>>,
}

impl CloudApi {
    pub fn sent(&self) -> Vec<Value> {
        self.sent.lock().unwrap().clone()
    }

    pub fn uploads(&self) -> Vec<Upload> {
        self.uploads.lock().unwrap().clone()
    }

    fn next(&self) -> usize {
        self.counter.fetch_add(1, Ordering::SeqCst) + 1
    }
}

fn unauthorized(headers: &HeaderMap, phone_number_id: &str) -> Option<Response> {
    let bearer = format!("Bearer {ACCESS_TOKEN}");
    let ok = phone_number_id == PHONE_NUMBER_ID
        && headers.get("authorization").and_then(|v| v.to_str().ok()) == Some(bearer.as_str());
    (!ok).then(|| {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": { "code": 190, "message": "Invalid OAuth access token" } })),
        )
            .into_response()
    })
}

async fn messages(
    State(api): State<CloudApi>,
    Path(phone_number_id): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> Response {
    if let Some(rejected) = unauthorized(&headers, &phone_number_id) {
        return rejected;
    }
    if payload["to"] == REENGAGE_RECIPIENT {
        let error = json!({ "error": {
            "code": 131_047,
            "message": "Re-engagement message",
            "error_data": { "details": "Message failed to send because more than 24 hours have passed" },
        }});
        return (StatusCode::BAD_REQUEST, Json(error)).into_response();
    }
    let wamid = format!("wamid.{}", api.next());
    api.sent.lock().unwrap().push(payload);
    Json(json!({ "messaging_product": "whatsapp", "messages": [{ "id": wamid }] })).into_response()
}

async fn media(
    State(api): State<CloudApi>,
    Path(phone_number_id): Path<String>,
    headers: HeaderMap,
    mut form: Multipart,
) -> Response {
    if let Some(rejected) = unauthorized(&headers, &phone_number_id) {
        return rejected;
    }
    let mut product = None;
    let mut upload = None;
    while let Ok(Some(field)) = form.next_field().await {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("messaging_product") => product = field.text().await.ok(),
            Some("file") => {
                let filename = field.file_name().unwrap_or_default().to_owned();
                let mime = field.content_type().unwrap_or_default().to_owned();
                let bytes = field.bytes().await.map(|b| b.to_vec()).unwrap_or_default();
                upload = Some(Upload { filename, mime, bytes });
            }
            _ => {}
        }
    }
    match (product.as_deref(), upload) {
        (Some("whatsapp"), Some(upload)) => {
            api.uploads.lock().unwrap().push(upload);
            Json(json!({ "id": format!("media-{}", api.next()) })).into_response()
        }
        _ => (StatusCode::BAD_REQUEST, Json(json!({ "error": { "code": 100, "message": "Invalid parameter" } })))
            .into_response(),
    }
}

/// Start the stub; returns it with a client pointed at it.
pub async fn spawn() -> (CloudApi, WhatsAppClient) {
    let api = CloudApi::default();
    let router = Router::new()
        .route("/v19.0/{phone_number_id}/messages", post(messages))
        .route("/v19.0/{phone_number_id}/media", post(media))
        .with_state(api.clone());
    let base = test_helpers::spawn_stub(router).await;
    let client = WhatsAppClient::new(WhatsAppConfig {
        access_token: ACCESS_TOKEN.into(),
        phone_number_id: PHONE_NUMBER_ID.into(),
        api_base_url: base,
        api_version: "v19.0".into(),
        default_country_code: "972".into(),
        verify_token: None,
    })
    .unwrap();
    (api, client)
}
