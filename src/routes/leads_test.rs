use std::sync::Arc;

use axum::body::{Body, to_bytes};
use axum::http::Request;
use serde_json::Value;
use tower::ServiceExt;

use super::*;
use crate::services::mock_source::{self, MockSource, at};
use crate::state::test_helpers;

fn lead_ref() -> LeadRef {
    LeadRef::Legacy(77)
}

fn source() -> MockSource {
    let mut source = MockSource::with_lead(mock_source::lead(lead_ref(), "Dana Levi"));
    source.emails = (0..5)
        .map(|i| mock_source::email_row(&format!("m{i}"), "incoming", at(2024, 3, 1 + i, 9, 0)))
        .collect();
    source
}

async fn get_json(state: AppState, uri: &str) -> (StatusCode, Value) {
    let response = crate::routes::app(state)
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

#[test]
fn page_limit_defaults_and_caps() {
    assert_eq!(page_limit(None, 20, 200), 20);
    assert_eq!(page_limit(Some(50), 20, 200), 50);
    assert_eq!(page_limit(Some(5000), 20, 200), 200);
    assert_eq!(page_limit(Some(0), 20, 200), 1);
}

#[test]
fn parse_lead_maps_to_bad_request() {
    assert_eq!(parse_lead("legacy_12").unwrap(), LeadRef::Legacy(12));
    let err = parse_lead("not-a-lead").unwrap_err();
    assert_eq!(err.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn get_lead_returns_record_and_contacts() {
    let state = test_helpers::test_app_state_with_source(Arc::new(source()));
    let (status, body) = get_json(state, "/api/leads/legacy_77").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["lead"]["id"], "legacy_77");
    assert_eq!(body["lead"]["name"], "Dana Levi");
    assert!(body["contacts"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn unknown_lead_is_404_with_error_body() {
    let state = test_helpers::test_app_state_with_source(Arc::new(MockSource::default()));
    let (status, body) = get_json(state, "/api/leads/legacy_1/interactions").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "E_LEAD_NOT_FOUND");
    assert_eq!(body["retryable"], false);
}

#[tokio::test]
async fn interactions_are_paged_newest_first() {
    let state = test_helpers::test_app_state_with_source(Arc::new(source()));
    let (status, body) = get_json(state.clone(), "/api/leads/legacy_77/interactions?limit=2").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 5);
    assert_eq!(body["items"][0]["id"], "email_m4");
    assert_eq!(body["has_more"], true);
    assert_eq!(body["next_offset"], 2);

    let (_, tail) = get_json(state, "/api/leads/legacy_77/interactions?offset=4&limit=2").await;
    assert_eq!(tail["items"].as_array().unwrap().len(), 1);
    assert_eq!(tail["has_more"], false);
    assert!(tail["next_offset"].is_null());
}

#[tokio::test]
async fn refresh_rebuilds_the_cached_timeline() {
    let source = Arc::new(source());
    let state = test_helpers::test_app_state_with_source(source.clone());
    get_json(state.clone(), "/api/leads/legacy_77/interactions").await;
    get_json(state.clone(), "/api/leads/legacy_77/interactions").await;
    assert_eq!(source.lead_fetches(), 1);
    get_json(state, "/api/leads/legacy_77/interactions?refresh=true").await;
    assert_eq!(source.lead_fetches(), 2);
}

#[tokio::test]
async fn edit_on_legacy_lead_is_conflict() {
    let state = test_helpers::test_app_state_with_source(Arc::new(source()));
    let response = crate::routes::app(state)
        .oneshot(
            Request::builder()
                .method("PATCH")
                .uri("/api/leads/legacy_77/interactions/legacy_5")
                .header("content-type", "application/json")
                .header("x-employee-name", "Rina")
                .body(Body::from(r#"{"content":"fixed"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn summary_without_llm_is_503() {
    let state = test_helpers::test_app_state_with_source(Arc::new(source()));
    let response = crate::routes::app(state)
        .oneshot(Request::builder().method("POST").uri("/api/leads/legacy_77/summary").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn healthz_is_ok() {
    let (status, _) = get_json(test_helpers::test_app_state(), "/healthz").await;
    assert_eq!(status, StatusCode::OK);
}
