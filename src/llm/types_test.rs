use super::*;

#[test]
fn message_serializes_lowercase_role() {
    let json = serde_json::to_value(Message::user("hi")).unwrap();
    assert_eq!(json, serde_json::json!({"role": "user", "content": "hi"}));
}

#[test]
fn retryable_only_for_transport_and_server_errors() {
    assert!(LlmError::ApiRequest("timeout".into()).retryable());
    assert!(LlmError::ApiResponse { status: 429, body: String::new() }.retryable());
    assert!(LlmError::ApiResponse { status: 503, body: String::new() }.retryable());
    assert!(!LlmError::ApiResponse { status: 400, body: String::new() }.retryable());
    assert!(!LlmError::EmptyResponse.retryable());
}

#[test]
fn config_errors_map_to_unavailable() {
    let err = LlmError::MissingApiKey { var: "OPENAI_API_KEY".into() };
    assert_eq!(err.http_status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(err.error_code(), "E_MISSING_API_KEY");
    assert_eq!(LlmError::ApiParse("x".into()).http_status(), StatusCode::BAD_GATEWAY);
}
