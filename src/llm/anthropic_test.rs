use super::*;

fn make_response(content: serde_json::Value) -> String {
    serde_json::json!({
        "id": "msg_123",
        "type": "message",
        "role": "assistant",
        "content": content,
        "model": "claude-sonnet-4-5-20250929",
        "stop_reason": "end_turn",
        "usage": { "input_tokens": 100, "output_tokens": 50 }
    })
    .to_string()
}

#[test]
fn parse_text_response() {
    let json = make_response(serde_json::json!([{ "type": "text", "text": "Client wants a refund." }]));
    let resp = parse_response(&json).unwrap();
    assert_eq!(resp.text, "Client wants a refund.");
    assert_eq!(resp.model, "claude-sonnet-4-5-20250929");
    assert_eq!(resp.stop_reason, "end_turn");
    assert_eq!((resp.input_tokens, resp.output_tokens), (100, 50));
}

#[test]
fn parse_skips_non_text_blocks() {
    let json = make_response(serde_json::json!([
        { "type": "thinking", "thinking": "..." },
        { "type": "text", "text": "Summary." }
    ]));
    assert_eq!(parse_response(&json).unwrap().text, "Summary.");
}

#[test]
fn parse_empty_content_is_an_error() {
    let json = make_response(serde_json::json!([]));
    assert!(matches!(parse_response(&json), Err(LlmError::EmptyResponse)));
}

#[test]
fn parse_malformed_json() {
    assert!(matches!(parse_response("{"), Err(LlmError::ApiParse(_))));
}

#[test]
fn request_serializes_messages() {
    let messages = [Message::user("hello")];
    let body = ApiRequest { model: "m", max_tokens: 64, system: "sys", messages: &messages };
    let json = serde_json::to_value(&body).unwrap();
    assert_eq!(json["messages"][0]["role"], "user");
    assert_eq!(json["max_tokens"], 64);
}
