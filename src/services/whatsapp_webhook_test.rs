use super::*;

fn config(verify: Option<&str>) -> WhatsAppConfig {
    WhatsAppConfig {
        access_token: "t".into(),
        phone_number_id: "1".into(),
        api_base_url: "http://localhost".into(),
        api_version: "v19.0".into(),
        default_country_code: "972".into(),
        verify_token: verify.map(str::to_owned),
    }
}

#[test]
fn statuses_never_move_backwards() {
    assert_eq!(superseded_statuses("sent"), ["pending"]);
    assert!(superseded_statuses("read").contains(&"delivered"));
    assert!(!superseded_statuses("delivered").contains(&"read"));
    assert!(!superseded_statuses("failed").contains(&"read"));
    assert!(superseded_statuses("pending").is_empty());
    assert!(superseded_statuses("deleted").is_empty());
}

#[test]
fn match_key_takes_last_nine_digits() {
    assert_eq!(match_key("972527654321").as_deref(), Some("527654321"));
    assert_eq!(match_key("052-765-4321").as_deref(), Some("527654321"));
    assert_eq!(match_key("12345"), None);
}

#[test]
fn verify_subscription_requires_matching_token() {
    let cfg = config(Some("s3cret"));
    assert_eq!(
        verify_subscription(Some(&cfg), Some("subscribe"), Some("s3cret"), Some("123")).as_deref(),
        Some("123")
    );
    assert_eq!(verify_subscription(Some(&cfg), Some("subscribe"), Some("wrong"), Some("123")), None);
    assert_eq!(verify_subscription(Some(&cfg), Some("unsubscribe"), Some("s3cret"), Some("123")), None);
    assert_eq!(verify_subscription(Some(&config(None)), Some("subscribe"), None, Some("123")), None);
    assert_eq!(verify_subscription(None, Some("subscribe"), Some("s3cret"), Some("123")), None);
}

#[test]
fn payload_parses_statuses_and_messages() {
    let raw = r#"{
        "object": "whatsapp_business_account",
        "entry": [{"id": "1", "changes": [{"field": "messages", "value": {
            "statuses": [{"id": "wamid.OUT", "status": "failed", "errors": [{"code": 131047, "title": "Re-engagement message"}]}],
            "contacts": [{"wa_id": "972527654321", "profile": {"name": "Dana"}}],
            "messages": [
                {"id": "wamid.IN1", "from": "972527654321", "timestamp": "1714557600", "type": "text", "text": {"body": "Thanks"}},
                {"id": "wamid.IN2", "from": "972527654321", "type": "image", "image": {"id": "media-9", "caption": "scan"}}
            ]
        }}]}]
    }"#;
    let payload: WebhookPayload = serde_json::from_str(raw).unwrap();
    let value = &payload.entry[0].changes[0].value;

    let status = &value.statuses[0];
    assert_eq!(status.status, "failed");
    assert_eq!(failure_message(status).as_deref(), Some("131047: Re-engagement message"));

    let text = &value.messages[0];
    assert_eq!(text.body().as_deref(), Some("Thanks"));
    assert_eq!(text.media_url(), None);
    assert_eq!(text.sent_at().timestamp(), 1_714_557_600);

    let image = &value.messages[1];
    assert_eq!(image.kind, "image");
    assert_eq!(image.body().as_deref(), Some("scan"));
    assert_eq!(image.media_url().as_deref(), Some("media:media-9"));
}

#[test]
fn empty_payload_is_accepted() {
    let payload: WebhookPayload = serde_json::from_str("{}").unwrap();
    assert!(payload.entry.is_empty());
}

#[cfg(feature = "live-db-tests")]
mod live {
    use super::*;
    use crate::state::test_helpers;

    #[tokio::test]
    #[ignore = "requires TEST_DATABASE_URL/live Postgres"]
    async fn status_updates_and_inbound_messages() {
        let state = test_helpers::integration_state().await;
        sqlx::query("INSERT INTO leads_lead (id, name, mobile) VALUES (8001, 'Dana Levi', '052-765-4321') ON CONFLICT DO NOTHING")
            .execute(&state.pool)
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO whatsapp_messages (legacy_id, direction, message, status, whatsapp_message_id)
             VALUES (8001, 'out', 'hello', 'read', 'wamid.R')",
        )
        .execute(&state.pool)
        .await
        .unwrap();

        let payload: WebhookPayload = serde_json::from_value(serde_json::json!({
            "entry": [{"changes": [{"value": {
                "statuses": [{"id": "wamid.R", "status": "delivered"}],
                "messages": [{"id": "wamid.IN", "from": "972527654321", "type": "text", "text": {"body": "hi"}}]
            }}]}]
        }))
        .unwrap();

        let outcome = apply_webhook(&state, &payload).await.unwrap();
        assert_eq!(outcome.statuses_applied, 0);
        assert_eq!(outcome.messages_stored, 1);

        let again = apply_webhook(&state, &payload).await.unwrap();
        assert_eq!(again.messages_stored, 1);
        let (count,): (i64,) =
            sqlx::query_as("SELECT count(*) FROM whatsapp_messages WHERE whatsapp_message_id = 'wamid.IN'")
                .fetch_one(&state.pool)
                .await
                .unwrap();
        assert_eq!(count, 1);
    }
}
