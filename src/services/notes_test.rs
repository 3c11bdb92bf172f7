use chrono::TimeZone;
use serde_json::json;

use super::*;
use crate::services::interaction::InteractionSource;

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 10, 30, 0).single().unwrap()
}

fn note(content: &str) -> NewNote {
    NewNote { content: content.into(), ..NewNote::default() }
}

#[test]
fn build_entry_defaults() {
    let entry = build_entry(&note("  Called the court  "), "Avi Cohen", "manual_x", now()).unwrap();
    assert_eq!(entry["id"], "manual_x");
    assert_eq!(entry["content"], "Called the court");
    assert_eq!(entry["kind"], "note");
    assert_eq!(entry["direction"], "out");
    assert_eq!(entry["employee"], "Avi Cohen");
    assert_eq!(entry["date"], "01.05.24");
    assert_eq!(entry["time"], "10:30");
    assert!(entry["observation"].is_null());
}

#[test]
fn build_entry_normalizes_through_manual_path() {
    let input = NewNote {
        content: "Client visited".into(),
        kind: Some("Office visit".into()),
        direction: Some("incoming".into()),
        length: Some("15:00".into()),
        date: Some("28.04.24 09:15".into()),
        ..NewNote::default()
    };
    let entry = build_entry(&input, "Rina", "manual_y", now()).unwrap();
    let interaction = interaction::normalize_manual(&entry, 0).interaction;
    assert_eq!(interaction.id, "manual_y");
    assert_eq!(interaction.kind, InteractionKind::Office);
    assert_eq!(interaction.direction, Direction::In);
    assert_eq!(interaction.date, "28.04.24");
    assert_eq!(interaction.time, "09:15");
    assert_eq!(interaction.length.as_deref(), Some("15:00"));
    assert!(interaction.editable);
    assert_eq!(interaction.source, InteractionSource::Manual);
}

#[test]
fn build_entry_rejects_bad_input() {
    assert!(matches!(build_entry(&note("   "), "Avi", "m", now()), Err(NoteError::EmptyContent)));

    let bad_kind = NewNote { kind: Some("fax".into()), ..note("x") };
    assert!(matches!(build_entry(&bad_kind, "Avi", "m", now()), Err(NoteError::InvalidKind(k)) if k == "fax"));

    let bad_date = NewNote { date: Some("yesterday".into()), ..note("x") };
    assert!(matches!(build_entry(&bad_date, "Avi", "m", now()), Err(NoteError::InvalidDate(_))));
}

#[test]
fn apply_patch_updates_only_given_fields() {
    let mut entries = vec![
        json!({"id": "manual_a", "content": "old", "kind": "note", "observation": "keep"}),
        json!({"id": "manual_b", "content": "other"}),
    ];
    let patch = NotePatch { content: Some("new".into()), kind: Some("call".into()), ..NotePatch::default() };
    let updated = apply_patch(&mut entries, "manual_a", &patch, "Rina", now()).unwrap();
    assert_eq!(updated["content"], "new");
    assert_eq!(updated["kind"], "call");
    assert_eq!(updated["observation"], "keep");
    assert_eq!(updated["edited_by"], "Rina");
    assert_eq!(entries[0], updated);
    assert_eq!(entries[1]["content"], "other");
}

#[test]
fn apply_patch_clears_optional_fields_with_blank() {
    let mut entries = vec![json!({"id": "manual_a", "content": "c", "observation": "note"})];
    let patch = NotePatch { observation: Some("  ".into()), ..NotePatch::default() };
    let updated = apply_patch(&mut entries, "manual_a", &patch, "Rina", now()).unwrap();
    assert!(updated["observation"].is_null());
}

#[test]
fn apply_patch_unknown_id_and_empty_content() {
    let mut entries = vec![json!({"id": "manual_a", "content": "c"})];
    assert!(matches!(
        apply_patch(&mut entries, "manual_z", &NotePatch::default(), "Rina", now()),
        Err(NoteError::NotFound(id)) if id == "manual_z"
    ));
    let blank = NotePatch { content: Some(String::new()), ..NotePatch::default() };
    assert!(matches!(apply_patch(&mut entries, "manual_a", &blank, "Rina", now()), Err(NoteError::EmptyContent)));
}

#[test]
fn apply_patch_matches_numeric_and_positional_ids() {
    let mut entries = vec![
        json!({"id": 17, "content": "imported", "raw_date": "2024-04-01T09:00:00Z"}),
        json!({"content": "no id", "raw_date": "2024-04-02T09:00:00Z"}),
    ];
    let shown: Vec<_> = entries
        .iter()
        .enumerate()
        .map(|(i, e)| interaction::normalize_manual(e, i).interaction)
        .collect();
    assert_eq!(shown[0].id, "17");
    assert_eq!(shown[1].id, "manual_1");
    assert!(shown.iter().all(|i| i.editable));

    let patch = NotePatch { content: Some("edited".into()), ..NotePatch::default() };
    let numeric = apply_patch(&mut entries, "17", &patch, "Rina", now()).unwrap();
    assert_eq!(numeric["id"], 17);
    assert_eq!(numeric["content"], "edited");

    let positional = apply_patch(&mut entries, "manual_1", &patch, "Rina", now()).unwrap();
    assert_eq!(positional["id"], "manual_1");
    assert_eq!(interaction::normalize_manual(&positional, 0).interaction.id, "manual_1");
    assert_eq!(entries[1]["content"], "edited");
}

#[test]
fn parse_minutes_forms() {
    assert_eq!(parse_minutes("12"), Some(12));
    assert_eq!(parse_minutes("3:00"), Some(3));
    assert_eq!(parse_minutes("3:20"), Some(4));
    assert_eq!(parse_minutes("abc"), None);
}

#[test]
fn error_statuses() {
    assert_eq!(NoteError::EmptyContent.http_status(), StatusCode::BAD_REQUEST);
    assert_eq!(NoteError::NotEditable.http_status(), StatusCode::CONFLICT);
    assert_eq!(NoteError::NotFound("x".into()).http_status(), StatusCode::NOT_FOUND);
    let lead_missing = NoteError::from(LeadError::NotFound(LeadRef::Legacy(3)));
    assert_eq!(lead_missing.http_status(), StatusCode::NOT_FOUND);
    assert_eq!(lead_missing.error_code(), "E_LEAD_NOT_FOUND");
}

#[tokio::test]
async fn edit_on_legacy_lead_is_rejected_before_touching_the_database() {
    let state = crate::state::test_helpers::test_app_state();
    let err = edit_note(&state, LeadRef::Legacy(5), "legacy_1", &NotePatch::default(), "Rina")
        .await
        .unwrap_err();
    assert!(matches!(err, NoteError::NotEditable));
}

#[cfg(feature = "live-db-tests")]
mod live {
    use super::*;
    use crate::state::test_helpers;

    #[tokio::test]
    #[ignore = "requires TEST_DATABASE_URL/live Postgres"]
    async fn add_then_edit_on_new_lead() {
        let state = test_helpers::integration_state().await;
        let lead_id = Uuid::new_v4();
        sqlx::query("INSERT INTO leads (id, name) VALUES ($1, 'Dana Levi')")
            .bind(lead_id)
            .execute(&state.pool)
            .await
            .unwrap();
        let lead = LeadRef::New(lead_id);

        let added = add_note(&state, lead, &note("First call"), "Avi").await.unwrap();
        assert!(added.id.starts_with("manual_"));

        let patch = NotePatch { content: Some("First call, left message".into()), ..NotePatch::default() };
        let edited = edit_note(&state, lead, &added.id, &patch, "Avi").await.unwrap();
        assert_eq!(edited.content, "First call, left message");

        let stored = lead::load_lead(&state.pool, lead).await.unwrap();
        assert_eq!(stored.manual_interactions.len(), 1);
    }

    #[tokio::test]
    #[ignore = "requires TEST_DATABASE_URL/live Postgres"]
    async fn add_on_legacy_lead_inserts_row() {
        let state = test_helpers::integration_state().await;
        sqlx::query("INSERT INTO leads_lead (id, name) VALUES (9001, 'Moshe Katz') ON CONFLICT DO NOTHING")
            .execute(&state.pool)
            .await
            .unwrap();
        let input = NewNote { kind: Some("call".into()), length: Some("2:30".into()), ..note("Returned call") };
        let added = add_note(&state, LeadRef::Legacy(9001), &input, "Rina").await.unwrap();
        assert!(added.id.starts_with("legacy_"));
        assert_eq!(added.length.as_deref(), Some("3:00"));
        assert!(!added.editable);
    }

    #[tokio::test]
    #[ignore = "requires TEST_DATABASE_URL/live Postgres"]
    async fn add_on_missing_lead_is_not_found() {
        let state = test_helpers::integration_state().await;
        let err = add_note(&state, LeadRef::New(Uuid::new_v4()), &note("x"), "Avi").await.unwrap_err();
        assert_eq!(err.http_status(), StatusCode::NOT_FOUND);
    }
}
