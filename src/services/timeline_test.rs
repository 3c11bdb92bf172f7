use serde_json::json;
use uuid::Uuid;

use super::*;
use crate::services::interaction::{Direction, InteractionSource};
use crate::services::mock_source::{self, MockSource, at};

fn new_ref() -> LeadRef {
    LeadRef::New(Uuid::from_u128(7))
}

fn populated() -> MockSource {
    let mut lead = mock_source::lead(new_ref(), "Dana Levi");
    lead.manual_interactions = vec![json!({
        "id": "manual_a",
        "raw_date": "2024-03-05T09:00:00Z",
        "employee": "Avi Cohen",
        "kind": "meeting",
        "content": "Intake meeting"
    })];
    let mut source = MockSource::with_lead(lead);
    source.emails = vec![
        mock_source::email_row("m1", "incoming", at(2024, 3, 4, 8, 0)),
        mock_source::email_row("m2", "outgoing", at(2024, 3, 6, 8, 0)),
    ];
    source.whatsapp = vec![mock_source::whatsapp_row(11, "delivered", at(2024, 3, 7, 12, 30))];
    source.calls = vec![mock_source::call_row(21, at(2024, 3, 3, 16, 45))];
    source
}

#[tokio::test]
async fn builds_sorted_newest_first() {
    let source = populated();
    let timeline = build_timeline(&source, new_ref(), 200).await.unwrap();
    let ids: Vec<&str> = timeline.items.iter().map(|i| i.id.as_str()).collect();
    assert_eq!(ids, ["whatsapp_11", "email_m2", "manual_a", "email_m1", "call_21"]);
    assert!(timeline.items[2].editable);
    assert_eq!(timeline.items[2].source, InteractionSource::Manual);
}

#[tokio::test]
async fn missing_lead_is_the_only_hard_error() {
    let source = MockSource::default();
    let err = build_timeline(&source, new_ref(), 200).await.unwrap_err();
    assert!(matches!(err, LeadError::NotFound(_)));
}

#[tokio::test]
async fn failing_sources_are_omitted() {
    let mut source = populated();
    source.failing.insert("emails");
    source.failing.insert("calls");
    let timeline = build_timeline(&source, new_ref(), 200).await.unwrap();
    let ids: Vec<&str> = timeline.items.iter().map(|i| i.id.as_str()).collect();
    assert_eq!(ids, ["whatsapp_11", "manual_a"]);
}

#[tokio::test]
async fn batch_size_caps_each_source() {
    let mut source = populated();
    source.emails = (0..5)
        .map(|n| mock_source::email_row(&format!("e{n}"), "incoming", at(2024, 1, 1 + n, 9, 0)))
        .collect();
    let timeline = build_timeline(&source, new_ref(), 2).await.unwrap();
    let emails = timeline.items.iter().filter(|i| i.source == InteractionSource::Email).count();
    assert_eq!(emails, 2);
}

#[tokio::test]
async fn legacy_lead_reads_legacy_interactions() {
    let legacy_ref = LeadRef::Legacy(42);
    let mut source = MockSource::with_lead(mock_source::lead(legacy_ref, "Moshe Katz"));
    source.legacy = vec![LegacyInteractionRow {
        id: 5,
        contact_id: None,
        cdate: Some(at(2019, 6, 1, 10, 0)),
        kind: Some("c".into()),
        direction: Some("i".into()),
        employee: Some("Rina".into()),
        minutes: Some(4),
        content: Some("Called about the hearing".into()),
        description: None,
    }];
    let timeline = build_timeline(&source, legacy_ref, 200).await.unwrap();
    assert_eq!(timeline.items.len(), 1);
    assert_eq!(timeline.items[0].id, "legacy_5");
    assert_eq!(timeline.items[0].direction, Direction::In);
    assert!(!timeline.items[0].editable);
}

#[tokio::test]
async fn new_lead_never_reads_legacy_table() {
    let mut source = populated();
    source.failing.insert("legacy");
    source.legacy = vec![LegacyInteractionRow {
        id: 9,
        contact_id: None,
        cdate: Some(at(2030, 1, 1, 0, 0)),
        kind: None,
        direction: None,
        employee: None,
        minutes: None,
        content: None,
        description: None,
    }];
    let timeline = build_timeline(&source, new_ref(), 200).await.unwrap();
    assert!(timeline.items.iter().all(|i| i.source != InteractionSource::Legacy));
}

#[tokio::test]
async fn attributes_contacts_by_phone() {
    let mut source = populated();
    source.contacts = vec![Contact {
        id: 3,
        name: "Yossi Levi".into(),
        email: None,
        phone: None,
        mobile: Some("+972 52 765 4321".into()),
        is_main: false,
    }];
    let timeline = build_timeline(&source, new_ref(), 200).await.unwrap();
    let call = timeline.items.iter().find(|i| i.id == "call_21").unwrap();
    assert_eq!(call.contact.as_ref().map(|c| c.id), Some(3));
}

#[test]
fn merge_dedupes_first_wins_and_drops_undated() {
    let lead = mock_source::lead(new_ref(), "Dana Levi");
    let first = interaction::normalize_manual(
        &json!({"id": "dup", "raw_date": "2024-01-02T00:00:00Z", "content": "first"}),
        0,
    );
    let second = interaction::normalize_manual(
        &json!({"id": "dup", "raw_date": "2024-01-03T00:00:00Z", "content": "second"}),
        1,
    );
    let undated = interaction::normalize_manual(&json!({"id": "nodate", "content": "?"}), 2);
    let items = merge(vec![first, second, undated], &[], &lead);
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].content, "first");
}

#[test]
fn merge_sort_is_stable_for_equal_instants() {
    let lead = mock_source::lead(new_ref(), "Dana Levi");
    let same = "2024-01-02T10:00:00Z";
    let entries = ["a", "b", "c"]
        .iter()
        .enumerate()
        .map(|(idx, id)| interaction::normalize_manual(&json!({"id": id, "raw_date": same}), idx))
        .collect();
    let ids: Vec<String> = merge(entries, &[], &lead).into_iter().map(|i| i.id).collect();
    assert_eq!(ids, ["a", "b", "c"]);
}

#[tokio::test]
async fn page_windows_and_next_offset() {
    let source = populated();
    let timeline = build_timeline(&source, new_ref(), 200).await.unwrap();

    let first = timeline.page(0, 2);
    assert_eq!(first.items.len(), 2);
    assert_eq!(first.total, 5);
    assert!(first.has_more);
    assert_eq!(first.next_offset, Some(2));

    let last = timeline.page(4, 2);
    assert_eq!(last.items.len(), 1);
    assert!(!last.has_more);
    assert_eq!(last.next_offset, None);

    let past_end = timeline.page(50, 20);
    assert!(past_end.items.is_empty());
    assert_eq!(past_end.offset, 5);
}
