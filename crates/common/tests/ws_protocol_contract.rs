use std::collections::BTreeSet;

use taskman_common::protocol::ws::{
    EventEnvelope, EventPayload, EventType, PresenceData, ProjectDeletedData, ProjectMovedData,
    TaskDeletedData, TaskMovedData,
};
use taskman_common::types::{ProjectStatus, TaskStatus};
use uuid::Uuid;

fn load_contract() -> serde_json::Value {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/../../contracts/ws-events.json");
    let content = std::fs::read_to_string(path).expect("contract file should be readable");
    serde_json::from_str(&content).expect("contract file should be valid JSON")
}

fn field_names(value: &serde_json::Value) -> BTreeSet<String> {
    value.as_object().expect("value should be an object").keys().cloned().collect()
}

fn contract_fields(contract: &serde_json::Value, key: &str) -> BTreeSet<String> {
    contract[key]
        .as_array()
        .unwrap_or_else(|| panic!("{key} should be an array"))
        .iter()
        .map(|v| v.as_str().expect("field should be a string").to_string())
        .collect()
}

#[test]
fn event_types_match_contract() {
    let contract = load_contract();
    let expected = contract_fields(&contract, "event_types");
    let actual: BTreeSet<String> =
        EventType::ALL.iter().map(|event_type| event_type.as_str().to_string()).collect();

    assert_eq!(actual, expected, "EventType diverged from contract");
}

#[test]
fn envelope_and_payload_shapes_match_contract() {
    let contract = load_contract();
    let user_id = Uuid::new_v4();
    let org_id = Uuid::new_v4();
    let project_id = Uuid::new_v4();
    let task_id = Uuid::new_v4();

    let samples = [
        EventPayload::UserJoined(PresenceData { user_id, org_id }),
        EventPayload::UserLeft(PresenceData { user_id, org_id }),
        EventPayload::TaskMoved(TaskMovedData {
            task_id,
            project_id,
            old_status: TaskStatus::NotStarted,
            new_status: TaskStatus::Done,
            user_id,
        }),
        EventPayload::ProjectMoved(ProjectMovedData {
            project_id,
            org_id,
            old_status: ProjectStatus::Idea,
            new_status: ProjectStatus::InProgress,
            user_id,
        }),
        EventPayload::TaskDeleted(TaskDeletedData { task_id, project_id, user_id }),
        EventPayload::ProjectDeleted(ProjectDeletedData { project_id, org_id, user_id }),
        EventPayload::error("NOT_AUTHORIZED", "caller is not assigned to this task"),
    ];

    let envelope_fields = contract_fields(&contract, "envelope_fields");
    for payload in samples {
        let event_type = payload.event_type();
        let envelope = EventEnvelope::now(payload, user_id);
        let value = serde_json::to_value(&envelope).expect("envelope should serialize");

        assert_eq!(field_names(&value), envelope_fields, "envelope fields for {event_type}");
        assert_eq!(
            field_names(&value["data"]),
            contract_fields(&contract["payload_fields"], event_type.as_str()),
            "payload fields for {event_type}"
        );
    }
}
