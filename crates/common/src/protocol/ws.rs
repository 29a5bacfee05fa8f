// WebSocket event types for the taskman board protocol.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::types::{Project, ProjectStatus, Task, TaskStatus};

/// The closed set of event types that may appear on the wire.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum EventType {
    UserJoined,
    UserLeft,
    TaskMoved,
    ProjectMoved,
    TaskCreated,
    TaskUpdated,
    TaskDeleted,
    ProjectCreated,
    ProjectUpdated,
    ProjectDeleted,
    Error,
}

impl EventType {
    pub const ALL: [Self; 11] = [
        Self::UserJoined,
        Self::UserLeft,
        Self::TaskMoved,
        Self::ProjectMoved,
        Self::TaskCreated,
        Self::TaskUpdated,
        Self::TaskDeleted,
        Self::ProjectCreated,
        Self::ProjectUpdated,
        Self::ProjectDeleted,
        Self::Error,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UserJoined => "user-joined",
            Self::UserLeft => "user-left",
            Self::TaskMoved => "task-moved",
            Self::ProjectMoved => "project-moved",
            Self::TaskCreated => "task-created",
            Self::TaskUpdated => "task-updated",
            Self::TaskDeleted => "task-deleted",
            Self::ProjectCreated => "project-created",
            Self::ProjectUpdated => "project-updated",
            Self::ProjectDeleted => "project-deleted",
            Self::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|event_type| event_type.as_str() == value)
    }

    /// Board state changes. Presence and error frames are produced by the
    /// relay only and are never re-broadcast on behalf of a client.
    pub const fn is_state_change(self) -> bool {
        !matches!(self, Self::UserJoined | Self::UserLeft | Self::Error)
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PresenceData {
    pub user_id: Uuid,
    pub org_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskMovedData {
    pub task_id: Uuid,
    pub project_id: Uuid,
    pub old_status: TaskStatus,
    pub new_status: TaskStatus,
    pub user_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectMovedData {
    pub project_id: Uuid,
    pub org_id: Uuid,
    pub old_status: ProjectStatus,
    pub new_status: ProjectStatus,
    pub user_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskData {
    pub task: Task,
    pub user_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskDeletedData {
    pub task_id: Uuid,
    pub project_id: Uuid,
    pub user_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectData {
    pub project: Project,
    pub user_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectDeletedData {
    pub project_id: Uuid,
    pub org_id: Uuid,
    pub user_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorData {
    pub message: String,
    pub code: String,
}

/// A typed event body. Serializes as `{"type": ..., "data": ...}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum EventPayload {
    UserJoined(PresenceData),
    UserLeft(PresenceData),
    TaskMoved(TaskMovedData),
    ProjectMoved(ProjectMovedData),
    TaskCreated(TaskData),
    TaskUpdated(TaskData),
    TaskDeleted(TaskDeletedData),
    ProjectCreated(ProjectData),
    ProjectUpdated(ProjectData),
    ProjectDeleted(ProjectDeletedData),
    Error(ErrorData),
}

impl EventPayload {
    pub const fn event_type(&self) -> EventType {
        match self {
            Self::UserJoined(_) => EventType::UserJoined,
            Self::UserLeft(_) => EventType::UserLeft,
            Self::TaskMoved(_) => EventType::TaskMoved,
            Self::ProjectMoved(_) => EventType::ProjectMoved,
            Self::TaskCreated(_) => EventType::TaskCreated,
            Self::TaskUpdated(_) => EventType::TaskUpdated,
            Self::TaskDeleted(_) => EventType::TaskDeleted,
            Self::ProjectCreated(_) => EventType::ProjectCreated,
            Self::ProjectUpdated(_) => EventType::ProjectUpdated,
            Self::ProjectDeleted(_) => EventType::ProjectDeleted,
            Self::Error(_) => EventType::Error,
        }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error(ErrorData { message: message.into(), code: code.into() })
    }

    fn into_parts(self) -> (EventType, Value) {
        let event_type = self.event_type();
        let data = match self {
            Self::UserJoined(data) | Self::UserLeft(data) => serde_json::to_value(data),
            Self::TaskMoved(data) => serde_json::to_value(data),
            Self::ProjectMoved(data) => serde_json::to_value(data),
            Self::TaskCreated(data) | Self::TaskUpdated(data) => serde_json::to_value(data),
            Self::TaskDeleted(data) => serde_json::to_value(data),
            Self::ProjectCreated(data) | Self::ProjectUpdated(data) => serde_json::to_value(data),
            Self::ProjectDeleted(data) => serde_json::to_value(data),
            Self::Error(data) => serde_json::to_value(data),
        };

        // Payload structs hold only uuids, strings, enums and timestamps.
        (event_type, data.unwrap_or(Value::Null))
    }

    fn from_parts(event_type: EventType, data: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(serde_json::json!({ "type": event_type, "data": data }))
    }
}

/// An immutable, attributed event as delivered to every subscriber.
///
/// Wire shape: `{"type", "data", "timestamp", "user_id"}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventEnvelope {
    #[serde(rename = "type")]
    event_type: EventType,
    data: Value,
    timestamp: DateTime<Utc>,
    user_id: Uuid,
}

impl EventEnvelope {
    pub fn new(payload: EventPayload, user_id: Uuid, timestamp: DateTime<Utc>) -> Self {
        let (event_type, data) = payload.into_parts();
        Self { event_type, data, timestamp, user_id }
    }

    pub fn now(payload: EventPayload, user_id: Uuid) -> Self {
        Self::new(payload, user_id, Utc::now())
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    /// Decode the opaque `data` back into its typed payload.
    pub fn payload(&self) -> Result<EventPayload, serde_json::Error> {
        EventPayload::from_parts(self.event_type, self.data.clone())
    }
}

#[derive(Debug, Deserialize)]
struct RawClientMessage {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, thiserror::Error)]
pub enum ClientMessageError {
    #[error("malformed event frame: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("unknown event type `{0}`")]
    UnknownType(String),
    #[error("invalid `{event_type}` payload: {source}")]
    InvalidPayload {
        event_type: EventType,
        #[source]
        source: serde_json::Error,
    },
}

impl ClientMessageError {
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Malformed(_) | Self::InvalidPayload { .. } => "INVALID_MESSAGE",
            Self::UnknownType(_) => "UNKNOWN_EVENT_TYPE",
        }
    }
}

/// Decode a client frame `{"type", "data"}`. Any client-supplied
/// `timestamp` or `user_id` is ignored; the relay stamps both.
pub fn decode_client_message(raw: &str) -> Result<EventPayload, ClientMessageError> {
    let message =
        serde_json::from_str::<RawClientMessage>(raw).map_err(ClientMessageError::Malformed)?;
    let event_type = EventType::parse(&message.event_type)
        .ok_or(ClientMessageError::UnknownType(message.event_type))?;

    EventPayload::from_parts(event_type, message.data)
        .map_err(|source| ClientMessageError::InvalidPayload { event_type, source })
}

pub fn encode_envelope(envelope: &EventEnvelope) -> Result<String, serde_json::Error> {
    serde_json::to_string(envelope)
}

pub fn decode_envelope(raw: &str) -> Result<EventEnvelope, serde_json::Error> {
    serde_json::from_str(raw)
}
