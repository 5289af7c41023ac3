// ── Event domain types ──
//
// Everything that flows through the Dispatcher. `EventType` is derived
// from the payload, so an event can never carry a payload of the wrong
// shape for its type.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoStaticStr};

use super::Ticket;

// ── EventType ────────────────────────────────────────────────────────

/// Closed set of event tags the Dispatcher routes on.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Display,
    AsRefStr,
    IntoStaticStr,
    EnumString,
    EnumIter,
)]
pub enum EventType {
    // Entity lifecycle
    #[strum(serialize = "ticket:created")]
    #[serde(rename = "ticket:created")]
    TicketCreated,
    #[strum(serialize = "ticket:updated")]
    #[serde(rename = "ticket:updated")]
    TicketUpdated,
    #[strum(serialize = "ticket:deleted")]
    #[serde(rename = "ticket:deleted")]
    TicketDeleted,
    #[strum(serialize = "project:created")]
    #[serde(rename = "project:created")]
    ProjectCreated,
    #[strum(serialize = "project:updated")]
    #[serde(rename = "project:updated")]
    ProjectUpdated,
    #[strum(serialize = "project:deleted")]
    #[serde(rename = "project:deleted")]
    ProjectDeleted,

    // Transport lifecycle
    #[strum(serialize = "sse:connected")]
    #[serde(rename = "sse:connected")]
    SseConnected,
    #[strum(serialize = "sse:disconnected")]
    #[serde(rename = "sse:disconnected")]
    SseDisconnected,
    #[strum(serialize = "sse:error")]
    #[serde(rename = "sse:error")]
    SseError,

    // System
    #[strum(serialize = "api-error")]
    #[serde(rename = "api-error")]
    ApiError,
    #[strum(serialize = "network-error")]
    #[serde(rename = "network-error")]
    NetworkError,
    #[strum(serialize = "refresh-requested")]
    #[serde(rename = "refresh-requested")]
    RefreshRequested,
    /// Full resynchronization result, published after each stream connect.
    #[strum(serialize = "snapshot:loaded")]
    #[serde(rename = "snapshot:loaded")]
    SnapshotLoaded,
}

impl EventType {
    pub const TICKET_EVENTS: [Self; 3] = [Self::TicketCreated, Self::TicketUpdated, Self::TicketDeleted];

    pub const ERROR_EVENTS: [Self; 3] = [Self::SseError, Self::ApiError, Self::NetworkError];

    /// Error-class events are never re-emitted by the circuit breaker.
    pub fn is_error_class(self) -> bool {
        Self::ERROR_EVENTS.contains(&self)
    }
}

/// Who produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, AsRefStr)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EventSource {
    Stream,
    Ui,
    Api,
    System,
}

// ── ChangeRecord ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Ticket,
    Project,
}

/// Normalized description of one entity change, whichever transport saw it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRecord {
    pub kind: ChangeKind,
    pub entity: EntityKind,
    /// Owning project. For project records this equals `key`.
    pub scope: String,
    /// Ticket key (e.g. `"MDT-001"`) or project id.
    pub key: String,
    pub timestamp: DateTime<Utc>,
}

impl ChangeRecord {
    pub fn ticket(
        kind: ChangeKind,
        scope: impl Into<String>,
        key: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            kind,
            entity: EntityKind::Ticket,
            scope: scope.into(),
            key: key.into(),
            timestamp,
        }
    }

    pub fn project(kind: ChangeKind, id: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        let id = id.into();
        Self {
            kind,
            entity: EntityKind::Project,
            scope: id.clone(),
            key: id,
            timestamp,
        }
    }

    pub fn event_type(&self) -> EventType {
        match (self.entity, self.kind) {
            (EntityKind::Ticket, ChangeKind::Created) => EventType::TicketCreated,
            (EntityKind::Ticket, ChangeKind::Modified) => EventType::TicketUpdated,
            (EntityKind::Ticket, ChangeKind::Deleted) => EventType::TicketDeleted,
            (EntityKind::Project, ChangeKind::Created) => EventType::ProjectCreated,
            (EntityKind::Project, ChangeKind::Modified) => EventType::ProjectUpdated,
            (EntityKind::Project, ChangeKind::Deleted) => EventType::ProjectDeleted,
        }
    }
}

// ── Payloads ─────────────────────────────────────────────────────────

/// Description of a failure carried by error-class events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReport {
    pub message: String,
    /// What was going on when it failed (event type, operation, URL...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl ErrorReport {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            context: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

/// Result of a full resynchronization load.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadedSnapshot {
    pub scope: String,
    pub tickets: Arc<Vec<Ticket>>,
}

/// Typed event payload. Each variant maps to exactly one schema.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "camelCase")]
pub enum EventPayload {
    Change(ChangeRecord),
    Connected { url: String },
    Disconnected { reason: String },
    TransportError { message: String, attempt: u32 },
    ApiError(ErrorReport),
    NetworkError(ErrorReport),
    RefreshRequested { scope: Option<String> },
    SnapshotLoaded(LoadedSnapshot),
}

impl EventPayload {
    pub fn event_type(&self) -> EventType {
        match self {
            Self::Change(record) => record.event_type(),
            Self::Connected { .. } => EventType::SseConnected,
            Self::Disconnected { .. } => EventType::SseDisconnected,
            Self::TransportError { .. } => EventType::SseError,
            Self::ApiError(_) => EventType::ApiError,
            Self::NetworkError(_) => EventType::NetworkError,
            Self::RefreshRequested { .. } => EventType::RefreshRequested,
            Self::SnapshotLoaded(_) => EventType::SnapshotLoaded,
        }
    }
}

// ── Event ────────────────────────────────────────────────────────────

/// One published event. Immutable and shared as `Arc<Event>`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    /// Per-Dispatcher sequence number, strictly increasing.
    pub id: u64,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub payload: EventPayload,
    pub timestamp: DateTime<Utc>,
    pub source: EventSource,
}

impl Event {
    /// The change record, for entity lifecycle events.
    pub fn change(&self) -> Option<&ChangeRecord> {
        match &self.payload {
            EventPayload::Change(record) => Some(record),
            _ => None,
        }
    }

    /// The error report, for `api-error` / `network-error` events.
    pub fn error_report(&self) -> Option<&ErrorReport> {
        match &self.payload {
            EventPayload::ApiError(report) | EventPayload::NetworkError(report) => Some(report),
            _ => None,
        }
    }
}
