// Wire types for the data API and the change stream.
//
// These mirror the server's JSON exactly. Domain types live in
// `mdtsync-core`; nothing here carries sync semantics.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ── Data API ─────────────────────────────────────────────────────────

/// One ticket as returned by `GET /entities/{scope}`.
///
/// Fields the engine doesn't interpret are kept in `extra` so a
/// round-trip through the cache never drops frontmatter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketRecord {
    /// Ticket key, e.g. `"MDT-042"`.
    #[serde(alias = "key")]
    pub code: String,

    #[serde(default)]
    pub title: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub ticket_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,

    /// Modification time of the backing markdown file.
    pub last_modified: DateTime<Utc>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One project as returned by `GET /projects`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRecord {
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Error body the server sends alongside non-2xx responses.
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default, alias = "message")]
    pub error: Option<String>,
}

// ── Change stream ────────────────────────────────────────────────────

/// Raw envelope of every stream frame: `{ "type": ..., "data": ... }`.
#[derive(Debug, Deserialize)]
struct StreamEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

/// File-system level change kind reported by the server's watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileEventKind {
    Add,
    Change,
    Unlink,
}

/// Payload of a `file-change` message.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileChange {
    pub event_type: FileEventKind,
    pub filename: String,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    timestamp: Option<Value>,
}

impl FileChange {
    /// Event time, accepting either epoch milliseconds or RFC 3339.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp.as_ref().and_then(parse_timestamp)
    }
}

/// Payload of a `project-change` message.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectChange {
    pub event_type: FileEventKind,
    pub project_id: String,
    #[serde(default)]
    timestamp: Option<Value>,
}

impl ProjectChange {
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp.as_ref().and_then(parse_timestamp)
    }
}

/// A classified stream message.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamMessage {
    FileChange(FileChange),
    ProjectChange(ProjectChange),
    /// Server hello sent right after the handshake.
    Connection(Value),
    Heartbeat,
    /// A message type this client doesn't know. Carries the type tag.
    Unknown(String),
}

impl StreamMessage {
    /// Classify one JSON frame by its embedded `type` tag.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let envelope: StreamEnvelope = serde_json::from_str(text)?;
        let message = match envelope.kind.as_str() {
            "file-change" => Self::FileChange(serde_json::from_value(envelope.data)?),
            "project-change" => Self::ProjectChange(serde_json::from_value(envelope.data)?),
            "connection" => Self::Connection(envelope.data),
            "heartbeat" => Self::Heartbeat,
            _ => Self::Unknown(envelope.kind),
        };
        Ok(message)
    }
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|t| t.with_timezone(&Utc)),
        _ => None,
    }
}
