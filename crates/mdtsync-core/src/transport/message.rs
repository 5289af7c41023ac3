// ── Stream message classification ──
//
// Turns decoded stream messages into change records. Only entity-change
// messages produce records; everything else is a no-op.

use chrono::Utc;
use tracing::{debug, trace};

use mdtsync_api::{FileEventKind, StreamMessage};

use crate::model::{ChangeKind, ChangeRecord};

/// Map one stream message to a change record, if it describes one.
///
/// `active_scope` is used when a file-change message names no project.
pub(crate) fn change_record(message: StreamMessage, active_scope: &str) -> Option<ChangeRecord> {
    match message {
        StreamMessage::FileChange(change) => {
            let Some(key) = ticket_key(&change.filename) else {
                debug!(filename = %change.filename, "ignoring change to non-ticket file");
                return None;
            };
            let timestamp = change.timestamp().unwrap_or_else(Utc::now);
            let scope = change
                .project_id
                .unwrap_or_else(|| active_scope.to_owned());
            Some(ChangeRecord::ticket(
                change_kind(change.event_type),
                scope,
                key,
                timestamp,
            ))
        }
        StreamMessage::ProjectChange(change) => {
            let timestamp = change.timestamp().unwrap_or_else(Utc::now);
            Some(ChangeRecord::project(
                change_kind(change.event_type),
                change.project_id,
                timestamp,
            ))
        }
        StreamMessage::Connection(data) => {
            debug!(%data, "stream hello");
            None
        }
        StreamMessage::Heartbeat => {
            trace!("stream heartbeat");
            None
        }
        StreamMessage::Unknown(kind) => {
            debug!(kind = %kind, "ignoring unknown stream message type");
            None
        }
    }
}

fn change_kind(kind: FileEventKind) -> ChangeKind {
    match kind {
        FileEventKind::Add => ChangeKind::Created,
        FileEventKind::Change => ChangeKind::Modified,
        FileEventKind::Unlink => ChangeKind::Deleted,
    }
}

/// `"docs/CRs/MDT-001.md"` -> `"MDT-001"`. Non-markdown files are not tickets.
fn ticket_key(filename: &str) -> Option<&str> {
    let name = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    name.strip_suffix(".md").filter(|key| !key.is_empty())
}
