// ── API-to-domain type conversions ──
//
// Bridges raw `mdtsync_api` wire records and the domain model. Tickets
// carry no scope on the wire, so the owning project is passed in.

use mdtsync_api::{ProjectRecord, TicketRecord};

use crate::model::{Project, Ticket};

impl Ticket {
    pub fn from_record(scope: &str, record: TicketRecord) -> Self {
        Self {
            key: record.code,
            scope: scope.to_owned(),
            title: record.title,
            status: record.status,
            priority: record.priority,
            ticket_type: record.ticket_type,
            last_modified: record.last_modified,
            fields: record.extra,
        }
    }

    /// Wire body for `POST /entities/{scope}/{key}`.
    pub fn to_record(&self) -> TicketRecord {
        TicketRecord {
            code: self.key.clone(),
            title: self.title.clone(),
            status: self.status.clone(),
            ticket_type: self.ticket_type.clone(),
            priority: self.priority.clone(),
            last_modified: self.last_modified,
            extra: self.fields.clone(),
        }
    }
}

impl From<ProjectRecord> for Project {
    fn from(record: ProjectRecord) -> Self {
        let name = if record.name.is_empty() {
            record.id.clone()
        } else {
            record.name
        };
        Self {
            id: record.id,
            name,
            code: record.code,
            description: record.description,
            last_modified: record.last_modified,
        }
    }
}
