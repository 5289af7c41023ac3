// ── Domain model ──
//
// Events routed by the Dispatcher, and the ticket/project entities the
// cache holds. Wire types from `mdtsync-api` are converted in `convert`.

pub mod event;
pub mod ticket;

// ── Re-exports ──────────────────────────────────────────────────────

pub use event::{
    ChangeKind, ChangeRecord, EntityKind, ErrorReport, Event, EventPayload, EventSource,
    EventType, LoadedSnapshot,
};
pub use ticket::{Project, Ticket, TicketPatch};
