// ── Sync coordination ──
//
// Reconciles optimistic local mutations with change notifications and
// drives refetch-on-change for everything else.

mod coordinator;
mod tracking;

use serde::Serialize;
use strum::Display;

use crate::model::{Project, Ticket, TicketPatch};
use crate::stream::Snapshot;

pub use coordinator::{ChangeCallback, ErrorCallback, SyncCoordinator};

// ── Mutations ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MutationKind {
    Create,
    Update,
    Delete,
}

/// A locally initiated change to one ticket.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    Create(Ticket),
    Update {
        scope: String,
        key: String,
        patch: TicketPatch,
    },
    Delete {
        scope: String,
        key: String,
    },
}

impl Mutation {
    pub fn kind(&self) -> MutationKind {
        match self {
            Self::Create(_) => MutationKind::Create,
            Self::Update { .. } => MutationKind::Update,
            Self::Delete { .. } => MutationKind::Delete,
        }
    }

    /// The tracking key: the ticket key the server will echo back.
    pub fn key(&self) -> &str {
        match self {
            Self::Create(ticket) => &ticket.key,
            Self::Update { key, .. } | Self::Delete { key, .. } => key,
        }
    }

    pub fn scope(&self) -> &str {
        match self {
            Self::Create(ticket) => &ticket.scope,
            Self::Update { scope, .. } | Self::Delete { scope, .. } => scope,
        }
    }
}

// ── State updates ────────────────────────────────────────────────────

/// Why the cache changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum UpdateCause {
    /// A local mutation was applied ahead of the server.
    Optimistic,
    /// An unmatched change notification triggered a refetch.
    Refetch,
    /// The full load after (re)connecting or at startup.
    Resync,
}

/// Payload handed to `on_change` callbacks.
#[derive(Debug, Clone)]
pub enum StateUpdate {
    Tickets {
        scope: String,
        tickets: Snapshot<Ticket>,
        cause: UpdateCause,
    },
    Projects {
        projects: Snapshot<Project>,
        cause: UpdateCause,
    },
}

impl StateUpdate {
    pub fn cause(&self) -> UpdateCause {
        match self {
            Self::Tickets { cause, .. } | Self::Projects { cause, .. } => *cause,
        }
    }
}
