//! Real-time state synchronization for a markdown-ticket tracker.
//!
//! Keeps an in-process cache of tickets and projects consistent with a
//! server whose files change underneath it, while letting the UI apply
//! edits optimistically:
//!
//! - **[`Dispatcher`]** — Typed publish/subscribe hub. Handlers run
//!   synchronously in subscription order; failures are contained and
//!   re-emitted as `api-error` until the circuit breaker trips. Bounded
//!   history for diagnostics.
//!
//! - **[`ChangeTransport`]** — Streaming-first change feed. Reconnects
//!   with exponential backoff, falls back to snapshot-diff polling when
//!   the stream stays down, and only returns to streaming on
//!   [`enable_streaming()`](ChangeTransport::enable_streaming).
//!
//! - **[`SyncCoordinator`]** — Applies mutations to the cache before the
//!   server confirms them, suppresses the echo of those mutations through
//!   a TTL-bounded tracking table, and turns every other change into a
//!   debounced refetch.
//!
//! - **[`SyncEngine`]** — Facade owning one of each, wired to the same
//!   Dispatcher. Most consumers only need this.
//!
//! - **[`EntityCache`]** / **[`EntityStream<T>`]** — Reactive storage
//!   (`DashMap` + `tokio::sync::watch`) with per-scope ticket collections.

pub mod backend;
pub mod config;
pub mod convert;
pub(crate) mod debounce;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod model;
pub mod store;
pub mod stream;
pub mod sync;
pub mod transport;

// ── Primary re-exports ──────────────────────────────────────────────
pub use backend::{DataApi, StreamConnector};
pub use config::{ReconnectConfig, SyncConfig, TlsVerification};
pub use dispatcher::{Dispatcher, Subscription};
pub use engine::SyncEngine;
pub use error::{CoreError, HandlerError};
pub use store::EntityCache;
pub use stream::{EntityStream, Snapshot};
pub use sync::{Mutation, MutationKind, StateUpdate, SyncCoordinator, UpdateCause};
pub use transport::{ChangeTransport, ConnectionState};

pub use model::{
    ChangeKind, ChangeRecord, EntityKind, ErrorReport, Event, EventPayload, EventSource,
    EventType, LoadedSnapshot, Project, Ticket, TicketPatch,
};
