// ── SyncCoordinator ──
//
// Owns the entity cache writes and the tracking table. Entity events
// either consume an active tracking entry (the change is our own echo)
// or schedule a debounced refetch of the owning scope.

use std::collections::HashSet;
use std::sync::{Arc, Weak};
use std::time::Duration;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::tracking::TrackingTable;
use super::{Mutation, StateUpdate, UpdateCause};
use crate::backend::DataApi;
use crate::config::SyncConfig;
use crate::debounce::{Debouncer, sleep_until_deadline};
use crate::dispatcher::{Dispatcher, Subscription};
use crate::error::CoreError;
use crate::model::{
    ChangeKind, ChangeRecord, EntityKind, ErrorReport, Event, EventPayload, EventSource,
    EventType, LoadedSnapshot, Ticket,
};
use crate::store::EntityCache;

/// Invoked with refreshed entity lists.
pub type ChangeCallback = Arc<dyn Fn(&StateUpdate) + Send + Sync>;

/// Invoked with transport and coordination failures.
pub type ErrorCallback = Arc<dyn Fn(&CoreError) + Send + Sync>;

/// Event types the coordinator reacts to.
const HANDLED_EVENTS: [EventType; 11] = [
    EventType::TicketCreated,
    EventType::TicketUpdated,
    EventType::TicketDeleted,
    EventType::ProjectCreated,
    EventType::ProjectUpdated,
    EventType::ProjectDeleted,
    EventType::SnapshotLoaded,
    EventType::RefreshRequested,
    EventType::SseError,
    EventType::ApiError,
    EventType::NetworkError,
];

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum RefetchTarget {
    Tickets(String),
    Projects,
}

/// Reconciles optimistic mutations against change notifications.
///
/// Cheaply cloneable. `start()` must be called inside a Tokio runtime;
/// call `stop()` before dropping the last handle.
#[derive(Clone)]
pub struct SyncCoordinator {
    inner: Arc<CoordinatorInner>,
}

struct CoordinatorInner {
    dispatcher: Dispatcher,
    api: Arc<dyn DataApi>,
    cache: Arc<EntityCache>,
    tracking: TrackingTable,
    scope: String,
    debounce_window: Duration,
    on_change: ArcSwap<Vec<ChangeCallback>>,
    on_error: ArcSwap<Vec<ErrorCallback>>,
    /// Mutations sent but not yet answered by the server.
    in_flight: watch::Sender<usize>,
    refetch_tx: Mutex<Option<mpsc::UnboundedSender<RefetchTarget>>>,
    running: Mutex<Option<Running>>,
}

struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
    subscription: Subscription,
}

impl SyncCoordinator {
    pub fn new(
        config: &SyncConfig,
        dispatcher: Dispatcher,
        api: Arc<dyn DataApi>,
        cache: Arc<EntityCache>,
    ) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                dispatcher,
                api,
                cache,
                tracking: TrackingTable::new(config.tracking_ttl),
                scope: config.scope.clone(),
                debounce_window: config.debounce_window,
                on_change: ArcSwap::from_pointee(Vec::new()),
                on_error: ArcSwap::from_pointee(Vec::new()),
                in_flight: watch::channel(0).0,
                refetch_tx: Mutex::new(None),
                running: Mutex::new(None),
            }),
        }
    }

    pub fn cache(&self) -> &Arc<EntityCache> {
        &self.inner.cache
    }

    // ── Callbacks ────────────────────────────────────────────────────

    pub fn on_change<F>(&self, callback: F)
    where
        F: Fn(&StateUpdate) + Send + Sync + 'static,
    {
        let callback: ChangeCallback = Arc::new(callback);
        self.inner.on_change.rcu(|list| {
            let mut next = Vec::clone(list);
            next.push(Arc::clone(&callback));
            next
        });
    }

    pub fn on_error<F>(&self, callback: F)
    where
        F: Fn(&CoreError) + Send + Sync + 'static,
    {
        let callback: ErrorCallback = Arc::new(callback);
        self.inner.on_error.rcu(|list| {
            let mut next = Vec::clone(list);
            next.push(Arc::clone(&callback));
            next
        });
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Subscribe to the Dispatcher and spawn the refetch worker.
    pub fn start(&self) {
        let mut running = self.inner.running.lock();
        if running.is_some() {
            return;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        *self.inner.refetch_tx.lock() = Some(tx);

        let weak: Weak<CoordinatorInner> = Arc::downgrade(&self.inner);
        let subscription = self.inner.dispatcher.subscribe_many(HANDLED_EVENTS, move |event| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_event(event);
            }
            Ok(())
        });

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(&self.inner).refetch_loop(rx, cancel.clone()));
        *running = Some(Running {
            cancel,
            handle,
            subscription,
        });
        debug!(scope = %self.inner.scope, "sync coordinator started");
    }

    pub async fn stop(&self) {
        let running = self.inner.running.lock().take();
        self.inner.refetch_tx.lock().take();
        if let Some(Running {
            cancel,
            handle,
            subscription,
        }) = running
        {
            subscription.unsubscribe();
            cancel.cancel();
            if let Err(e) = handle.await {
                warn!(error = %e, "refetch worker did not exit cleanly");
            }
        }
        self.inner.tracking.clear();
    }

    // ── Optimistic updates ───────────────────────────────────────────

    /// Register (or refresh) a tracking entry for `key`.
    pub fn begin_optimistic_update(&self, key: &str) {
        self.inner.tracking.begin(key);
    }

    pub fn is_tracking(&self, key: &str) -> bool {
        self.inner.tracking.is_active(key)
    }

    /// Apply `mutation` to the cache now and send it to the server in the
    /// background.
    ///
    /// Returns the optimistic ticket (the removed one, for deletes) before
    /// the network call completes. A rejected call is reported through
    /// `on_error` and repaired by refetching the scope.
    pub fn apply_optimistic(&self, mutation: Mutation) -> Result<Arc<Ticket>, CoreError> {
        let inner = &self.inner;
        let scope = mutation.scope().to_owned();
        let key = mutation.key().to_owned();

        let optimistic = match &mutation {
            Mutation::Create(ticket) => {
                if inner.cache.contains_ticket(&scope, &key) {
                    return Err(CoreError::AlreadyExists { key });
                }
                inner.tracking.begin(&key);
                inner.cache.upsert_ticket(ticket.clone());
                Arc::new(ticket.clone())
            }
            Mutation::Update { patch, .. } => {
                let current = inner
                    .cache
                    .ticket(&scope, &key)
                    .ok_or_else(|| CoreError::NotFound { key: key.clone() })?;
                let merged = current.merged(patch)?;
                inner.tracking.begin(&key);
                inner.cache.upsert_ticket(merged.clone());
                Arc::new(merged)
            }
            Mutation::Delete { .. } => {
                let removed = inner
                    .cache
                    .remove_ticket(&scope, &key)
                    .ok_or_else(|| CoreError::NotFound { key: key.clone() })?;
                inner.tracking.begin(&key);
                removed
            }
        };

        info!(operation = %mutation.kind(), key = %key, "applied optimistic update");
        inner.notify_change(&StateUpdate::Tickets {
            tickets: inner.cache.tickets_snapshot(&scope),
            scope,
            cause: UpdateCause::Optimistic,
        });

        inner.in_flight.send_modify(|n| *n += 1);
        let task = Arc::clone(&self.inner);
        tokio::spawn(async move {
            task.send_mutation(mutation).await;
            task.in_flight.send_modify(|n| *n = n.saturating_sub(1));
        });

        Ok(optimistic)
    }

    pub fn in_flight(&self) -> usize {
        *self.inner.in_flight.borrow()
    }

    /// Wait until every mutation sent so far has been answered. Failures
    /// have reached `on_error` by the time this returns.
    pub async fn flush(&self) {
        let mut rx = self.inner.in_flight.subscribe();
        // The sender lives as long as `self`.
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    /// React to one change record: consume a matching tracking entry, or
    /// schedule a refetch.
    pub fn on_change_record(&self, record: &ChangeRecord) {
        self.inner.on_change_record(record);
    }

    /// Load projects and the active scope, replacing the cache.
    pub async fn refresh_all(&self) -> Result<(), CoreError> {
        let inner = &self.inner;
        let (projects, tickets) = tokio::join!(
            inner.api.list_projects(),
            inner.api.list_tickets(&inner.scope),
        );
        let projects = projects?;
        let tickets = tickets?;

        inner.cache.replace_projects(projects);
        inner.replace_scope(&inner.scope, tickets);
        inner.cache.mark_refreshed();
        debug!(
            projects = inner.cache.projects_snapshot().len(),
            tickets = inner.cache.ticket_count(&inner.scope),
            "full refresh complete"
        );

        inner.notify_change(&StateUpdate::Projects {
            projects: inner.cache.projects_snapshot(),
            cause: UpdateCause::Resync,
        });
        inner.notify_change(&StateUpdate::Tickets {
            scope: inner.scope.clone(),
            tickets: inner.cache.tickets_snapshot(&inner.scope),
            cause: UpdateCause::Resync,
        });
        Ok(())
    }
}

// ── Event handling ───────────────────────────────────────────────────

impl CoordinatorInner {
    fn handle_event(&self, event: &Event) {
        match &event.payload {
            EventPayload::Change(record) => self.on_change_record(record),
            EventPayload::SnapshotLoaded(snapshot) => self.apply_snapshot(snapshot),
            EventPayload::RefreshRequested { scope } => match scope {
                Some(scope) => self.request(RefetchTarget::Tickets(scope.clone())),
                None => {
                    self.request(RefetchTarget::Projects);
                    self.request(RefetchTarget::Tickets(self.scope.clone()));
                }
            },
            EventPayload::TransportError { message, .. } => {
                self.notify_error(&CoreError::Transport {
                    message: message.clone(),
                });
            }
            EventPayload::NetworkError(report) => {
                self.notify_error(&CoreError::Transport {
                    message: describe(report),
                });
            }
            // Mutation failures are reported directly with their richer
            // error; skip their api-error echo.
            EventPayload::ApiError(report) if event.source != EventSource::Ui => {
                self.notify_error(&CoreError::Api {
                    message: describe(report),
                    status: None,
                });
            }
            _ => {}
        }
    }

    fn on_change_record(&self, record: &ChangeRecord) {
        match record.entity {
            EntityKind::Ticket => {
                if self.tracking.consume(&record.key) {
                    debug!(key = %record.key, kind = %record.kind, "suppressed echo of local change");
                    return;
                }
                debug!(key = %record.key, scope = %record.scope, "change detected, scheduling refetch");
                self.request(RefetchTarget::Tickets(record.scope.clone()));
            }
            EntityKind::Project => {
                if record.kind == ChangeKind::Deleted {
                    self.cache.remove_project(&record.key);
                }
                self.request(RefetchTarget::Projects);
            }
        }
    }

    fn apply_snapshot(&self, snapshot: &LoadedSnapshot) {
        self.replace_scope(&snapshot.scope, snapshot.tickets.as_ref().clone());
        self.cache.mark_refreshed();
        self.notify_change(&StateUpdate::Tickets {
            scope: snapshot.scope.clone(),
            tickets: self.cache.tickets_snapshot(&snapshot.scope),
            cause: UpdateCause::Resync,
        });
    }

    /// Replace a scope with server state, keeping the speculative state of
    /// tickets whose mutation is still in flight.
    fn replace_scope(&self, scope: &str, fresh: Vec<Ticket>) {
        let tracked: HashSet<String> = self.tracking.active_keys().into_iter().collect();

        let mut tickets: Vec<Ticket> = fresh
            .into_iter()
            .filter(|t| !tracked.contains(&t.key))
            .collect();
        for key in &tracked {
            if let Some(local) = self.cache.ticket(scope, key) {
                tickets.push(local.as_ref().clone());
            }
        }

        self.cache.replace_tickets(scope, tickets);
    }

    // ── Refetch ──────────────────────────────────────────────────────

    fn request(&self, target: RefetchTarget) {
        match self.refetch_tx.lock().as_ref() {
            Some(tx) => {
                if tx.send(target).is_err() {
                    debug!("refetch worker gone, dropping request");
                }
            }
            None => debug!(?target, "coordinator stopped, dropping refetch request"),
        }
    }

    async fn refetch_loop(
        self: Arc<Self>,
        mut rx: mpsc::UnboundedReceiver<RefetchTarget>,
        cancel: CancellationToken,
    ) {
        let mut pending: Debouncer<RefetchTarget, RefetchTarget> =
            Debouncer::new(self.debounce_window);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = sleep_until_deadline(pending.next_deadline()) => {
                    for target in pending.take_ready() {
                        self.refetch(target).await;
                    }
                }
                target = rx.recv() => {
                    let Some(target) = target else { break };
                    pending.push(target.clone(), target);
                }
            }
        }
        debug!("refetch worker exiting");
    }

    async fn refetch(&self, target: RefetchTarget) {
        match target {
            RefetchTarget::Tickets(scope) => match self.api.list_tickets(&scope).await {
                Ok(tickets) => {
                    self.replace_scope(&scope, tickets);
                    self.notify_change(&StateUpdate::Tickets {
                        tickets: self.cache.tickets_snapshot(&scope),
                        scope,
                        cause: UpdateCause::Refetch,
                    });
                }
                Err(e) => self.refetch_failed(&e, &scope),
            },
            RefetchTarget::Projects => match self.api.list_projects().await {
                Ok(projects) => {
                    self.cache.replace_projects(projects);
                    self.notify_change(&StateUpdate::Projects {
                        projects: self.cache.projects_snapshot(),
                        cause: UpdateCause::Refetch,
                    });
                }
                Err(e) => self.refetch_failed(&e, "projects"),
            },
        }
    }

    fn refetch_failed(&self, error: &CoreError, what: &str) {
        warn!(error = %error, target = what, "refetch failed");
        self.dispatcher.publish(
            EventPayload::NetworkError(
                ErrorReport::new(error.to_string()).with_context(format!("refetch {what}")),
            ),
            EventSource::System,
        );
    }

    // ── Mutations ────────────────────────────────────────────────────

    async fn send_mutation(&self, mutation: Mutation) {
        let result = match &mutation {
            Mutation::Create(ticket) => self.api.create_ticket(ticket).await,
            Mutation::Update { scope, key, patch } => {
                self.api.update_ticket(scope, key, patch).await
            }
            Mutation::Delete { scope, key } => self.api.delete_ticket(scope, key).await,
        };

        match result {
            Ok(()) => debug!(operation = %mutation.kind(), key = mutation.key(), "mutation accepted"),
            Err(e) => self.mutation_failed(&mutation, &e),
        }
    }

    fn mutation_failed(&self, mutation: &Mutation, cause: &CoreError) {
        let key = mutation.key();
        self.tracking.forget(key);

        let error = CoreError::MutationFailed {
            operation: mutation.kind(),
            key: key.to_owned(),
            reason: cause.to_string(),
        };
        warn!(error = %error, "mutation rejected, refetching scope");

        self.notify_error(&error);
        self.dispatcher.publish(
            EventPayload::ApiError(
                ErrorReport::new(error.to_string())
                    .with_context(format!("{} {key}", mutation.kind())),
            ),
            EventSource::Ui,
        );
        self.request(RefetchTarget::Tickets(mutation.scope().to_owned()));
    }

    // ── Callbacks ────────────────────────────────────────────────────

    fn notify_change(&self, update: &StateUpdate) {
        for callback in self.on_change.load().iter() {
            callback(update);
        }
    }

    fn notify_error(&self, error: &CoreError) {
        for callback in self.on_error.load().iter() {
            callback(error);
        }
    }
}

fn describe(report: &ErrorReport) -> String {
    match &report.context {
        Some(context) => format!("{context}: {}", report.message),
        None => report.message.clone(),
    }
}
