// ── Dispatcher ──
//
// In-process typed publish/subscribe hub. One instance is built by the
// engine and handed to the transport and coordinator; nothing here is
// global. Handler failures (errors and panics) are contained and bounded
// by a circuit breaker.

use std::collections::{HashMap, VecDeque};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, trace, warn};

use crate::error::{CoreError, HandlerError};
use crate::model::{ErrorReport, Event, EventPayload, EventSource, EventType};

pub const DEFAULT_HISTORY_CAPACITY: usize = 100;
pub const DEFAULT_ERROR_THRESHOLD: u32 = 10;

/// Subscriber callback. Runs synchronously inside `publish`.
pub type Handler = Arc<dyn Fn(&Event) -> Result<(), HandlerError> + Send + Sync>;

struct Listener {
    id: u64,
    handler: Handler,
}

/// Cheaply cloneable handle to a shared event hub.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Per-type listener lists, in subscription order. A type with no
    /// listeners has no entry.
    listeners: RwLock<HashMap<EventType, Vec<Listener>>>,
    history: Mutex<VecDeque<Arc<Event>>>,
    history_capacity: usize,
    next_event_id: AtomicU64,
    next_listener_id: AtomicU64,
    error_count: AtomicU32,
    error_threshold: u32,
    /// Set once the breaker has logged its diagnostic; cleared on reset.
    breaker_logged: AtomicBool,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY, DEFAULT_ERROR_THRESHOLD)
    }
}

impl Dispatcher {
    pub fn new(history_capacity: usize, error_threshold: u32) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                listeners: RwLock::new(HashMap::new()),
                history: Mutex::new(VecDeque::with_capacity(history_capacity)),
                history_capacity,
                next_event_id: AtomicU64::new(0),
                next_listener_id: AtomicU64::new(0),
                error_count: AtomicU32::new(0),
                error_threshold,
                breaker_logged: AtomicBool::new(false),
            }),
        }
    }

    // ── Subscription ─────────────────────────────────────────────────

    /// Register `handler` for one event type.
    pub fn subscribe<F>(&self, event_type: EventType, handler: F) -> Subscription
    where
        F: Fn(&Event) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.subscribe_many([event_type], handler)
    }

    /// Register one handler for several event types. A single
    /// [`Subscription`] removes all of them.
    pub fn subscribe_many<F>(
        &self,
        event_types: impl IntoIterator<Item = EventType>,
        handler: F,
    ) -> Subscription
    where
        F: Fn(&Event) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let handler: Handler = Arc::new(handler);
        let mut entries = Vec::new();
        let mut listeners = self.inner.listeners.write();

        for event_type in event_types {
            let id = self.inner.next_listener_id.fetch_add(1, Ordering::Relaxed);
            listeners.entry(event_type).or_default().push(Listener {
                id,
                handler: Arc::clone(&handler),
            });
            entries.push((event_type, id));
        }

        Subscription {
            dispatcher: Arc::downgrade(&self.inner),
            entries,
        }
    }

    pub fn listener_count(&self, event_type: EventType) -> usize {
        self.inner
            .listeners
            .read()
            .get(&event_type)
            .map_or(0, Vec::len)
    }

    // ── Publishing ───────────────────────────────────────────────────

    /// Publish an event and run every current subscriber of its type.
    ///
    /// Returns the recorded event. Handler failures never reach the
    /// caller.
    pub fn publish(&self, payload: EventPayload, source: EventSource) -> Arc<Event> {
        let event_type = payload.event_type();
        let event = Arc::new(Event {
            id: self.inner.next_event_id.fetch_add(1, Ordering::Relaxed) + 1,
            event_type,
            payload,
            timestamp: Utc::now(),
            source,
        });

        self.record(&event);

        // Clone the handler list out so handlers may publish or
        // (un)subscribe without deadlocking.
        let handlers: Vec<Handler> = self
            .inner
            .listeners
            .read()
            .get(&event_type)
            .map(|list| list.iter().map(|l| Arc::clone(&l.handler)).collect())
            .unwrap_or_default();

        if handlers.is_empty() {
            debug!(event_type = %event_type, id = event.id, "no listeners for event");
            return event;
        }

        trace!(event_type = %event_type, id = event.id, listeners = handlers.len(), "dispatching");
        for handler in handlers {
            let outcome = catch_unwind(AssertUnwindSafe(|| handler(&event)));
            let failure = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e.to_string(),
                Err(panic) => panic_message(panic.as_ref()),
            };
            self.handler_failed(&event, &failure);
        }

        event
    }

    fn record(&self, event: &Arc<Event>) {
        if self.inner.history_capacity == 0 {
            return;
        }
        let mut history = self.inner.history.lock();
        while history.len() >= self.inner.history_capacity {
            history.pop_front();
        }
        history.push_back(Arc::clone(event));
    }

    fn handler_failed(&self, event: &Event, failure: &str) {
        let count = self.inner.error_count.fetch_add(1, Ordering::SeqCst) + 1;
        let error = CoreError::Handler {
            event_type: event.event_type,
            message: failure.to_owned(),
        };
        warn!(id = event.id, error_count = count, error = %error, "event handler failed");

        if event.event_type.is_error_class() {
            return;
        }

        if count >= self.inner.error_threshold {
            if !self.inner.breaker_logged.swap(true, Ordering::SeqCst) {
                error!(
                    threshold = self.inner.error_threshold,
                    "handler error threshold reached, suppressing api-error emission"
                );
            }
            return;
        }

        let report = ErrorReport::new(error.to_string()).with_context(event.event_type.to_string());
        self.publish(EventPayload::ApiError(report), EventSource::System);
    }

    // ── Circuit breaker ──────────────────────────────────────────────

    pub fn error_count(&self) -> u32 {
        self.inner.error_count.load(Ordering::SeqCst)
    }

    /// Whether `api-error` emission is currently suppressed.
    pub fn is_circuit_open(&self) -> bool {
        self.error_count() >= self.inner.error_threshold
    }

    pub fn reset_error_count(&self) {
        self.inner.error_count.store(0, Ordering::SeqCst);
        self.inner.breaker_logged.store(false, Ordering::SeqCst);
        debug!("handler error count reset");
    }

    // ── Introspection ────────────────────────────────────────────────

    /// The last `n` events, oldest first.
    pub fn recent_history(&self, n: usize) -> Vec<Arc<Event>> {
        let history = self.inner.history.lock();
        let skip = history.len().saturating_sub(n);
        history.iter().skip(skip).cloned().collect()
    }

    /// Every retained event of one type, oldest first.
    pub fn history_by_type(&self, event_type: EventType) -> Vec<Arc<Event>> {
        self.inner
            .history
            .lock()
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".into()
    }
}

// ── Subscription ─────────────────────────────────────────────────────

/// Handle returned by [`Dispatcher::subscribe`].
///
/// Dropping it does NOT unsubscribe; call [`unsubscribe`](Self::unsubscribe).
pub struct Subscription {
    dispatcher: Weak<DispatcherInner>,
    entries: Vec<(EventType, u64)>,
}

impl Subscription {
    /// Remove the handler from every type it was registered for.
    /// Removing the last listener of a type releases its slot.
    pub fn unsubscribe(self) {
        let Some(inner) = self.dispatcher.upgrade() else {
            return;
        };
        let mut listeners = inner.listeners.write();
        for (event_type, id) in self.entries {
            if let Some(list) = listeners.get_mut(&event_type) {
                list.retain(|l| l.id != id);
                if list.is_empty() {
                    listeners.remove(&event_type);
                }
            }
        }
    }

    pub fn event_types(&self) -> impl Iterator<Item = EventType> + '_ {
        self.entries.iter().map(|(t, _)| *t)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("entries", &self.entries)
            .finish_non_exhaustive()
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::model::{ChangeKind, ChangeRecord};

    fn updated(key: &str) -> EventPayload {
        EventPayload::Change(ChangeRecord::ticket(
            ChangeKind::Modified,
            "MDT",
            key,
            Utc::now(),
        ))
    }

    fn failing(_: &Event) -> Result<(), HandlerError> {
        Err("boom".into())
    }

    #[test]
    fn delivers_in_subscription_order() {
        let dispatcher = Dispatcher::default();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["a", "b", "c"] {
            let seen = Arc::clone(&seen);
            let _sub = dispatcher.subscribe(EventType::TicketUpdated, move |_| {
                seen.lock().push(tag);
                Ok(())
            });
        }

        dispatcher.publish(updated("MDT-1"), EventSource::Stream);
        assert_eq!(*seen.lock(), vec!["a", "b", "c"]);
    }

    #[test]
    fn ids_increase_and_type_follows_payload() {
        let dispatcher = Dispatcher::default();
        let first = dispatcher.publish(updated("MDT-1"), EventSource::Stream);
        let second = dispatcher.publish(
            EventPayload::RefreshRequested { scope: None },
            EventSource::Ui,
        );
        assert!(second.id > first.id);
        assert_eq!(first.event_type, EventType::TicketUpdated);
        assert_eq!(second.event_type, EventType::RefreshRequested);
    }

    #[test]
    fn unsubscribe_releases_slot() {
        let dispatcher = Dispatcher::default();
        let first = dispatcher.subscribe(EventType::TicketCreated, |_| Ok(()));
        let second = dispatcher.subscribe_many(
            [EventType::TicketCreated, EventType::TicketDeleted],
            |_| Ok(()),
        );
        assert_eq!(dispatcher.listener_count(EventType::TicketCreated), 2);

        first.unsubscribe();
        assert_eq!(dispatcher.listener_count(EventType::TicketCreated), 1);

        second.unsubscribe();
        assert_eq!(dispatcher.listener_count(EventType::TicketCreated), 0);
        assert_eq!(dispatcher.listener_count(EventType::TicketDeleted), 0);
        assert!(dispatcher.inner.listeners.read().is_empty());
    }

    #[test]
    fn history_is_bounded() {
        let dispatcher = Dispatcher::new(100, 10);
        for i in 0..150 {
            dispatcher.publish(updated(&format!("MDT-{i}")), EventSource::Stream);
        }
        let recent = dispatcher.recent_history(1000);
        assert_eq!(recent.len(), 100);
        assert_eq!(recent[0].id, 51);
        assert_eq!(recent[99].id, 150);
        assert_eq!(dispatcher.recent_history(3).len(), 3);
        assert_eq!(dispatcher.history_by_type(EventType::TicketUpdated).len(), 100);
    }

    #[test]
    fn failing_handler_does_not_stop_others() {
        let dispatcher = Dispatcher::default();
        let calls = Arc::new(AtomicUsize::new(0));

        let _a = dispatcher.subscribe(EventType::TicketUpdated, |_| panic!("handler exploded"));
        let _b = dispatcher.subscribe(EventType::TicketUpdated, failing);
        let counter = Arc::clone(&calls);
        let _c = dispatcher.subscribe(EventType::TicketUpdated, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        dispatcher.publish(updated("MDT-1"), EventSource::Stream);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.error_count(), 2);
        let errors = dispatcher.history_by_type(EventType::ApiError);
        assert_eq!(errors.len(), 2);
        assert!(
            errors[0]
                .error_report()
                .unwrap()
                .message
                .contains("handler exploded")
        );
    }

    #[test]
    fn circuit_breaker_suppresses_tenth_error() {
        let dispatcher = Dispatcher::default();
        let _sub = dispatcher.subscribe(EventType::TicketUpdated, failing);

        for i in 0..10 {
            dispatcher.publish(updated(&format!("MDT-{i}")), EventSource::Stream);
        }

        assert_eq!(dispatcher.history_by_type(EventType::ApiError).len(), 9);
        assert!(dispatcher.is_circuit_open());

        dispatcher.reset_error_count();
        assert!(!dispatcher.is_circuit_open());
        dispatcher.publish(updated("MDT-x"), EventSource::Stream);
        assert_eq!(dispatcher.history_by_type(EventType::ApiError).len(), 10);
    }

    #[test]
    fn error_class_failures_are_not_reemitted() {
        let dispatcher = Dispatcher::default();
        let _sub = dispatcher.subscribe(EventType::ApiError, failing);

        dispatcher.publish(
            EventPayload::ApiError(ErrorReport::new("upstream")),
            EventSource::Api,
        );

        assert_eq!(dispatcher.error_count(), 1);
        assert_eq!(dispatcher.history_by_type(EventType::ApiError).len(), 1);
    }

    #[test]
    fn failing_error_subscriber_cannot_loop() {
        let dispatcher = Dispatcher::default();
        let _a = dispatcher.subscribe(EventType::TicketUpdated, failing);
        let _b = dispatcher.subscribe(EventType::ApiError, failing);

        dispatcher.publish(updated("MDT-1"), EventSource::Stream);

        // one for the update handler, one for the api-error handler
        assert_eq!(dispatcher.error_count(), 2);
        assert_eq!(dispatcher.history_by_type(EventType::ApiError).len(), 1);
    }

    #[test]
    fn handlers_may_publish_and_subscribe_reentrantly() {
        let dispatcher = Dispatcher::default();
        let inner = dispatcher.clone();
        let _sub = dispatcher.subscribe(EventType::TicketCreated, move |_| {
            let _late = inner.subscribe(EventType::RefreshRequested, |_| Ok(()));
            inner.publish(
                EventPayload::RefreshRequested { scope: None },
                EventSource::System,
            );
            Ok(())
        });

        dispatcher.publish(
            EventPayload::Change(ChangeRecord::ticket(
                ChangeKind::Created,
                "MDT",
                "MDT-2",
                Utc::now(),
            )),
            EventSource::Ui,
        );

        assert_eq!(dispatcher.listener_count(EventType::RefreshRequested), 1);
        assert_eq!(dispatcher.recent_history(10).len(), 2);
    }
}
