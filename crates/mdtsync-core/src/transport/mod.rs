// ── Change transport ──
//
// Keeps "something changed" flowing into the Dispatcher whatever the
// health of the change stream. One background task owns the connection
// state machine:
//
//   stopped -> connecting -> connected -> reconnecting -> connecting ...
//                                          \-> polling (after max attempts)
//
// Polling never returns to streaming on its own; `enable_streaming()` is
// the only way back.

pub mod backoff;
mod message;
mod poll;

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use parking_lot::Mutex;
use serde::Serialize;
use strum::Display;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use mdtsync_api::MessageStream;

use crate::backend::{DataApi, StreamConnector};
use crate::config::{ReconnectConfig, SyncConfig};
use crate::debounce::{Debouncer, sleep_until_deadline};
use crate::dispatcher::Dispatcher;
use crate::error::CoreError;
use crate::model::{
    ChangeRecord, EntityKind, ErrorReport, EventPayload, EventSource, LoadedSnapshot,
};

pub use backoff::reconnect_delay;

// ── ConnectionState ──────────────────────────────────────────────────

/// Connection state observable by consumers. Only the transport writes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[strum(serialize_all = "lowercase")]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum ConnectionState {
    Stopped,
    Connecting,
    Connected,
    /// Waiting out the backoff before reconnect attempt `attempt` (1-based).
    Reconnecting { attempt: u32 },
    Polling,
}

// ── ChangeTransport ──────────────────────────────────────────────────

/// Streaming-first change feed with polling fallback.
///
/// Cheaply cloneable. `start()` must be called inside a Tokio runtime.
#[derive(Clone)]
pub struct ChangeTransport {
    inner: Arc<TransportInner>,
}

struct TransportInner {
    dispatcher: Dispatcher,
    api: Arc<dyn DataApi>,
    connector: Arc<dyn StreamConnector>,
    scope: String,
    reconnect: ReconnectConfig,
    polling_interval: Duration,
    debounce_window: Duration,
    state: watch::Sender<ConnectionState>,
    /// Wakes the polling loop for a manual return to streaming.
    resume: Notify,
    running: Mutex<Option<Running>>,
}

struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// How a live stream session ended.
enum SessionEnd {
    Cancelled,
    Closed,
    Failed(CoreError),
}

impl ChangeTransport {
    pub fn new(
        config: &SyncConfig,
        dispatcher: Dispatcher,
        api: Arc<dyn DataApi>,
        connector: Arc<dyn StreamConnector>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Stopped);
        Self {
            inner: Arc::new(TransportInner {
                dispatcher,
                api,
                connector,
                scope: config.scope.clone(),
                reconnect: config.reconnect.clone(),
                polling_interval: config.polling_interval,
                debounce_window: config.debounce_window,
                state,
                resume: Notify::new(),
                running: Mutex::new(None),
            }),
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// `stopped -> connecting`. A no-op if already running.
    pub fn start(&self) {
        let mut running = self.inner.running.lock();
        if running.is_some() {
            debug!("change transport already running");
            return;
        }

        let cancel = CancellationToken::new();
        self.inner.set_state(ConnectionState::Connecting);
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(inner.run(cancel.clone()));
        *running = Some(Running { cancel, handle });
    }

    /// Tear down the stream, the polling timer and any pending backoff,
    /// then wait for the background task to exit.
    pub async fn stop(&self) {
        let running = self.inner.running.lock().take();
        if let Some(Running { cancel, handle }) = running {
            cancel.cancel();
            if let Err(e) = handle.await {
                warn!(error = %e, "change transport task did not exit cleanly");
            }
        }
        self.inner.set_state(ConnectionState::Stopped);
    }

    /// Manual `polling -> connecting`. Returns `false` (and does nothing)
    /// when the transport is not polling.
    ///
    /// The state flips to `Connecting` here, so a repeated call before the
    /// background task wakes sees `Connecting` and cannot leave a stale
    /// resume permit for the next polling phase.
    pub fn enable_streaming(&self) -> bool {
        let resumed = self.inner.state.send_if_modified(|state| {
            if *state == ConnectionState::Polling {
                *state = ConnectionState::Connecting;
                true
            } else {
                false
            }
        });
        if !resumed {
            return false;
        }
        info!("streaming re-enabled manually");
        self.inner.resume.notify_one();
        true
    }

    // ── State observation ────────────────────────────────────────────

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }
}

// ── Background state machine ─────────────────────────────────────────

impl TransportInner {
    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "connection state changed");
        }
    }

    fn publish(&self, payload: EventPayload, source: EventSource) {
        self.dispatcher.publish(payload, source);
    }

    /// Main loop: connect -> read -> on failure, backoff -> reconnect,
    /// until the attempt budget is spent and polling takes over.
    async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut attempts: u32 = 0;

        loop {
            self.set_state(ConnectionState::Connecting);

            let connected = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                result = self.connector.connect() => result,
            };

            match connected {
                Ok(stream) => {
                    attempts = 0;
                    self.set_state(ConnectionState::Connected);
                    info!(url = %self.connector.endpoint(), "change stream connected");
                    self.publish(
                        EventPayload::Connected {
                            url: self.connector.endpoint(),
                        },
                        EventSource::Stream,
                    );

                    if !self.resync(&cancel).await {
                        break;
                    }

                    match self.pump(stream, &cancel).await {
                        SessionEnd::Cancelled => break,
                        SessionEnd::Closed => {
                            info!("change stream closed by server");
                            self.publish(
                                EventPayload::Disconnected {
                                    reason: "stream closed".into(),
                                },
                                EventSource::Stream,
                            );
                        }
                        SessionEnd::Failed(e) => {
                            warn!(error = %e, "change stream failed");
                            self.publish(
                                EventPayload::TransportError {
                                    message: e.to_string(),
                                    attempt: attempts,
                                },
                                EventSource::Stream,
                            );
                            self.publish(
                                EventPayload::Disconnected {
                                    reason: e.to_string(),
                                },
                                EventSource::Stream,
                            );
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, attempt = attempts, "change stream handshake failed");
                    self.publish(
                        EventPayload::TransportError {
                            message: e.to_string(),
                            attempt: attempts,
                        },
                        EventSource::Stream,
                    );
                }
            }

            if attempts >= self.reconnect.max_attempts {
                warn!(
                    max_attempts = self.reconnect.max_attempts,
                    interval_ms = duration_ms(self.polling_interval),
                    "reconnect limit reached, falling back to polling"
                );
                if !self.poll_until_resumed(&cancel).await {
                    break;
                }
                attempts = 0;
                continue;
            }

            let delay = reconnect_delay(attempts, &self.reconnect);
            attempts += 1;
            self.set_state(ConnectionState::Reconnecting { attempt: attempts });
            info!(delay_ms = duration_ms(delay), attempt = attempts, "waiting before reconnect");

            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        debug!("change transport loop exiting");
    }

    /// Full reload of the active scope after each successful connect.
    /// Returns `false` if cancelled.
    async fn resync(&self, cancel: &CancellationToken) -> bool {
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => return false,
            result = self.api.list_tickets(&self.scope) => result,
        };

        match result {
            Ok(tickets) => {
                debug!(scope = %self.scope, tickets = tickets.len(), "resynchronized");
                self.publish(
                    EventPayload::SnapshotLoaded(LoadedSnapshot {
                        scope: self.scope.clone(),
                        tickets: Arc::new(tickets),
                    }),
                    EventSource::Api,
                );
            }
            Err(e) => {
                warn!(error = %e, scope = %self.scope, "resynchronization failed");
                self.publish(
                    EventPayload::NetworkError(
                        ErrorReport::new(e.to_string()).with_context("resync"),
                    ),
                    EventSource::System,
                );
            }
        }
        true
    }

    /// Read one live stream until it ends, debouncing change records per
    /// entity. Pending records are flushed when the stream ends.
    async fn pump(&self, mut stream: MessageStream, cancel: &CancellationToken) -> SessionEnd {
        let mut pending: Debouncer<(EntityKind, String, String), ChangeRecord> =
            Debouncer::new(self.debounce_window);

        let end = loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return SessionEnd::Cancelled,
                () = sleep_until_deadline(pending.next_deadline()) => {
                    for record in pending.take_ready() {
                        self.publish(EventPayload::Change(record), EventSource::Stream);
                    }
                }
                message = stream.next() => match message {
                    Some(Ok(message)) => {
                        if let Some(record) = message::change_record(message, &self.scope) {
                            let key = (record.entity, record.scope.clone(), record.key.clone());
                            pending.push(key, record);
                        }
                    }
                    Some(Err(e)) => break SessionEnd::Failed(e.into()),
                    None => break SessionEnd::Closed,
                },
            }
        };

        for record in pending.drain() {
            self.publish(EventPayload::Change(record), EventSource::Stream);
        }
        end
    }

    /// Polling fallback. Returns `true` when streaming was re-enabled,
    /// `false` when cancelled.
    async fn poll_until_resumed(&self, cancel: &CancellationToken) -> bool {
        self.set_state(ConnectionState::Polling);

        let mut interval = tokio::time::interval(self.polling_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut diff = poll::SnapshotDiff::default();

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return false,
                () = self.resume.notified() => {
                    info!("leaving polling mode");
                    return true;
                }
                _ = interval.tick() => {
                    let fetched = tokio::select! {
                        biased;
                        () = cancel.cancelled() => return false,
                        result = self.api.list_tickets(&self.scope) => result,
                    };
                    self.poll_tick(&mut diff, fetched);
                }
            }
        }
    }

    fn poll_tick(
        &self,
        diff: &mut poll::SnapshotDiff,
        fetched: Result<Vec<crate::model::Ticket>, CoreError>,
    ) {
        let snapshot = match fetched {
            Ok(snapshot) => snapshot,
            Err(e) => {
                let e = CoreError::PollFailed {
                    message: e.to_string(),
                };
                warn!(error = %e, "poll tick failed, retrying next tick");
                return;
            }
        };

        let baseline = !diff.has_baseline();
        let records = diff.advance(&self.scope, &snapshot);
        if baseline {
            debug!(tickets = snapshot.len(), "polling baseline established");
        } else if !records.is_empty() {
            debug!(changes = records.len(), "polling detected changes");
        }

        for record in records {
            self.publish(EventPayload::Change(record), EventSource::Api);
        }
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
