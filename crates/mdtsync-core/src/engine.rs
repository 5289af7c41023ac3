// ── SyncEngine facade ──
//
// Wires one Dispatcher into the ChangeTransport and the SyncCoordinator
// and exposes the surface the UI layer consumes: callbacks, direct event
// subscription, optimistic mutations, cache reads, connection state.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::backend::{DataApi, StreamConnector, http_backends};
use crate::config::SyncConfig;
use crate::dispatcher::{Dispatcher, Subscription};
use crate::error::{CoreError, HandlerError};
use crate::model::{
    ErrorReport, Event, EventPayload, EventSource, EventType, Project, Ticket, TicketPatch,
};
use crate::store::EntityCache;
use crate::stream::{EntityStream, Snapshot};
use crate::sync::{Mutation, StateUpdate, SyncCoordinator};
use crate::transport::{ChangeTransport, ConnectionState};

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc<EngineInner>`. Every clone shares the same
/// Dispatcher, cache and background tasks.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    config: SyncConfig,
    dispatcher: Dispatcher,
    cache: Arc<EntityCache>,
    transport: ChangeTransport,
    coordinator: SyncCoordinator,
}

impl SyncEngine {
    /// Engine talking HTTP to the server described by `config`.
    pub fn new(config: SyncConfig) -> Result<Self, CoreError> {
        let (data, stream) = http_backends(&config)?;
        Ok(Self::with_backends(config, Arc::new(data), Arc::new(stream)))
    }

    /// Engine over caller-supplied backends.
    pub fn with_backends(
        config: SyncConfig,
        api: Arc<dyn DataApi>,
        connector: Arc<dyn StreamConnector>,
    ) -> Self {
        let dispatcher = Dispatcher::new(config.history_capacity, config.error_threshold);
        let cache = Arc::new(EntityCache::new());
        let transport =
            ChangeTransport::new(&config, dispatcher.clone(), Arc::clone(&api), connector);
        let coordinator =
            SyncCoordinator::new(&config, dispatcher.clone(), api, Arc::clone(&cache));

        Self {
            inner: Arc::new(EngineInner {
                config,
                dispatcher,
                cache,
                transport,
                coordinator,
            }),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    pub fn cache(&self) -> &Arc<EntityCache> {
        &self.inner.cache
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Start coordinating, load the initial state, then open the change
    /// feed.
    ///
    /// A failed initial load is not fatal: it reaches `on_error` and the
    /// transport's resync on connect fills the cache later.
    pub async fn start(&self) {
        let inner = &self.inner;
        inner.coordinator.start();

        if let Err(e) = inner.coordinator.refresh_all().await {
            warn!(error = %e, "initial load failed");
            inner.dispatcher.publish(
                EventPayload::NetworkError(
                    ErrorReport::new(e.to_string()).with_context("initial load"),
                ),
                EventSource::System,
            );
        }

        inner.transport.start();
        info!(
            server = %inner.config.base_url,
            scope = %inner.config.scope,
            "sync engine started"
        );
    }

    /// Stop the transport, then the coordinator. Mutations already sent
    /// keep running to completion.
    pub async fn stop(&self) {
        self.inner.transport.stop().await;
        self.inner.coordinator.stop().await;
        info!("sync engine stopped");
    }

    // ── Callbacks & events ───────────────────────────────────────────

    pub fn on_change<F>(&self, callback: F)
    where
        F: Fn(&StateUpdate) + Send + Sync + 'static,
    {
        self.inner.coordinator.on_change(callback);
    }

    pub fn on_error<F>(&self, callback: F)
    where
        F: Fn(&CoreError) + Send + Sync + 'static,
    {
        self.inner.coordinator.on_error(callback);
    }

    /// Direct event consumption, e.g. project lifecycle events.
    pub fn subscribe<F>(&self, event_type: EventType, handler: F) -> Subscription
    where
        F: Fn(&Event) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.inner.dispatcher.subscribe(event_type, handler)
    }

    // ── Mutations ────────────────────────────────────────────────────

    /// Optimistically create `ticket`. Returns before the server answers.
    pub fn create_entity(&self, ticket: Ticket) -> Result<Arc<Ticket>, CoreError> {
        self.inner.coordinator.apply_optimistic(Mutation::Create(ticket))
    }

    /// Optimistically merge `patch` into the cached ticket `key`.
    pub fn update_entity(&self, key: &str, patch: TicketPatch) -> Result<Arc<Ticket>, CoreError> {
        let scope = self.scope_of(key)?;
        self.inner.coordinator.apply_optimistic(Mutation::Update {
            scope,
            key: key.to_owned(),
            patch,
        })
    }

    /// Optimistically delete `key`. Returns the removed ticket.
    pub fn delete_entity(&self, key: &str) -> Result<Arc<Ticket>, CoreError> {
        let scope = self.scope_of(key)?;
        self.inner.coordinator.apply_optimistic(Mutation::Delete {
            scope,
            key: key.to_owned(),
        })
    }

    /// Wait until every mutation sent so far has been answered.
    pub async fn flush(&self) {
        self.inner.coordinator.flush().await;
    }

    fn scope_of(&self, key: &str) -> Result<String, CoreError> {
        self.inner
            .cache
            .find_ticket(key)
            .map(|t| t.scope.clone())
            .ok_or_else(|| CoreError::NotFound {
                key: key.to_owned(),
            })
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn tickets(&self, scope: &str) -> EntityStream<Ticket> {
        self.inner.cache.subscribe_tickets(scope)
    }

    pub fn tickets_snapshot(&self, scope: &str) -> Snapshot<Ticket> {
        self.inner.cache.tickets_snapshot(scope)
    }

    pub fn projects(&self) -> EntityStream<Project> {
        self.inner.cache.subscribe_projects()
    }

    pub fn projects_snapshot(&self) -> Snapshot<Project> {
        self.inner.cache.projects_snapshot()
    }

    pub fn ticket(&self, key: &str) -> Option<Arc<Ticket>> {
        self.inner.cache.find_ticket(key)
    }

    /// Whether a local mutation of `key` is still awaiting its echo.
    pub fn is_pending(&self, key: &str) -> bool {
        self.inner.coordinator.is_tracking(key)
    }

    // ── Connection control ───────────────────────────────────────────

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.transport.subscribe_state()
    }

    pub fn current_state(&self) -> ConnectionState {
        self.inner.transport.state()
    }

    /// Leave polling mode and try the stream again. `false` when not
    /// polling.
    pub fn enable_streaming(&self) -> bool {
        self.inner.transport.enable_streaming()
    }

    /// Ask for a refetch of `scope`, or of everything when `None`.
    pub fn request_refresh(&self, scope: Option<&str>) {
        self.inner.dispatcher.publish(
            EventPayload::RefreshRequested {
                scope: scope.map(str::to_owned),
            },
            EventSource::Ui,
        );
    }

    /// Load projects and the active scope now, bypassing the debounce.
    pub async fn refresh_all(&self) -> Result<(), CoreError> {
        self.inner.coordinator.refresh_all().await
    }
}
