// SyncEngine end to end over in-memory backends: optimistic updates,
// echo suppression, refetch-on-change, error reporting.
#![allow(clippy::unwrap_used)]

mod common;

use std::sync::Arc;

use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use tokio::time::Instant;

use common::{
    Call, FakeApi, FakeConnector, MessageSender, SCOPE, config, file_change, millis_between,
    project_change, settle,
};
use mdtsync_core::{
    ConnectionState, CoreError, EventSource, EventType, MutationKind, SyncEngine, Ticket,
    TicketPatch, UpdateCause,
};

type Changes = Arc<Mutex<Vec<(UpdateCause, Instant)>>>;
type Errors = Arc<Mutex<Vec<CoreError>>>;

/// Engine started against `keys` in scope `MDT`, with its stream
/// connected and the startup load done.
async fn started(keys: &[&str]) -> (SyncEngine, Arc<FakeApi>, MessageSender) {
    let api = FakeApi::seeded(keys);
    let connector = FakeConnector::new();
    let session = connector.push_session();
    let engine = SyncEngine::with_backends(config(), api.clone(), connector);
    engine.start().await;
    settle(10).await;
    assert_eq!(engine.current_state(), ConnectionState::Connected);
    (engine, api, session)
}

fn record_changes(engine: &SyncEngine) -> Changes {
    let seen: Changes = Arc::default();
    let sink = Arc::clone(&seen);
    engine.on_change(move |update| sink.lock().push((update.cause(), Instant::now())));
    seen
}

fn record_errors(engine: &SyncEngine) -> Errors {
    let seen: Errors = Arc::default();
    let sink = Arc::clone(&seen);
    engine.on_error(move |error| sink.lock().push(error.clone()));
    seen
}

fn causes(changes: &Changes) -> Vec<UpdateCause> {
    changes.lock().iter().map(|(cause, _)| *cause).collect()
}

fn status(engine: &SyncEngine, key: &str) -> Option<String> {
    engine.ticket(key).unwrap().status.clone()
}

// ── Startup ─────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn start_loads_projects_and_active_scope() {
    let (engine, api, _session) = started(&["TEST-001", "TEST-002"]).await;

    assert_eq!(engine.tickets_snapshot(SCOPE).len(), 2);
    assert_eq!(engine.projects_snapshot().len(), 1);
    assert!(engine.cache().last_full_refresh().is_some());
    // Initial load plus the resync on connect.
    assert_eq!(api.ticket_lists(), 2);
    assert_eq!(api.count(&Call::ListProjects), 1);

    engine.stop().await;
    assert_eq!(engine.current_state(), ConnectionState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn failed_initial_load_reaches_on_error() {
    let api = FakeApi::seeded(&["TEST-001"]);
    api.fail_reads(true);
    let connector = FakeConnector::new();
    let _session = connector.push_session();
    let engine = SyncEngine::with_backends(config(), api.clone(), connector);
    let errors = record_errors(&engine);

    engine.start().await;
    settle(10).await;

    let errors = errors.lock().clone();
    assert!(!errors.is_empty());
    assert!(
        matches!(&errors[0], CoreError::Transport { message } if message.starts_with("initial load"))
    );
    assert_eq!(engine.current_state(), ConnectionState::Connected);
    engine.stop().await;
}

// ── Refetch on change ───────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn external_change_triggers_one_debounced_refetch() {
    let (engine, api, session) = started(&["TEST-001"]).await;
    let changes = record_changes(&engine);

    let published: Arc<Mutex<Option<Instant>>> = Arc::default();
    let stamp = Arc::clone(&published);
    let _sub = engine.subscribe(EventType::TicketUpdated, move |_| {
        *stamp.lock() = Some(Instant::now());
        Ok(())
    });

    let lists = api.ticket_lists();
    api.touch("TEST-001", "Done");
    session.send(file_change("change", "TEST-001.md")).unwrap();
    settle(1000).await;

    assert_eq!(api.ticket_lists(), lists + 1);
    assert_eq!(causes(&changes), vec![UpdateCause::Refetch]);

    let published = (*published.lock()).unwrap();
    let refetched = changes.lock()[0].1;
    let delay = millis_between(published, refetched);
    assert!((100..=200).contains(&delay), "refetch after {delay} ms");

    assert_eq!(status(&engine, "TEST-001").as_deref(), Some("Done"));
    engine.stop().await;
}

#[tokio::test(start_paused = true)]
async fn changes_in_one_scope_coalesce_into_one_refetch() {
    let (engine, api, session) = started(&["TEST-001", "TEST-002", "TEST-003"]).await;
    let changes = record_changes(&engine);
    let lists = api.ticket_lists();

    for key in ["TEST-001", "TEST-002", "TEST-003"] {
        session
            .send(file_change("change", &format!("{key}.md")))
            .unwrap();
    }
    settle(1000).await;

    assert_eq!(api.ticket_lists(), lists + 1);
    assert_eq!(causes(&changes), vec![UpdateCause::Refetch]);
    engine.stop().await;
}

#[tokio::test(start_paused = true)]
async fn request_refresh_refetches_everything() {
    let (engine, api, _session) = started(&["TEST-001"]).await;
    let changes = record_changes(&engine);
    let lists = api.ticket_lists();

    engine.request_refresh(None);
    settle(200).await;

    assert_eq!(api.ticket_lists(), lists + 1);
    assert_eq!(api.count(&Call::ListProjects), 2);
    assert_eq!(
        causes(&changes),
        vec![UpdateCause::Refetch, UpdateCause::Refetch]
    );
    engine.stop().await;
}

// ── Optimistic updates ──────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn update_echo_is_suppressed() {
    let (engine, api, session) = started(&["TEST-001"]).await;
    let changes = record_changes(&engine);
    let lists = api.ticket_lists();

    let optimistic = engine
        .update_entity("TEST-001", TicketPatch::new().status("Done"))
        .unwrap();

    // Applied before the server answers.
    assert_eq!(optimistic.status.as_deref(), Some("Done"));
    assert_eq!(status(&engine, "TEST-001").as_deref(), Some("Done"));
    assert!(engine.is_pending("TEST-001"));
    assert_eq!(causes(&changes), vec![UpdateCause::Optimistic]);

    settle(1000).await;
    session.send(file_change("change", "TEST-001.md")).unwrap();
    settle(1000).await;

    assert_eq!(causes(&changes), vec![UpdateCause::Optimistic]);
    assert_eq!(api.ticket_lists(), lists);
    assert!(!engine.is_pending("TEST-001"));
    assert_eq!(api.count(&Call::Update("TEST-001".into())), 1);
    assert_eq!(
        api.server_ticket("TEST-001").unwrap().status.as_deref(),
        Some("Done")
    );
    engine.stop().await;
}

#[tokio::test(start_paused = true)]
async fn late_echo_after_expiry_refetches() {
    let (engine, api, session) = started(&["TEST-001"]).await;
    let changes = record_changes(&engine);

    engine
        .update_entity("TEST-001", TicketPatch::new().status("In Progress"))
        .unwrap();
    settle(5001).await;
    assert!(!engine.is_pending("TEST-001"));

    let lists = api.ticket_lists();
    session.send(file_change("change", "TEST-001.md")).unwrap();
    settle(500).await;

    assert_eq!(api.ticket_lists(), lists + 1);
    assert_eq!(
        causes(&changes),
        vec![UpdateCause::Optimistic, UpdateCause::Refetch]
    );
    engine.stop().await;
}

#[tokio::test(start_paused = true)]
async fn rejected_mutation_reports_once_and_heals() {
    let (engine, api, _session) = started(&["TEST-001"]).await;
    api.reject_mutations(true);
    let changes = record_changes(&engine);
    let errors = record_errors(&engine);

    engine
        .update_entity("TEST-001", TicketPatch::new().status("Done"))
        .unwrap();
    engine.flush().await;

    {
        let errors = errors.lock();
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            &errors[0],
            CoreError::MutationFailed { operation: MutationKind::Update, key, .. } if key == "TEST-001"
        ));
    }
    assert!(!engine.is_pending("TEST-001"));

    settle(200).await;

    assert_eq!(status(&engine, "TEST-001"), None);
    assert_eq!(
        causes(&changes),
        vec![UpdateCause::Optimistic, UpdateCause::Refetch]
    );
    let api_errors = engine.dispatcher().history_by_type(EventType::ApiError);
    assert_eq!(api_errors.len(), 1);
    assert_eq!(api_errors[0].source, EventSource::Ui);
    assert_eq!(errors.lock().len(), 1);
    engine.stop().await;
}

#[tokio::test(start_paused = true)]
async fn create_and_delete_echoes_are_suppressed() {
    let (engine, api, session) = started(&["TEST-001"]).await;
    let changes = record_changes(&engine);
    let lists = api.ticket_lists();

    engine
        .create_entity(Ticket::new(SCOPE, "TEST-002", "Second"))
        .unwrap();
    let removed = engine.delete_entity("TEST-001").unwrap();
    assert_eq!(removed.key, "TEST-001");

    let keys: Vec<String> = engine
        .tickets_snapshot(SCOPE)
        .iter()
        .map(|t| t.key.clone())
        .collect();
    assert_eq!(keys, vec!["TEST-002"]);

    session.send(file_change("add", "TEST-002.md")).unwrap();
    session.send(file_change("unlink", "TEST-001.md")).unwrap();
    settle(1000).await;

    assert_eq!(api.ticket_lists(), lists);
    assert_eq!(
        causes(&changes),
        vec![UpdateCause::Optimistic, UpdateCause::Optimistic]
    );
    assert!(api.server_ticket("TEST-001").is_none());
    assert!(api.server_ticket("TEST-002").is_some());
    engine.stop().await;
}

#[tokio::test(start_paused = true)]
async fn invalid_mutations_fail_without_side_effects() {
    let (engine, api, _session) = started(&["TEST-001"]).await;
    let changes = record_changes(&engine);

    let duplicate = engine.create_entity(Ticket::new(SCOPE, "TEST-001", "again"));
    assert!(matches!(duplicate, Err(CoreError::AlreadyExists { .. })));

    let missing = engine.update_entity("NOPE-9", TicketPatch::new().status("Done"));
    assert!(matches!(missing, Err(CoreError::NotFound { .. })));

    let rekey = engine.update_entity("TEST-001", TicketPatch::new().set("key", "TEST-999"));
    assert!(matches!(rekey, Err(CoreError::InvalidPatch { .. })));

    assert!(engine.delete_entity("NOPE-9").is_err());

    settle(100).await;
    assert!(!engine.is_pending("TEST-001"));
    assert!(changes.lock().is_empty());
    assert!(
        api.calls()
            .iter()
            .all(|c| matches!(c, Call::ListProjects | Call::ListTickets(_)))
    );
    engine.stop().await;
}

// ── Projects & errors ───────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn project_changes_reach_subscribers_and_cache() {
    let (engine, api, session) = started(&["TEST-001"]).await;
    let created = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&created);
    let _sub = engine.subscribe(EventType::ProjectCreated, move |event| {
        sink.lock().push(event.change().map(|c| c.key.clone()));
        Ok(())
    });

    api.add_project("API");
    session.send(project_change("add", "API")).unwrap();
    settle(300).await;

    assert_eq!(*created.lock(), vec![Some("API".to_owned())]);
    let ids: Vec<String> = engine
        .projects_snapshot()
        .iter()
        .map(|p| p.id.clone())
        .collect();
    assert_eq!(ids, vec!["API", "MDT"]);

    api.remove_project("MDT");
    session.send(project_change("unlink", "MDT")).unwrap();
    settle(300).await;
    assert!(engine.cache().project("MDT").is_none());
    assert_eq!(engine.cache().ticket_count(SCOPE), 0);
    engine.stop().await;
}

#[tokio::test(start_paused = true)]
async fn stream_failure_reaches_on_error() {
    let (engine, _api, session) = started(&["TEST-001"]).await;
    let errors = record_errors(&engine);

    drop(session);
    settle(1500).await;

    assert!(
        errors
            .lock()
            .iter()
            .any(|e| matches!(e, CoreError::Transport { .. }))
    );
    assert!(matches!(
        engine.current_state(),
        ConnectionState::Reconnecting { .. }
    ));
    engine.stop().await;
}
