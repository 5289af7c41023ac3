// Shared in-memory backends for the engine integration tests.
#![allow(clippy::unwrap_used, dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::TimeDelta;
use futures_util::StreamExt;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_stream::wrappers::UnboundedReceiverStream;

use mdtsync_api::{MessageStream, StreamMessage};
use mdtsync_core::{CoreError, DataApi, Project, StreamConnector, SyncConfig, Ticket, TicketPatch};

pub const SCOPE: &str = "MDT";

pub fn config() -> SyncConfig {
    SyncConfig::new("http://localhost:3001".parse().unwrap()).with_scope(SCOPE)
}

// ── FakeApi ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    ListProjects,
    ListTickets(String),
    Create(String),
    Update(String),
    Delete(String),
}

/// Server state plus a log of every request.
#[derive(Default)]
pub struct FakeApi {
    tickets: Mutex<HashMap<String, Vec<Ticket>>>,
    projects: Mutex<Vec<Project>>,
    calls: Mutex<Vec<Call>>,
    reject_mutations: AtomicBool,
    fail_reads: AtomicBool,
}

impl FakeApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// One project `MDT` holding `keys`.
    pub fn seeded(keys: &[&str]) -> Arc<Self> {
        let api = Self::new();
        api.projects.lock().push(project(SCOPE));
        for key in keys {
            api.insert(Ticket::new(SCOPE, *key, format!("Ticket {key}")));
        }
        api
    }

    pub fn insert(&self, ticket: Ticket) {
        self.tickets
            .lock()
            .entry(ticket.scope.clone())
            .or_default()
            .push(ticket);
    }

    pub fn add_project(&self, id: &str) {
        self.projects.lock().push(project(id));
    }

    pub fn remove_project(&self, id: &str) {
        self.projects.lock().retain(|p| p.id != id);
        self.tickets.lock().remove(id);
    }

    /// Change a ticket server-side, as an external editor would.
    pub fn touch(&self, key: &str, status: &str) {
        let mut tickets = self.tickets.lock();
        let ticket = tickets
            .values_mut()
            .flat_map(|list| list.iter_mut())
            .find(|t| t.key == key)
            .unwrap();
        ticket.status = Some(status.to_owned());
        ticket.last_modified += TimeDelta::seconds(1);
    }

    pub fn remove(&self, key: &str) {
        for list in self.tickets.lock().values_mut() {
            list.retain(|t| t.key != key);
        }
    }

    pub fn server_ticket(&self, key: &str) -> Option<Ticket> {
        self.tickets
            .lock()
            .values()
            .flat_map(|list| list.iter())
            .find(|t| t.key == key)
            .cloned()
    }

    pub fn reject_mutations(&self, reject: bool) {
        self.reject_mutations.store(reject, Ordering::SeqCst);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn count(&self, call: &Call) -> usize {
        self.calls.lock().iter().filter(|c| *c == call).count()
    }

    pub fn ticket_lists(&self) -> usize {
        self.count(&Call::ListTickets(SCOPE.into()))
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }

    fn check_read(&self) -> Result<(), CoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(CoreError::ConnectionFailed {
                url: "http://localhost:3001/api".into(),
                reason: "connection refused".into(),
            });
        }
        Ok(())
    }

    fn check_mutation(&self) -> Result<(), CoreError> {
        if self.reject_mutations.load(Ordering::SeqCst) {
            return Err(CoreError::Api {
                message: "HTTP 500: disk full".into(),
                status: Some(500),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl DataApi for FakeApi {
    async fn list_projects(&self) -> Result<Vec<Project>, CoreError> {
        self.record(Call::ListProjects);
        self.check_read()?;
        Ok(self.projects.lock().clone())
    }

    async fn list_tickets(&self, scope: &str) -> Result<Vec<Ticket>, CoreError> {
        self.record(Call::ListTickets(scope.to_owned()));
        self.check_read()?;
        Ok(self.tickets.lock().get(scope).cloned().unwrap_or_default())
    }

    async fn create_ticket(&self, ticket: &Ticket) -> Result<(), CoreError> {
        self.record(Call::Create(ticket.key.clone()));
        self.check_mutation()?;
        self.insert(ticket.clone());
        Ok(())
    }

    async fn update_ticket(
        &self,
        scope: &str,
        key: &str,
        patch: &TicketPatch,
    ) -> Result<(), CoreError> {
        self.record(Call::Update(key.to_owned()));
        self.check_mutation()?;
        let mut tickets = self.tickets.lock();
        let list = tickets.get_mut(scope).ok_or_else(|| CoreError::NotFound {
            key: key.to_owned(),
        })?;
        let slot = list
            .iter_mut()
            .find(|t| t.key == key)
            .ok_or_else(|| CoreError::NotFound {
                key: key.to_owned(),
            })?;
        *slot = slot.merged(patch)?;
        Ok(())
    }

    async fn delete_ticket(&self, _scope: &str, key: &str) -> Result<(), CoreError> {
        self.record(Call::Delete(key.to_owned()));
        self.check_mutation()?;
        self.remove(key);
        Ok(())
    }
}

pub fn project(id: &str) -> Project {
    Project {
        id: id.into(),
        name: format!("Project {id}"),
        code: Some(id.into()),
        description: None,
        last_modified: None,
    }
}

// ── FakeConnector ───────────────────────────────────────────────────

pub type MessageSender = mpsc::UnboundedSender<Result<StreamMessage, mdtsync_api::Error>>;

/// Hands out queued sessions one per connect; with none queued the
/// handshake fails.
#[derive(Default)]
pub struct FakeConnector {
    sessions: Mutex<VecDeque<MessageStream>>,
    attempts: Mutex<Vec<Instant>>,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue one session; the returned sender feeds it. Dropping the
    /// sender ends the stream.
    pub fn push_session(&self) -> MessageSender {
        let (tx, rx) = mpsc::unbounded_channel();
        self.sessions
            .lock()
            .push_back(UnboundedReceiverStream::new(rx).boxed());
        tx
    }

    pub fn attempts(&self) -> Vec<Instant> {
        self.attempts.lock().clone()
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.lock().len()
    }
}

#[async_trait]
impl StreamConnector for FakeConnector {
    fn endpoint(&self) -> String {
        "http://localhost:3001/api/events".into()
    }

    async fn connect(&self) -> Result<MessageStream, CoreError> {
        self.attempts.lock().push(Instant::now());
        self.sessions
            .lock()
            .pop_front()
            .ok_or_else(|| CoreError::Transport {
                message: "connection refused".into(),
            })
    }
}

// ── Stream messages ─────────────────────────────────────────────────

pub fn file_change(event_type: &str, filename: &str) -> Result<StreamMessage, mdtsync_api::Error> {
    let frame = json!({
        "type": "file-change",
        "data": { "eventType": event_type, "filename": filename, "timestamp": 1_767_225_600_000_i64 }
    });
    Ok(StreamMessage::parse(&frame.to_string()).unwrap())
}

pub fn project_change(event_type: &str, id: &str) -> Result<StreamMessage, mdtsync_api::Error> {
    let frame = json!({
        "type": "project-change",
        "data": { "eventType": event_type, "projectId": id }
    });
    Ok(StreamMessage::parse(&frame.to_string()).unwrap())
}

pub fn heartbeat() -> Result<StreamMessage, mdtsync_api::Error> {
    Ok(StreamMessage::Heartbeat)
}

/// Let spawned tasks run; with a paused clock this also advances time.
pub async fn settle(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

pub fn millis_between(earlier: Instant, later: Instant) -> u64 {
    u64::try_from(later.duration_since(earlier).as_millis()).unwrap()
}
