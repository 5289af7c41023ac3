// ── Entity cache ──
//
// In-memory view of tickets (one collection per project scope) and
// projects. Written only by the SyncCoordinator; read by anyone.

mod collection;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::watch;

use crate::model::{Project, Ticket};
use crate::stream::EntityStream;

pub(crate) use collection::EntityCollection;

/// Reactive cache of tickets and projects.
pub struct EntityCache {
    tickets: DashMap<String, Arc<EntityCollection<Ticket>>>,
    projects: EntityCollection<Project>,
    last_full_refresh: watch::Sender<Option<DateTime<Utc>>>,
}

impl Default for EntityCache {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityCache {
    pub fn new() -> Self {
        let (last_full_refresh, _) = watch::channel(None);
        Self {
            tickets: DashMap::new(),
            projects: EntityCollection::new(),
            last_full_refresh,
        }
    }

    /// Collection for `scope`, created on first use. The `Arc` keeps
    /// callers from holding a map guard while they work on it.
    fn scope(&self, scope: &str) -> Arc<EntityCollection<Ticket>> {
        if let Some(existing) = self.tickets.get(scope) {
            return Arc::clone(existing.value());
        }
        Arc::clone(
            self.tickets
                .entry(scope.to_owned())
                .or_insert_with(|| Arc::new(EntityCollection::new()))
                .value(),
        )
    }

    // ── Tickets ──────────────────────────────────────────────────────

    pub fn tickets_snapshot(&self, scope: &str) -> Arc<Vec<Arc<Ticket>>> {
        self.scope(scope).snapshot()
    }

    pub fn subscribe_tickets(&self, scope: &str) -> EntityStream<Ticket> {
        EntityStream::new(self.scope(scope).subscribe())
    }

    pub fn ticket(&self, scope: &str, key: &str) -> Option<Arc<Ticket>> {
        self.tickets.get(scope)?.get(key)
    }

    /// Look a ticket up by key across every cached scope.
    pub fn find_ticket(&self, key: &str) -> Option<Arc<Ticket>> {
        self.tickets.iter().find_map(|col| col.get(key))
    }

    pub fn ticket_count(&self, scope: &str) -> usize {
        self.tickets.get(scope).map_or(0, |col| col.len())
    }

    /// Returns `true` if the ticket was new.
    pub(crate) fn upsert_ticket(&self, ticket: Ticket) -> bool {
        self.scope(&ticket.scope).upsert(ticket.key.clone(), ticket)
    }

    pub(crate) fn remove_ticket(&self, scope: &str, key: &str) -> Option<Arc<Ticket>> {
        self.tickets.get(scope).map(|c| Arc::clone(c.value()))?.remove(key)
    }

    /// Replace a whole scope with a fresh snapshot.
    pub(crate) fn replace_tickets(&self, scope: &str, tickets: Vec<Ticket>) {
        self.scope(scope)
            .replace_all(tickets.into_iter().map(|t| (t.key.clone(), t)).collect());
    }

    pub fn contains_ticket(&self, scope: &str, key: &str) -> bool {
        self.tickets.get(scope).is_some_and(|col| col.contains(key))
    }

    /// Bumped on every write to `scope`.
    pub fn scope_version(&self, scope: &str) -> u64 {
        self.tickets.get(scope).map_or(0, |col| col.version())
    }

    // ── Projects ─────────────────────────────────────────────────────

    pub fn projects_snapshot(&self) -> Arc<Vec<Arc<Project>>> {
        self.projects.snapshot()
    }

    pub fn subscribe_projects(&self) -> EntityStream<Project> {
        EntityStream::new(self.projects.subscribe())
    }

    pub fn project(&self, id: &str) -> Option<Arc<Project>> {
        self.projects.get(id)
    }

    pub(crate) fn replace_projects(&self, projects: Vec<Project>) {
        self.projects
            .replace_all(projects.into_iter().map(|p| (p.id.clone(), p)).collect());
    }

    /// Drops the project and empties its tickets. The scope's collection
    /// stays, so live subscribers see the empty list and any later refill.
    pub(crate) fn remove_project(&self, id: &str) {
        self.projects.remove(id);
        if let Some(tickets) = self.tickets.get(id).map(|c| Arc::clone(c.value())) {
            tickets.replace_all(Vec::new());
        }
    }

    // ── Refresh bookkeeping ──────────────────────────────────────────

    pub(crate) fn mark_refreshed(&self) {
        self.last_full_refresh.send_replace(Some(Utc::now()));
    }

    pub fn last_full_refresh(&self) -> Option<DateTime<Utc>> {
        *self.last_full_refresh.borrow()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn scopes_are_isolated() {
        let cache = EntityCache::new();
        cache.upsert_ticket(Ticket::new("MDT", "MDT-1", "a"));
        cache.upsert_ticket(Ticket::new("API", "API-1", "b"));

        assert_eq!(cache.ticket_count("MDT"), 1);
        assert_eq!(cache.ticket_count("API"), 1);
        assert!(cache.ticket("MDT", "API-1").is_none());
        assert_eq!(cache.find_ticket("API-1").unwrap().scope, "API");
        assert_eq!(cache.scope_version("MDT"), 1);
        assert_eq!(cache.scope_version("NOPE"), 0);
    }

    #[test]
    fn replace_tickets_prunes_stale_keys() {
        let cache = EntityCache::new();
        cache.upsert_ticket(Ticket::new("MDT", "MDT-1", "old"));
        cache.replace_tickets("MDT", vec![Ticket::new("MDT", "MDT-2", "new")]);

        let keys: Vec<String> = cache
            .tickets_snapshot("MDT")
            .iter()
            .map(|t| t.key.clone())
            .collect();
        assert_eq!(keys, vec!["MDT-2"]);
    }

    #[test]
    fn removing_a_project_drops_its_tickets() {
        let cache = EntityCache::new();
        cache.replace_projects(vec![Project {
            id: "OLD".into(),
            name: "Old".into(),
            code: None,
            description: None,
            last_modified: None,
        }]);
        cache.upsert_ticket(Ticket::new("OLD", "OLD-1", "x"));

        cache.remove_project("OLD");
        assert!(cache.project("OLD").is_none());
        assert_eq!(cache.ticket_count("OLD"), 0);
    }

    #[tokio::test]
    async fn subscribers_survive_project_removal() {
        let cache = EntityCache::new();
        cache.upsert_ticket(Ticket::new("OLD", "OLD-001", "x"));
        let mut tickets = cache.subscribe_tickets("OLD");

        cache.remove_project("OLD");
        assert!(tickets.changed().await.unwrap().is_empty());

        cache.upsert_ticket(Ticket::new("OLD", "OLD-002", "back"));
        let snap = tickets.changed().await.unwrap();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].key, "OLD-002");
    }

    #[test]
    fn unknown_scope_reads_empty() {
        let cache = EntityCache::new();
        assert!(cache.tickets_snapshot("NOPE").is_empty());
        assert!(cache.remove_ticket("NOPE", "NOPE-1").is_none());
        assert!(cache.last_full_refresh().is_none());
    }
}
