// ── Generic reactive entity collection ──
//
// Concurrent storage with O(1) lookups and push-based change
// notification via `watch` channels.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::watch;

/// A concurrent, reactive collection for one entity type.
///
/// Every mutation bumps a version counter and rebuilds the key-ordered
/// snapshot that subscribers receive.
pub(crate) struct EntityCollection<T: Clone + Send + Sync + 'static> {
    /// Ticket key or project id -> entity.
    by_key: DashMap<String, Arc<T>>,

    /// Version counter, bumped on every mutation.
    version: watch::Sender<u64>,

    /// Full snapshot sorted by key, rebuilt on mutation.
    snapshot: watch::Sender<Arc<Vec<Arc<T>>>>,
}

impl<T: Clone + Send + Sync + 'static> EntityCollection<T> {
    pub(crate) fn new() -> Self {
        let (version, _) = watch::channel(0u64);
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));

        Self {
            by_key: DashMap::new(),
            version,
            snapshot,
        }
    }

    /// Insert or replace an entity. Returns `true` if the key was new.
    pub(crate) fn upsert(&self, key: String, entity: T) -> bool {
        let is_new = self.by_key.insert(key, Arc::new(entity)).is_none();
        self.publish();
        is_new
    }

    /// Remove an entity by key. Returns the removed entity if it existed.
    pub(crate) fn remove(&self, key: &str) -> Option<Arc<T>> {
        let removed = self.by_key.remove(key).map(|(_, v)| v);
        if removed.is_some() {
            self.publish();
        }
        removed
    }

    /// Upsert all incoming entities, then prune keys not in the incoming
    /// set. Subscribers see one change, never an intermediate empty state.
    pub(crate) fn replace_all(&self, items: Vec<(String, T)>) {
        let incoming: HashSet<String> = items.iter().map(|(k, _)| k.clone()).collect();
        for (key, entity) in items {
            self.by_key.insert(key, Arc::new(entity));
        }
        self.by_key.retain(|key, _| incoming.contains(key));
        self.publish();
    }

    pub(crate) fn get(&self, key: &str) -> Option<Arc<T>> {
        self.by_key.get(key).map(|r| Arc::clone(r.value()))
    }

    pub(crate) fn contains(&self, key: &str) -> bool {
        self.by_key.contains_key(key)
    }

    /// Get the current snapshot (cheap `Arc` clone).
    pub(crate) fn snapshot(&self) -> Arc<Vec<Arc<T>>> {
        self.snapshot.borrow().clone()
    }

    /// Subscribe to snapshot changes via a `watch::Receiver`.
    pub(crate) fn subscribe(&self) -> watch::Receiver<Arc<Vec<Arc<T>>>> {
        self.snapshot.subscribe()
    }

    pub(crate) fn version(&self) -> u64 {
        *self.version.borrow()
    }

    pub(crate) fn len(&self) -> usize {
        self.by_key.len()
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn publish(&self) {
        let mut entries: Vec<(String, Arc<T>)> = self
            .by_key
            .iter()
            .map(|r| (r.key().clone(), Arc::clone(r.value())))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        let values: Vec<Arc<T>> = entries.into_iter().map(|(_, v)| v).collect();

        // `send_modify` updates unconditionally, even with zero receivers.
        self.snapshot.send_modify(|snap| *snap = Arc::new(values));
        self.version.send_modify(|v| *v += 1);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn upsert_reports_new_keys() {
        let col: EntityCollection<String> = EntityCollection::new();
        assert!(col.upsert("MDT-1".into(), "hello".into()));
        assert!(!col.upsert("MDT-1".into(), "world".into()));
        assert_eq!(*col.get("MDT-1").unwrap(), "world");
        assert_eq!(col.version(), 2);
    }

    #[test]
    fn snapshot_is_sorted_by_key() {
        let col: EntityCollection<&str> = EntityCollection::new();
        col.upsert("MDT-3".into(), "c");
        col.upsert("MDT-1".into(), "a");
        col.upsert("MDT-2".into(), "b");

        let snap: Vec<&str> = col.snapshot().iter().map(|s| **s).collect();
        assert_eq!(snap, vec!["a", "b", "c"]);
    }

    #[test]
    fn remove_missing_key_does_not_bump_version() {
        let col: EntityCollection<u8> = EntityCollection::new();
        assert!(col.remove("nope").is_none());
        assert_eq!(col.version(), 0);
    }

    #[test]
    fn replace_all_prunes_in_one_step() {
        let col: EntityCollection<u8> = EntityCollection::new();
        col.upsert("a".into(), 1);
        col.upsert("b".into(), 2);
        let mut rx = col.subscribe();
        rx.borrow_and_update();

        col.replace_all(vec![("b".into(), 20), ("c".into(), 30)]);

        assert!(rx.has_changed().unwrap());
        assert_eq!(col.len(), 2);
        assert!(!col.contains("a"));
        assert_eq!(*col.get("b").unwrap(), 20);
        assert_eq!(col.snapshot().len(), 2);
    }
}
