// ── Optimistic-update tracking table ──
//
// Tracking key -> registration time. An entry is active iff present and
// younger than the TTL. Each entry owns an expiry task that removes it at
// TTL unless it was consumed (or re-registered) first.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug)]
struct TrackingEntry {
    registered_at: Instant,
    generation: u64,
    expiry: AbortHandle,
}

#[derive(Debug)]
pub(crate) struct TrackingTable {
    entries: Arc<DashMap<String, TrackingEntry>>,
    ttl: Duration,
    generation: AtomicU64,
}

impl TrackingTable {
    pub(crate) fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            ttl,
            generation: AtomicU64::new(0),
        }
    }

    /// Register (or refresh) `key`. Must run inside a Tokio runtime.
    pub(crate) fn begin(&self, key: &str) {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let expiry = tokio::spawn(expire(
            Arc::downgrade(&self.entries),
            key.to_owned(),
            generation,
            self.ttl,
        ))
        .abort_handle();

        let entry = TrackingEntry {
            registered_at: Instant::now(),
            generation,
            expiry,
        };
        if let Some(previous) = self.entries.insert(key.to_owned(), entry) {
            previous.expiry.abort();
        }
        debug!(key, ttl = ?self.ttl, "tracking optimistic update");
    }

    /// Consume the entry for `key`. Returns `true` only if it was active.
    pub(crate) fn consume(&self, key: &str) -> bool {
        let Some((_, entry)) = self.entries.remove(key) else {
            return false;
        };
        entry.expiry.abort();
        entry.registered_at.elapsed() < self.ttl
    }

    /// Drop `key` without treating it as matched (failed mutation).
    pub(crate) fn forget(&self, key: &str) {
        if let Some((_, entry)) = self.entries.remove(key) {
            entry.expiry.abort();
        }
    }

    pub(crate) fn is_active(&self, key: &str) -> bool {
        self.entries
            .get(key)
            .is_some_and(|e| e.registered_at.elapsed() < self.ttl)
    }

    /// Keys with an active entry.
    pub(crate) fn active_keys(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| e.registered_at.elapsed() < self.ttl)
            .map(|e| e.key().clone())
            .collect()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn clear(&self) {
        for entry in self.entries.iter() {
            entry.expiry.abort();
        }
        self.entries.clear();
    }
}

impl Drop for TrackingTable {
    fn drop(&mut self) {
        self.clear();
    }
}

async fn expire(
    entries: Weak<DashMap<String, TrackingEntry>>,
    key: String,
    generation: u64,
    ttl: Duration,
) {
    tokio::time::sleep(ttl).await;
    let Some(entries) = entries.upgrade() else {
        return;
    };
    if entries
        .remove_if(&key, |_, e| e.generation == generation)
        .is_some()
    {
        debug!(key = %key, "tracking entry expired unmatched");
    }
}
