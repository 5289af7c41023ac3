//! Live views over the entity cache.
//!
//! Snapshots are whole, key-ordered lists. A reader that falls behind skips
//! intermediate states and lands on the newest one.

use std::sync::Arc;

use futures_core::Stream;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

pub type Snapshot<T> = Arc<Vec<Arc<T>>>;

/// Handle on one cached collection: the last snapshot read, plus the
/// channel that announces the next.
pub struct EntityStream<T> {
    seen: Snapshot<T>,
    rx: watch::Receiver<Snapshot<T>>,
}

impl<T: Send + Sync + 'static> EntityStream<T> {
    pub(crate) fn new(mut rx: watch::Receiver<Snapshot<T>>) -> Self {
        let seen = Arc::clone(&rx.borrow_and_update());
        Self { seen, rx }
    }

    /// Snapshot as of creation or the last [`changed`](Self::changed).
    pub fn current(&self) -> &Snapshot<T> {
        &self.seen
    }

    /// Newest snapshot, without marking it seen.
    pub fn latest(&self) -> Snapshot<T> {
        Arc::clone(&self.rx.borrow())
    }

    pub fn has_changed(&self) -> bool {
        self.rx.has_changed().unwrap_or(false)
    }

    /// Wait for the next write to the collection. `None` once the cache
    /// has been dropped.
    pub async fn changed(&mut self) -> Option<Snapshot<T>> {
        self.rx.changed().await.ok()?;
        self.seen = Arc::clone(&self.rx.borrow_and_update());
        Some(Arc::clone(&self.seen))
    }

    /// Every snapshot from now on, starting with the newest.
    pub fn into_stream(self) -> impl Stream<Item = Snapshot<T>> + Send + Unpin + 'static {
        WatchStream::new(self.rx)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use futures_util::StreamExt;

    use crate::model::Ticket;
    use crate::store::EntityCache;

    #[tokio::test]
    async fn changed_advances_current() {
        let cache = EntityCache::new();
        let mut tickets = cache.subscribe_tickets("MDT");
        assert!(tickets.current().is_empty());
        assert!(!tickets.has_changed());

        cache.upsert_ticket(Ticket::new("MDT", "MDT-001", "first"));
        assert!(tickets.has_changed());
        assert_eq!(tickets.latest().len(), 1);
        assert!(tickets.current().is_empty());

        let snap = tickets.changed().await.unwrap();
        assert_eq!(snap.len(), 1);
        assert_eq!(tickets.current().len(), 1);
        assert!(!tickets.has_changed());
    }

    #[tokio::test]
    async fn stream_skips_to_newest_snapshot() {
        let cache = EntityCache::new();
        cache.upsert_ticket(Ticket::new("MDT", "MDT-001", "first"));
        let mut stream = cache.subscribe_tickets("MDT").into_stream();

        cache.upsert_ticket(Ticket::new("MDT", "MDT-002", "second"));
        cache.upsert_ticket(Ticket::new("MDT", "MDT-003", "third"));
        assert_eq!(stream.next().await.unwrap().len(), 3);

        cache.remove_ticket("MDT", "MDT-001");
        let keys: Vec<String> = stream
            .next()
            .await
            .unwrap()
            .iter()
            .map(|t| t.key.clone())
            .collect();
        assert_eq!(keys, vec!["MDT-002", "MDT-003"]);
    }
}
