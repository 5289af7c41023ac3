// ── Keyed trailing-edge debouncer ──
//
// Collapses bursts per key: each push replaces the pending value and
// restarts that key's quiet period. Values come out in first-push order,
// so coalescing never reorders distinct keys. Time comes from
// `tokio::time`, which makes the windows testable with a paused clock.

use std::hash::Hash;
use std::time::Duration;

use indexmap::IndexMap;
use tokio::time::Instant;

#[derive(Debug)]
pub(crate) struct Debouncer<K, V> {
    pending: IndexMap<K, (V, Instant)>,
    delay: Duration,
}

impl<K: Hash + Eq, V> Debouncer<K, V> {
    pub(crate) fn new(delay: Duration) -> Self {
        Self {
            pending: IndexMap::new(),
            delay,
        }
    }

    /// Queue `value` under `key`, superseding anything pending for it.
    pub(crate) fn push(&mut self, key: K, value: V) {
        self.pending.insert(key, (value, Instant::now()));
    }

    /// When the earliest pending key becomes ready.
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.pending
            .values()
            .map(|(_, at)| *at + self.delay)
            .min()
    }

    /// Values whose key has been quiet for the full delay.
    pub(crate) fn take_ready(&mut self) -> Vec<V> {
        let now = Instant::now();
        let delay = self.delay;
        let mut ready = Vec::new();
        let mut keep = IndexMap::with_capacity(self.pending.len());

        for (key, (value, at)) in self.pending.drain(..) {
            if now.duration_since(at) >= delay {
                ready.push(value);
            } else {
                keep.insert(key, (value, at));
            }
        }
        self.pending = keep;
        ready
    }

    /// Everything pending, ready or not.
    pub(crate) fn drain(&mut self) -> Vec<V> {
        self.pending.drain(..).map(|(_, (value, _))| value).collect()
    }
}

/// Sleep until `deadline`, or forever when there is none.
pub(crate) async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn burst_collapses_to_latest_value() {
        let mut debouncer = Debouncer::new(Duration::from_millis(100));
        debouncer.push("MDT", 1);
        tokio::time::advance(Duration::from_millis(40)).await;
        debouncer.push("MDT", 2);

        tokio::time::advance(Duration::from_millis(70)).await;
        assert!(debouncer.take_ready().is_empty());

        tokio::time::advance(Duration::from_millis(30)).await;
        assert_eq!(debouncer.take_ready(), vec![2]);
        assert_eq!(debouncer.next_deadline(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn keys_are_independent_and_keep_order() {
        let mut debouncer = Debouncer::new(Duration::from_millis(100));
        debouncer.push("b", "first");
        debouncer.push("a", "second");
        debouncer.push("b", "third");

        assert_eq!(
            debouncer.next_deadline(),
            Some(Instant::now() + Duration::from_millis(100))
        );
        tokio::time::advance(Duration::from_millis(100)).await;
        assert_eq!(debouncer.take_ready(), vec!["third", "second"]);
    }

    #[tokio::test(start_paused = true)]
    async fn drain_flushes_everything() {
        let mut debouncer = Debouncer::new(Duration::from_secs(10));
        debouncer.push(1, 'x');
        debouncer.push(2, 'y');
        assert_eq!(debouncer.drain(), vec!['x', 'y']);
        assert_eq!(debouncer.next_deadline(), None);
    }
}
