// ── Polling-mode snapshot diff ──
//
// Each tick hands in the full current snapshot of the active scope. The
// first snapshot of a polling session is the baseline and yields nothing.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;

use crate::model::{ChangeKind, ChangeRecord, Ticket};

#[derive(Debug, Default)]
pub(crate) struct SnapshotDiff {
    /// key -> lastModified, in snapshot order.
    previous: Option<IndexMap<String, DateTime<Utc>>>,
}

impl SnapshotDiff {
    /// Compare `current` against the previous snapshot and replace it.
    ///
    /// Records come out in discovery order: created and modified keys in
    /// the order of `current`, then deleted keys in the order of the
    /// previous snapshot.
    pub(crate) fn advance(&mut self, scope: &str, current: &[Ticket]) -> Vec<ChangeRecord> {
        let next: IndexMap<String, DateTime<Utc>> = current
            .iter()
            .map(|t| (t.key.clone(), t.last_modified))
            .collect();

        let Some(previous) = self.previous.replace(next) else {
            return Vec::new();
        };

        let mut records = Vec::new();
        for ticket in current {
            match previous.get(&ticket.key) {
                None => records.push(ChangeRecord::ticket(
                    ChangeKind::Created,
                    scope,
                    &ticket.key,
                    ticket.last_modified,
                )),
                Some(before) if ticket.last_modified > *before => {
                    records.push(ChangeRecord::ticket(
                        ChangeKind::Modified,
                        scope,
                        &ticket.key,
                        ticket.last_modified,
                    ));
                }
                Some(_) => {}
            }
        }

        let now = Utc::now();
        let current_keys = self.previous.as_ref();
        for key in previous.keys() {
            if !current_keys.is_some_and(|c| c.contains_key(key)) {
                records.push(ChangeRecord::ticket(ChangeKind::Deleted, scope, key, now));
            }
        }

        records
    }

    pub(crate) fn has_baseline(&self) -> bool {
        self.previous.is_some()
    }
}
