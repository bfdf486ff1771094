//! Ninety-day retention for calls, tasks, and tickets.
//!
//! Records at least [`RETENTION_DAYS`] old are deleted through the normal
//! mutation path, so the deletions reach the remote like any other. Once a
//! record passes [`WARNING_DAYS`] the sweep reports that a backup is due.

use serde::Serialize;
use tracing::info;

use crate::error::Result;
use crate::model::Collection;
use crate::storage::LocalStore;

pub const RETENTION_DAYS: i64 = 90;
pub const WARNING_DAYS: i64 = 80;

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// Collections swept, in order. Calls go first so their tickets are removed
/// by the cascade rather than counted twice.
pub const SWEPT: [Collection; 3] = [Collection::Calls, Collection::Activities, Collection::Tickets];

/// What a sweep removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionReport {
    pub calls: usize,
    pub activities: usize,
    pub tickets: usize,
    pub blobs_pruned: usize,
    /// Some record will expire within the next ten days.
    pub backup_due: bool,
}

impl RetentionReport {
    #[must_use]
    pub const fn total(&self) -> usize {
        self.calls + self.activities + self.tickets
    }
}

/// Oldest timestamp that is still retained at `now`, exclusive.
#[must_use]
pub const fn cutoff(now: i64) -> i64 {
    now - RETENTION_DAYS * DAY_MS
}

/// Delete expired records and report whether a backup is due.
///
/// # Errors
///
/// Returns the first store error; collections already swept stay swept.
pub fn sweep(store: &mut LocalStore, now: i64) -> Result<RetentionReport> {
    let expire_at = cutoff(now);
    let warn_at = now - WARNING_DAYS * DAY_MS;
    let mut report = RetentionReport::default();

    for collection in SWEPT {
        let expired = store.keys_created_until(collection, expire_at)?;
        let removed = store.delete_many(collection, &expired)?;
        match collection {
            Collection::Calls => report.calls = removed,
            Collection::Activities => report.activities = removed,
            _ => report.tickets = removed,
        }
    }
    report.blobs_pruned = store.prune_orphan_blobs()?;

    for collection in SWEPT {
        if store.count_between(collection, expire_at, warn_at)? > 0 {
            report.backup_due = true;
            break;
        }
    }

    if report.total() > 0 {
        info!(
            calls = report.calls,
            activities = report.activities,
            tickets = report.tickets,
            "retention sweep removed expired records"
        );
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RecordKey, Recording, Task, Ticket};

    const NOW: i64 = 1_760_000_000_000;

    fn days_ago(days: i64) -> i64 {
        NOW - days * DAY_MS
    }

    #[test]
    fn test_boundary() {
        let mut store = LocalStore::open_memory().unwrap();
        store
            .insert(Recording::new("Old", 10, RecordKey::Id(1), days_ago(90)))
            .unwrap();
        let kept = store
            .insert(Recording::new("Recent", 10, RecordKey::Id(1), days_ago(89)))
            .unwrap();

        let report = sweep(&mut store, NOW).unwrap();
        assert_eq!(report.calls, 1);
        assert!(report.backup_due);

        let left = store.list_recordings().unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id, kept.id);
    }

    #[test]
    fn test_young_records_are_not_flagged() {
        let mut store = LocalStore::open_memory().unwrap();
        store
            .insert(Task::new("Follow up", RecordKey::Id(1), days_ago(45)))
            .unwrap();

        let report = sweep(&mut store, NOW).unwrap();
        assert_eq!(report, RetentionReport::default());
        assert_eq!(store.list_tasks().unwrap().len(), 1);
    }

    #[test]
    fn test_warning_window_edges() {
        let mut store = LocalStore::open_memory().unwrap();
        store
            .insert(Ticket::new("Edge", "Acme", RecordKey::Id(1), days_ago(80)))
            .unwrap();
        assert!(sweep(&mut store, NOW).unwrap().backup_due);

        let mut store = LocalStore::open_memory().unwrap();
        store
            .insert(Ticket::new("Fresh", "Acme", RecordKey::Id(1), days_ago(80) + 1))
            .unwrap();
        assert!(!sweep(&mut store, NOW).unwrap().backup_due);
    }

    #[test]
    fn test_expired_call_takes_tickets_and_audio() {
        let mut store = LocalStore::open_memory().unwrap();
        let call = store
            .add_recording(
                Recording::new("Acme", 10, RecordKey::Id(1), days_ago(100)),
                Some(b"audio"),
            )
            .unwrap();
        let key = call.id.clone().unwrap();
        store
            .create_ticket_from_call(&key, "Follow up", RecordKey::Id(1), days_ago(95))
            .unwrap();

        let report = sweep(&mut store, NOW).unwrap();
        assert_eq!(report.calls, 1);
        assert_eq!(report.tickets, 0, "cascaded tickets are not counted twice");
        assert!(store.list_tickets(None).unwrap().is_empty());
        assert!(!store.has_blob(call.audio_ref.as_deref().unwrap()).unwrap());
    }

    #[test]
    fn test_users_and_notes_are_kept() {
        let mut store = LocalStore::open_memory().unwrap();
        store.ensure_admin("Admin", "0000").unwrap();
        sweep(&mut store, NOW).unwrap();
        assert_eq!(store.list_users().unwrap().len(), 1);
    }
}
