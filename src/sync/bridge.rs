//! Sync bridge between the local store and a remote document store.
//!
//! # Outbound
//!
//! The bridge registers a [`ChangeObserver`] on the store. Every committed
//! change set of local origin is queued to one worker, which replays it
//! against the remote in commit order:
//!
//! | Local change   | Remote call   |
//! |----------------|---------------|
//! | `Created`      | `set`         |
//! | `Updated`      | `merge`       |
//! | `Deleted`      | `delete`      |
//! | `BlobStored`   | `put_blob`    |
//! | `BlobDeleted`  | `delete_blob` |
//!
//! Remote failures are logged and counted; retrying is the remote client's
//! job.
//!
//! # Inbound
//!
//! One worker per collection consumes the remote change feed. Changes that
//! still carry `has_pending_writes` are this device's own writes and are
//! skipped. Everything else is normalized and written with
//! [`Origin::Remote`], which the outbound observer ignores, so applying a
//! remote change never echoes back.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::model::{Collection, RecordKey, normalize_document};
use crate::remote::{ChangeKind, DocumentChange, RemoteStore};
use crate::storage::{Change, ChangeObserver, ChangeSet, LocalStore, Origin, SharedStore};

/// How often queued remote writes are retried.
pub const RETRY_INTERVAL: Duration = Duration::from_secs(10);

/// Refresh callback fired after inbound changes land in a collection.
pub type RefreshCallback = Arc<dyn Fn(Collection) + Send + Sync>;

/// Snapshot of the bridge counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeStats {
    /// Local changes handed to the remote.
    pub pushed: u64,
    /// Local changes the remote refused.
    pub failed: u64,
    /// Remote changes written locally.
    pub applied: u64,
    /// Remote changes skipped as this device's own pending writes.
    pub ignored_pending: u64,
    /// Remote changes that could not be applied.
    pub failed_inbound: u64,
}

#[derive(Debug, Default)]
struct Counters {
    pushed: AtomicU64,
    failed: AtomicU64,
    applied: AtomicU64,
    ignored_pending: AtomicU64,
    failed_inbound: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> BridgeStats {
        BridgeStats {
            pushed: self.pushed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            applied: self.applied.load(Ordering::Relaxed),
            ignored_pending: self.ignored_pending.load(Ordering::Relaxed),
            failed_inbound: self.failed_inbound.load(Ordering::Relaxed),
        }
    }
}

enum Outbound {
    Changes(ChangeSet),
    Flush(oneshot::Sender<()>),
}

/// Observer that queues local change sets for the outbound worker.
struct Forwarder {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl ChangeObserver for Forwarder {
    fn on_commit(&self, changes: &ChangeSet) {
        if changes.origin != Origin::Local {
            return;
        }
        if self.tx.send(Outbound::Changes(changes.clone())).is_err() {
            debug!(op = %changes.op, "bridge stopped, change not forwarded");
        }
    }
}

fn lock(store: &SharedStore) -> MutexGuard<'_, LocalStore> {
    store.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Shared<R> {
    store: SharedStore,
    remote: Option<R>,
    counters: Counters,
    callbacks: RwLock<HashMap<Collection, Vec<RefreshCallback>>>,
}

impl<R: RemoteStore> Shared<R> {
    async fn push(&self, remote: &R, change: Change) {
        let (what, collection, key, result) = match change {
            Change::Created {
                collection,
                key,
                document,
            } => {
                let key = key.to_doc_key();
                let result = remote.set(collection, &key, document).await;
                ("set", Some(collection), key, result)
            }
            Change::Updated {
                collection,
                key,
                patch,
            } => {
                let key = key.to_doc_key();
                let result = remote.merge(collection, &key, patch).await;
                ("merge", Some(collection), key, result)
            }
            Change::Deleted { collection, key } => {
                let key = key.to_doc_key();
                let result = remote.delete(collection, &key).await;
                ("delete", Some(collection), key, result)
            }
            Change::BlobStored { key, data } => {
                let result = remote.put_blob(&key, data).await;
                ("put_blob", None, key, result)
            }
            Change::BlobDeleted { key } => {
                let result = remote.delete_blob(&key).await;
                ("delete_blob", None, key, result)
            }
        };

        match result {
            Ok(()) => {
                Counters::bump(&self.counters.pushed);
                debug!(what, ?collection, %key, "pushed");
            }
            Err(e) => {
                Counters::bump(&self.counters.failed);
                warn!(what, ?collection, %key, error = %e, "remote write failed");
            }
        }
    }

    /// Apply one inbound change. Returns whether the store changed, plus an
    /// audio key the store is missing.
    fn apply_one(
        &self,
        collection: Collection,
        key: &RecordKey,
        kind: ChangeKind,
        data: serde_json::Map<String, Value>,
    ) -> Result<(bool, Option<String>)> {
        match kind {
            ChangeKind::Added | ChangeKind::Modified => {
                let doc = normalize_document(collection, key, data)?;
                let audio = doc
                    .get("audioRef")
                    .and_then(Value::as_str)
                    .map(str::to_string);

                let mut store = lock(&self.store);
                let changed = store.apply_remote_put(collection, key, doc)?;
                let missing = match audio {
                    Some(blob) if !store.has_blob(&blob)? => Some(blob),
                    _ => None,
                };
                Ok((changed, missing))
            }
            ChangeKind::Removed => {
                let changed = lock(&self.store).apply_remote_delete(collection, key)?;
                Ok((changed, None))
            }
        }
    }

    async fn apply_remote_changes(&self, collection: Collection, changes: Vec<DocumentChange>) -> usize {
        let mut applied = 0;
        let mut missing_blobs = Vec::new();

        for change in changes {
            if change.has_pending_writes {
                Counters::bump(&self.counters.ignored_pending);
                debug!(%collection, key = %change.key, "skipping own pending write");
                continue;
            }

            let key = RecordKey::from_doc_key(&change.key);
            match self.apply_one(collection, &key, change.kind, change.data) {
                Ok((changed, missing)) => {
                    if changed {
                        applied += 1;
                        Counters::bump(&self.counters.applied);
                        debug!(%collection, %key, kind = ?change.kind, "applied remote change");
                    }
                    missing_blobs.extend(missing);
                }
                Err(e) => {
                    Counters::bump(&self.counters.failed_inbound);
                    warn!(%collection, %key, error = %e, "could not apply remote change");
                }
            }
        }

        if let Some(remote) = &self.remote {
            for blob in missing_blobs {
                self.fetch_blob(remote, &blob).await;
            }
        }

        if applied > 0 {
            self.refresh(collection);
        }
        applied
    }

    async fn fetch_blob(&self, remote: &R, key: &str) {
        match remote.get_blob(key).await {
            Ok(Some(data)) => {
                if let Err(e) = lock(&self.store).store_remote_blob(key, &data) {
                    warn!(key, error = %e, "could not store remote audio");
                }
            }
            Ok(None) => debug!(key, "audio not on remote yet"),
            Err(e) => warn!(key, error = %e, "audio download failed"),
        }
    }

    fn refresh(&self, collection: Collection) {
        let callbacks: Vec<RefreshCallback> = self
            .callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&collection)
            .cloned()
            .unwrap_or_default();
        for callback in callbacks {
            callback(collection);
        }
    }
}

/// Keeps a local store and a remote document store in step.
///
/// Dropping the bridge stops its workers.
pub struct SyncBridge<R: RemoteStore> {
    shared: Arc<Shared<R>>,
    outbound: Option<mpsc::UnboundedSender<Outbound>>,
    tasks: Vec<JoinHandle<()>>,
}

impl<R: RemoteStore + Clone> SyncBridge<R> {
    /// Hook into `store` and start the workers.
    ///
    /// The outbound observer is registered before this returns. With no
    /// remote the bridge only serves refresh callbacks.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn start(store: SharedStore, remote: Option<R>) -> Self {
        let shared = Arc::new(Shared {
            store,
            remote,
            counters: Counters::default(),
            callbacks: RwLock::new(HashMap::new()),
        });

        let Some(remote) = shared.remote.clone() else {
            info!("remote unavailable, running local-only");
            return Self {
                shared,
                outbound: None,
                tasks: Vec::new(),
            };
        };

        let (tx, mut rx) = mpsc::unbounded_channel();
        lock(&shared.store).observe(Arc::new(Forwarder { tx: tx.clone() }));

        let mut tasks = Vec::new();

        let worker = Arc::clone(&shared);
        let outbound_remote = remote.clone();
        tasks.push(tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                match msg {
                    Outbound::Changes(set) => {
                        for change in set.changes {
                            worker.push(&outbound_remote, change).await;
                        }
                    }
                    Outbound::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
        }));

        for collection in Collection::ALL {
            let worker = Arc::clone(&shared);
            let inbound_remote = remote.clone();
            tasks.push(tokio::spawn(async move {
                let mut feed = loop {
                    match inbound_remote.subscribe(collection).await {
                        Ok(feed) => break feed,
                        Err(e) => {
                            warn!(%collection, error = %e, "could not subscribe to remote changes, retrying");
                            tokio::time::sleep(RETRY_INTERVAL).await;
                        }
                    }
                };
                while let Some(batch) = feed.recv().await {
                    worker.apply_remote_changes(collection, batch).await;
                }
                debug!(%collection, "remote change feed ended");
            }));
        }

        let retry_remote = remote.clone();
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(RETRY_INTERVAL);
            loop {
                ticker.tick().await;
                if retry_remote.pending_writes() == 0 {
                    continue;
                }
                match retry_remote.flush_pending().await {
                    Ok(sent) if sent > 0 => info!(sent, "flushed queued remote writes"),
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "retrying queued remote writes failed"),
                }
            }
        }));

        info!(remote = remote.name(), "sync bridge started");
        Self {
            shared,
            outbound: Some(tx),
            tasks,
        }
    }
}

impl<R: RemoteStore> SyncBridge<R> {
    /// Store this bridge is attached to.
    #[must_use]
    pub fn store(&self) -> &SharedStore {
        &self.shared.store
    }

    #[must_use]
    pub fn remote(&self) -> Option<&R> {
        self.shared.remote.as_ref()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.outbound.is_some()
    }

    /// Wait until every change committed before this call has been handed to
    /// the remote client.
    pub async fn flush(&self) {
        let Some(tx) = &self.outbound else {
            return;
        };
        let (done_tx, done_rx) = oneshot::channel();
        if tx.send(Outbound::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }

    /// Apply a batch from a remote change feed. Returns how many changes
    /// altered the local store.
    pub async fn apply_remote_changes(
        &self,
        collection: Collection,
        changes: Vec<DocumentChange>,
    ) -> usize {
        self.shared.apply_remote_changes(collection, changes).await
    }

    /// Register a callback fired after remote changes land in `collection`.
    pub fn on_change(&self, collection: Collection, callback: impl Fn(Collection) + Send + Sync + 'static) {
        self.shared
            .callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(collection)
            .or_default()
            .push(Arc::new(callback));
    }

    #[must_use]
    pub fn stats(&self) -> BridgeStats {
        self.shared.counters.snapshot()
    }
}

impl<R: RemoteStore> Drop for SyncBridge<R> {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Document, Record, Recording, Ticket, TicketStatus, User};
    use crate::remote::{MemoryRemote, MemoryServer, RemoteOp};
    use serde_json::json;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    fn shared_store() -> SharedStore {
        Arc::new(Mutex::new(LocalStore::open_memory().unwrap()))
    }

    /// Start a bridge and let its feeds subscribe before any writes.
    async fn started(store: &SharedStore, remote: MemoryRemote) -> SyncBridge<MemoryRemote> {
        let bridge = SyncBridge::start(store.clone(), Some(remote));
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        bridge
    }

    async fn wait_until(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    fn ticket_doc(description: &str) -> Document {
        Ticket::new(description, "Acme", RecordKey::Id(1), 1_000)
            .to_document()
            .unwrap()
    }

    fn document_ops(server: &MemoryServer) -> Vec<RemoteOp> {
        server
            .ops()
            .into_iter()
            .filter(RemoteOp::is_document_op)
            .collect()
    }

    #[tokio::test]
    async fn test_round_trip_between_devices() {
        let server = MemoryServer::new();
        let store_a = shared_store();
        let store_b = shared_store();
        let bridge_a = started(&store_a, server.client("a")).await;
        let _bridge_b = started(&store_b, server.client("b")).await;

        let created = lock(&store_a)
            .create_ticket(Ticket::new("Printer jam", "Acme", RecordKey::Id(1), 5_000))
            .unwrap();
        bridge_a.flush().await;

        let key = created.id.clone().unwrap();
        wait_until(|| lock(&store_b).get::<Ticket>(&key).unwrap().is_some()).await;

        let received: Ticket = lock(&store_b).require(&key).unwrap();
        assert_eq!(received, created);
        assert_eq!(key, RecordKey::Id(1));
    }

    #[tokio::test]
    async fn test_own_echo_is_not_reapplied_or_repushed() {
        let server = MemoryServer::new();
        let store = shared_store();
        let bridge = started(&store, server.client("a")).await;

        lock(&store)
            .create_ticket(Ticket::new("Echo", "Acme", RecordKey::Id(1), 1_000))
            .unwrap();
        bridge.flush().await;

        let echo = DocumentChange {
            kind: ChangeKind::Added,
            key: "1".to_string(),
            data: ticket_doc("Echo"),
            has_pending_writes: true,
        };
        assert_eq!(bridge.apply_remote_changes(Collection::Tickets, vec![echo]).await, 0);
        bridge.flush().await;

        assert_eq!(lock(&store).list_tickets(None).unwrap().len(), 1);
        assert_eq!(document_ops(&server).len(), 1);
        assert!(bridge.stats().ignored_pending >= 1);
        assert_eq!(bridge.stats().pushed, 1);
    }

    #[tokio::test]
    async fn test_remote_changes_are_not_echoed() {
        let server = MemoryServer::new();
        let store = shared_store();
        let bridge = started(&store, server.client("a")).await;

        let change = DocumentChange {
            kind: ChangeKind::Added,
            key: "3".to_string(),
            data: ticket_doc("From elsewhere"),
            has_pending_writes: false,
        };
        assert_eq!(bridge.apply_remote_changes(Collection::Tickets, vec![change]).await, 1);
        bridge.flush().await;

        assert!(document_ops(&server).is_empty());
        assert_eq!(bridge.stats().pushed, 0);
    }

    #[tokio::test]
    async fn test_cascade_delete_reaches_remote() {
        let server = MemoryServer::new();
        let store = shared_store();
        let bridge = started(&store, server.client("a")).await;

        {
            let mut s = lock(&store);
            let mut call = Recording::new("Acme", 90, RecordKey::Id(1), 1_000);
            call.set_key(RecordKey::Id(7));
            s.insert(call).unwrap();
            s.create_ticket_from_call(&RecordKey::Id(7), "First", RecordKey::Id(1), 2_000)
                .unwrap();
            s.create_ticket_from_call(&RecordKey::Id(7), "Second", RecordKey::Id(1), 3_000)
                .unwrap();
        }
        bridge.flush().await;
        let before = document_ops(&server).len();

        lock(&store).delete_recording(&RecordKey::Id(7)).unwrap();
        bridge.flush().await;

        assert!(lock(&store).tickets_for_call(&RecordKey::Id(7)).unwrap().is_empty());
        let deletes: Vec<RemoteOp> = document_ops(&server).split_off(before);
        assert_eq!(deletes.len(), 3);
        assert!(deletes.iter().all(|op| matches!(op, RemoteOp::Delete { .. })));
        assert!(server.keys(Collection::Tickets).is_empty());
        assert!(server.keys(Collection::Calls).is_empty());
    }

    #[tokio::test]
    async fn test_key_coercion() {
        let store = shared_store();
        let bridge = started(&store, MemoryServer::new().client("a")).await;

        let changes = vec![
            DocumentChange {
                kind: ChangeKind::Added,
                key: "42".to_string(),
                data: ticket_doc("Numeric"),
                has_pending_writes: false,
            },
            DocumentChange {
                kind: ChangeKind::Added,
                key: "client-abc".to_string(),
                data: ticket_doc("Opaque"),
                has_pending_writes: false,
            },
        ];
        assert_eq!(bridge.apply_remote_changes(Collection::Tickets, changes).await, 2);

        let s = lock(&store);
        assert!(s.get::<Ticket>(&RecordKey::Id(42)).unwrap().is_some());
        let opaque: Ticket = s
            .require(&RecordKey::Opaque("client-abc".to_string()))
            .unwrap();
        assert!(opaque.description.contains("Opaque"));
    }

    #[tokio::test]
    async fn test_status_update_forwards_only_status() {
        let server = MemoryServer::new();
        let store = shared_store();
        let bridge = started(&store, server.client("a")).await;

        {
            let mut s = lock(&store);
            let mut ticket = Ticket::new("Refund", "Acme", RecordKey::Id(1), 1_000);
            ticket.set_key(RecordKey::Id(5));
            s.create_ticket(ticket).unwrap();
            s.set_ticket_status(&RecordKey::Id(5), TicketStatus::Closed)
                .unwrap();
        }
        bridge.flush().await;

        let ops = document_ops(&server);
        let Some(RemoteOp::Merge { key, patch, .. }) = ops.last() else {
            panic!("expected a merge, got {ops:?}");
        };
        assert_eq!(key, "5");
        let expected: Document = [("status".to_string(), json!("Closed"))].into_iter().collect();
        assert_eq!(patch, &expected);
    }

    #[tokio::test]
    async fn test_bad_documents_do_not_stop_the_batch() {
        let store = shared_store();
        let bridge = started(&store, MemoryServer::new().client("a")).await;
        let refreshed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&refreshed);
        bridge.on_change(Collection::Tickets, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let mut bogus = Document::new();
        bogus.insert("bogus".to_string(), json!(1));
        let changes = vec![
            DocumentChange {
                kind: ChangeKind::Added,
                key: "9".to_string(),
                data: bogus,
                has_pending_writes: false,
            },
            DocumentChange {
                kind: ChangeKind::Added,
                key: "10".to_string(),
                data: ticket_doc("Fine"),
                has_pending_writes: false,
            },
        ];

        assert_eq!(bridge.apply_remote_changes(Collection::Tickets, changes).await, 1);
        assert_eq!(bridge.stats().failed_inbound, 1);
        assert_eq!(refreshed.load(Ordering::SeqCst), 1);
        assert!(lock(&store).get::<Ticket>(&RecordKey::Id(9)).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remote_delete_applies_locally() {
        let store = shared_store();
        let bridge = started(&store, MemoryServer::new().client("a")).await;
        lock(&store)
            .insert(User::new("Ravish", "1234", crate::model::Role::Agent))
            .unwrap();

        let removal = DocumentChange {
            kind: ChangeKind::Removed,
            key: "1".to_string(),
            data: Document::new(),
            has_pending_writes: false,
        };
        assert_eq!(bridge.apply_remote_changes(Collection::Users, vec![removal]).await, 1);
        assert!(lock(&store).list_users().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_audio_follows_recording() {
        let server = MemoryServer::new();
        let store_a = shared_store();
        let store_b = shared_store();
        let bridge_a = started(&store_a, server.client("a")).await;
        let _bridge_b = started(&store_b, server.client("b")).await;

        let call = lock(&store_a)
            .add_recording(
                Recording::new("Acme", 30, RecordKey::Id(1), 1_000),
                Some(b"RIFF....WAVE"),
            )
            .unwrap();
        bridge_a.flush().await;

        let audio = call.audio_ref.clone().unwrap();
        assert!(server.has_blob(&audio));
        let doc = server
            .document(Collection::Calls, &call.id.clone().unwrap().to_doc_key())
            .unwrap();
        assert_eq!(doc["audioRef"], json!(audio));

        wait_until(|| lock(&store_b).has_blob(&audio).unwrap()).await;
        assert_eq!(lock(&store_b).get_blob(&audio).unwrap().unwrap(), b"RIFF....WAVE");
    }

    #[tokio::test]
    async fn test_offline_writes_reach_remote_on_reconnect() {
        let server = MemoryServer::new();
        let client = server.client("a");
        let store = shared_store();
        let bridge = started(&store, client.clone()).await;

        client.go_offline();
        lock(&store)
            .create_ticket(Ticket::new("Queued", "Acme", RecordKey::Id(1), 1_000))
            .unwrap();
        bridge.flush().await;
        assert!(document_ops(&server).is_empty());
        assert_eq!(client.pending_writes(), 1);

        client.go_online();
        assert_eq!(document_ops(&server).len(), 1);
    }

    #[tokio::test]
    async fn test_rejected_writes_are_counted() {
        let client = MemoryServer::new().client("a");
        let store = shared_store();
        let bridge = started(&store, client.clone()).await;

        client.reject_writes(true);
        lock(&store)
            .create_ticket(Ticket::new("Lost", "Acme", RecordKey::Id(1), 1_000))
            .unwrap();
        bridge.flush().await;

        assert_eq!(bridge.stats().failed, 1);
        assert_eq!(lock(&store).list_tickets(None).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_local_only_bridge() {
        let store = shared_store();
        let bridge: SyncBridge<MemoryRemote> = SyncBridge::start(store.clone(), None);
        assert!(!bridge.is_connected());

        lock(&store)
            .create_ticket(Ticket::new("Offline", "Acme", RecordKey::Id(1), 1_000))
            .unwrap();
        bridge.flush().await;
        assert_eq!(bridge.stats(), BridgeStats::default());
    }
}
