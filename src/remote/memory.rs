//! In-process remote document store.
//!
//! A [`MemoryServer`] holds the documents; each device talks to it through its
//! own [`MemoryRemote`] client. The clients mimic a hosted document database:
//!
//! - a write is echoed to the writer's own subscribers immediately with
//!   `has_pending_writes = true`
//! - every other device's subscribers receive it once the server applies it
//! - while offline, writes wait in the client and are applied in order on
//!   reconnect, and other devices' changes are held until then

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tracing::debug;

use super::{ChangeFeed, ChangeKind, DocumentChange, RemoteStore};
use crate::error::{Error, Result};
use crate::model::{Collection, Document};

/// A write as applied by the server, kept for inspection.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteOp {
    Set {
        device: String,
        collection: Collection,
        key: String,
        document: Document,
    },
    Merge {
        device: String,
        collection: Collection,
        key: String,
        patch: Document,
    },
    Delete {
        device: String,
        collection: Collection,
        key: String,
    },
    PutBlob {
        device: String,
        key: String,
    },
    DeleteBlob {
        device: String,
        key: String,
    },
}

impl RemoteOp {
    /// Device that issued the write.
    #[must_use]
    pub fn device(&self) -> &str {
        match self {
            Self::Set { device, .. }
            | Self::Merge { device, .. }
            | Self::Delete { device, .. }
            | Self::PutBlob { device, .. }
            | Self::DeleteBlob { device, .. } => device,
        }
    }

    /// Whether this touched a document (as opposed to a blob).
    #[must_use]
    pub const fn is_document_op(&self) -> bool {
        matches!(self, Self::Set { .. } | Self::Merge { .. } | Self::Delete { .. })
    }
}

#[derive(Debug, Clone)]
enum Write {
    Set {
        collection: Collection,
        key: String,
        document: Document,
    },
    Merge {
        collection: Collection,
        key: String,
        patch: Document,
    },
    Delete {
        collection: Collection,
        key: String,
    },
    PutBlob {
        key: String,
        data: Arc<[u8]>,
    },
    DeleteBlob {
        key: String,
    },
}

#[derive(Debug)]
struct Subscriber {
    device: String,
    collection: Collection,
    online: Arc<AtomicBool>,
    /// Confirmed changes that arrived while the device was offline.
    held: Vec<DocumentChange>,
    tx: mpsc::UnboundedSender<Vec<DocumentChange>>,
}

#[derive(Debug, Default)]
struct ServerState {
    docs: HashMap<Collection, BTreeMap<String, Document>>,
    blobs: HashMap<String, Arc<[u8]>>,
    subscribers: Vec<Subscriber>,
    ops: Vec<RemoteOp>,
}

impl ServerState {
    /// Kind and resulting body a document write would produce.
    fn preview(&self, write: &Write) -> Option<(Collection, DocumentChange)> {
        let (collection, key) = match write {
            Write::Set { collection, key, .. }
            | Write::Merge { collection, key, .. }
            | Write::Delete { collection, key } => (*collection, key),
            Write::PutBlob { .. } | Write::DeleteBlob { .. } => return None,
        };
        let existing = self.docs.get(&collection).and_then(|d| d.get(key));
        let kind = if existing.is_some() {
            ChangeKind::Modified
        } else {
            ChangeKind::Added
        };

        let change = match write {
            Write::Set { document, .. } => DocumentChange {
                kind,
                key: key.clone(),
                data: document.clone(),
                has_pending_writes: false,
            },
            Write::Merge { patch, .. } => {
                let mut data = existing.cloned().unwrap_or_default();
                data.extend(patch.clone());
                DocumentChange {
                    kind,
                    key: key.clone(),
                    data,
                    has_pending_writes: false,
                }
            }
            Write::Delete { .. } => {
                existing?;
                DocumentChange {
                    kind: ChangeKind::Removed,
                    key: key.clone(),
                    data: Document::new(),
                    has_pending_writes: false,
                }
            }
            Write::PutBlob { .. } | Write::DeleteBlob { .. } => return None,
        };
        Some((collection, change))
    }

    fn commit(&mut self, device: &str, write: Write) {
        let preview = self.preview(&write);
        let device = device.to_string();

        match write {
            Write::Set {
                collection,
                key,
                document,
            } => {
                self.docs
                    .entry(collection)
                    .or_default()
                    .insert(key.clone(), document.clone());
                self.ops.push(RemoteOp::Set {
                    device: device.clone(),
                    collection,
                    key,
                    document,
                });
            }
            Write::Merge {
                collection,
                key,
                patch,
            } => {
                self.docs
                    .entry(collection)
                    .or_default()
                    .entry(key.clone())
                    .or_default()
                    .extend(patch.clone());
                self.ops.push(RemoteOp::Merge {
                    device: device.clone(),
                    collection,
                    key,
                    patch,
                });
            }
            Write::Delete { collection, key } => {
                if let Some(docs) = self.docs.get_mut(&collection) {
                    docs.remove(&key);
                }
                self.ops.push(RemoteOp::Delete {
                    device: device.clone(),
                    collection,
                    key,
                });
            }
            Write::PutBlob { key, data } => {
                self.blobs.insert(key.clone(), data);
                self.ops.push(RemoteOp::PutBlob {
                    device: device.clone(),
                    key,
                });
            }
            Write::DeleteBlob { key } => {
                self.blobs.remove(&key);
                self.ops.push(RemoteOp::DeleteBlob {
                    device: device.clone(),
                    key,
                });
            }
        }

        if let Some((collection, change)) = preview {
            self.broadcast(collection, &change, &device);
        }
    }

    /// Local echo to the writer's own subscribers, online or not.
    fn echo(&mut self, collection: Collection, change: &DocumentChange, device: &str) {
        self.subscribers.retain(|s| {
            if s.collection != collection || s.device != device {
                return !s.tx.is_closed();
            }
            s.tx.send(vec![change.clone()]).is_ok()
        });
    }

    /// Confirmed change to every other device. Offline devices get it on
    /// reconnect. Closed subscribers are dropped.
    fn broadcast(&mut self, collection: Collection, change: &DocumentChange, writer: &str) {
        self.subscribers.retain_mut(|s| {
            if s.collection != collection || s.device == writer {
                return !s.tx.is_closed();
            }
            if !s.online.load(Ordering::SeqCst) {
                s.held.push(change.clone());
                return !s.tx.is_closed();
            }
            s.tx.send(vec![change.clone()]).is_ok()
        });
    }

    /// Deliver what `device` missed while offline.
    fn release(&mut self, device: &str) {
        self.subscribers.retain_mut(|s| {
            if s.device != device || s.held.is_empty() {
                return !s.tx.is_closed();
            }
            s.tx.send(std::mem::take(&mut s.held)).is_ok()
        });
    }
}

/// Shared in-process document server.
#[derive(Debug, Clone, Default)]
pub struct MemoryServer {
    state: Arc<Mutex<ServerState>>,
}

impl MemoryServer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A client for one device.
    #[must_use]
    pub fn client(&self, device_id: &str) -> MemoryRemote {
        MemoryRemote {
            server: self.clone(),
            device: device_id.to_string(),
            online: Arc::new(AtomicBool::new(true)),
            reject_writes: Arc::new(AtomicBool::new(false)),
            queue: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    fn state(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every write the server has applied, in order.
    #[must_use]
    pub fn ops(&self) -> Vec<RemoteOp> {
        self.state().ops.clone()
    }

    /// Current body of a document.
    #[must_use]
    pub fn document(&self, collection: Collection, key: &str) -> Option<Document> {
        self.state()
            .docs
            .get(&collection)
            .and_then(|docs| docs.get(key))
            .cloned()
    }

    /// Keys of all documents in a collection, sorted.
    #[must_use]
    pub fn keys(&self, collection: Collection) -> Vec<String> {
        self.state()
            .docs
            .get(&collection)
            .map(|docs| docs.keys().cloned().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn has_blob(&self, key: &str) -> bool {
        self.state().blobs.contains_key(key)
    }
}

/// One device's connection to a [`MemoryServer`].
#[derive(Debug, Clone)]
pub struct MemoryRemote {
    server: MemoryServer,
    device: String,
    online: Arc<AtomicBool>,
    reject_writes: Arc<AtomicBool>,
    queue: Arc<Mutex<VecDeque<Write>>>,
}

impl MemoryRemote {
    #[must_use]
    pub fn device_id(&self) -> &str {
        &self.device
    }

    #[must_use]
    pub fn server(&self) -> &MemoryServer {
        &self.server
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Stop reaching the server. Writes queue up locally and other devices'
    /// changes stop arriving.
    pub fn go_offline(&self) {
        self.online.store(false, Ordering::SeqCst);
    }

    /// Reconnect: receive held changes, then apply queued writes in order.
    /// Returns how many writes were applied.
    pub fn go_online(&self) -> usize {
        self.online.store(true, Ordering::SeqCst);
        self.server.state().release(&self.device);
        self.drain_queue()
    }

    /// Make the server refuse writes (for exercising error paths).
    pub fn reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::SeqCst);
    }

    fn queue(&self) -> MutexGuard<'_, VecDeque<Write>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn drain_queue(&self) -> usize {
        let pending: Vec<Write> = self.queue().drain(..).collect();
        let count = pending.len();
        if count > 0 {
            let mut state = self.server.state();
            for write in pending {
                state.commit(&self.device, write);
            }
            debug!(device = %self.device, count, "flushed queued writes");
        }
        count
    }

    fn write(&self, write: Write) -> Result<()> {
        if self.reject_writes.load(Ordering::SeqCst) {
            return Err(Error::Remote("write rejected by server".into()));
        }

        let mut state = self.server.state();

        // Latency compensation: the writer sees its own change right away
        if let Some((collection, mut change)) = state.preview(&write) {
            change.has_pending_writes = true;
            state.echo(collection, &change, &self.device);
        }

        if self.is_online() {
            state.commit(&self.device, write);
        } else {
            drop(state);
            self.queue().push_back(write);
        }
        Ok(())
    }
}

impl RemoteStore for MemoryRemote {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn set(&self, collection: Collection, key: &str, document: Document) -> Result<()> {
        self.write(Write::Set {
            collection,
            key: key.to_string(),
            document,
        })
    }

    async fn merge(&self, collection: Collection, key: &str, patch: Document) -> Result<()> {
        self.write(Write::Merge {
            collection,
            key: key.to_string(),
            patch,
        })
    }

    async fn delete(&self, collection: Collection, key: &str) -> Result<()> {
        self.write(Write::Delete {
            collection,
            key: key.to_string(),
        })
    }

    async fn subscribe(&self, collection: Collection) -> Result<ChangeFeed> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.server.state();

        let snapshot: Vec<DocumentChange> = state
            .docs
            .get(&collection)
            .map(|docs| {
                docs.iter()
                    .map(|(key, data)| DocumentChange {
                        kind: ChangeKind::Added,
                        key: key.clone(),
                        data: data.clone(),
                        has_pending_writes: false,
                    })
                    .collect()
            })
            .unwrap_or_default();
        if !snapshot.is_empty() {
            // Receiver is alive: we still hold it
            let _ = tx.send(snapshot);
        }

        state.subscribers.push(Subscriber {
            device: self.device.clone(),
            collection,
            online: Arc::clone(&self.online),
            held: Vec::new(),
            tx,
        });
        Ok(rx)
    }

    async fn put_blob(&self, key: &str, data: Arc<[u8]>) -> Result<()> {
        self.write(Write::PutBlob {
            key: key.to_string(),
            data,
        })
    }

    async fn get_blob(&self, key: &str) -> Result<Option<Vec<u8>>> {
        if !self.is_online() {
            return Err(Error::Remote("offline".into()));
        }
        Ok(self.server.state().blobs.get(key).map(|data| data.to_vec()))
    }

    async fn delete_blob(&self, key: &str) -> Result<()> {
        self.write(Write::DeleteBlob {
            key: key.to_string(),
        })
    }

    async fn flush_pending(&self) -> Result<usize> {
        if self.is_online() {
            Ok(self.drain_queue())
        } else {
            Ok(0)
        }
    }

    fn pending_writes(&self) -> usize {
        self.queue().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: serde_json::Value) -> Document {
        match value {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn test_writer_sees_pending_echo_others_see_confirmed() {
        let server = MemoryServer::new();
        let a = server.client("a");
        let b = server.client("b");
        let mut feed_a = a.subscribe(Collection::Tickets).await.unwrap();
        let mut feed_b = b.subscribe(Collection::Tickets).await.unwrap();

        a.set(Collection::Tickets, "1", doc(json!({"description": "x"})))
            .await
            .unwrap();

        let echo = feed_a.try_recv().unwrap();
        assert_eq!(echo.len(), 1);
        assert!(echo[0].has_pending_writes);
        assert_eq!(echo[0].kind, ChangeKind::Added);
        assert!(feed_a.try_recv().is_err(), "writer gets exactly one event");

        let confirmed = feed_b.try_recv().unwrap();
        assert!(!confirmed[0].has_pending_writes);
        assert_eq!(confirmed[0].key, "1");
    }

    #[tokio::test]
    async fn test_merge_creates_missing_document() {
        let server = MemoryServer::new();
        let a = server.client("a");
        a.merge(Collection::Tickets, "5", doc(json!({"status": "Closed"})))
            .await
            .unwrap();
        assert_eq!(
            server.document(Collection::Tickets, "5").unwrap()["status"],
            json!("Closed")
        );
    }

    #[tokio::test]
    async fn test_subscribe_starts_with_snapshot() {
        let server = MemoryServer::new();
        let a = server.client("a");
        a.set(Collection::Users, "1", doc(json!({"name": "Ravish"})))
            .await
            .unwrap();

        let mut feed = server.client("b").subscribe(Collection::Users).await.unwrap();
        let snapshot = feed.try_recv().unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].kind, ChangeKind::Added);
    }

    #[tokio::test]
    async fn test_offline_writes_flush_in_order() {
        let server = MemoryServer::new();
        let a = server.client("a");
        let mut feed_b = server.client("b").subscribe(Collection::Activities).await.unwrap();

        a.go_offline();
        a.set(Collection::Activities, "1", doc(json!({"title": "t"})))
            .await
            .unwrap();
        a.merge(Collection::Activities, "1", doc(json!({"status": "completed"})))
            .await
            .unwrap();
        assert_eq!(a.pending_writes(), 2);
        assert!(server.ops().is_empty());
        assert!(feed_b.try_recv().is_err());

        assert_eq!(a.go_online(), 2);
        assert_eq!(a.pending_writes(), 0);
        let ops = server.ops();
        assert!(matches!(ops[0], RemoteOp::Set { .. }));
        assert!(matches!(ops[1], RemoteOp::Merge { .. }));
        assert_eq!(feed_b.try_recv().unwrap()[0].kind, ChangeKind::Added);
        assert_eq!(feed_b.try_recv().unwrap()[0].kind, ChangeKind::Modified);
    }

    #[tokio::test]
    async fn test_offline_device_receives_changes_on_reconnect() {
        let server = MemoryServer::new();
        let a = server.client("a");
        let b = server.client("b");
        let mut feed_b = b.subscribe(Collection::Tickets).await.unwrap();

        b.go_offline();
        a.set(Collection::Tickets, "1", doc(json!({"status": "Open"})))
            .await
            .unwrap();
        a.merge(Collection::Tickets, "1", doc(json!({"status": "Closed"})))
            .await
            .unwrap();
        assert!(feed_b.try_recv().is_err());

        b.go_online();
        let held = feed_b.try_recv().unwrap();
        assert_eq!(held.len(), 2);
        assert_eq!(held[0].kind, ChangeKind::Added);
        assert_eq!(held[1].kind, ChangeKind::Modified);
        assert_eq!(held[1].data["status"], json!("Closed"));
        assert!(feed_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_offline_writer_still_sees_its_own_echo() {
        let server = MemoryServer::new();
        let a = server.client("a");
        let mut feed_a = a.subscribe(Collection::Tickets).await.unwrap();

        a.go_offline();
        a.set(Collection::Tickets, "1", doc(json!({"status": "Open"})))
            .await
            .unwrap();
        let echo = feed_a.try_recv().unwrap();
        assert!(echo[0].has_pending_writes);

        a.go_online();
        assert!(feed_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_delete_of_missing_document_is_silent() {
        let server = MemoryServer::new();
        let a = server.client("a");
        let mut feed_b = server.client("b").subscribe(Collection::Calls).await.unwrap();
        a.delete(Collection::Calls, "404").await.unwrap();
        assert!(feed_b.try_recv().is_err());
        assert_eq!(server.ops().len(), 1);
    }

    #[tokio::test]
    async fn test_blobs_are_not_documents() {
        let server = MemoryServer::new();
        let a = server.client("a");
        a.put_blob("k", Arc::from(&b"audio"[..])).await.unwrap();
        assert!(server.has_blob("k"));
        assert_eq!(a.get_blob("k").await.unwrap().unwrap(), b"audio");
        assert!(!server.ops()[0].is_document_op());
        a.delete_blob("k").await.unwrap();
        assert!(!server.has_blob("k"));
    }

    #[tokio::test]
    async fn test_rejected_writes_error() {
        let server = MemoryServer::new();
        let a = server.client("a");
        a.reject_writes(true);
        assert!(a.set(Collection::Users, "1", Document::new()).await.is_err());
        assert!(server.ops().is_empty());
    }
}
