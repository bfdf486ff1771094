//! REST document endpoint client.
//!
//! Documents live at `{endpoint}/v1/projects/{project}/collections/{c}/documents/{key}`:
//! `PUT` replaces, `PATCH` merges, `DELETE` removes. Audio blobs live under
//! `{endpoint}/v1/projects/{project}/blobs/{key}`.
//!
//! The change feed polls `GET .../collections/{c}/changes?since={cursor}`.
//! Without a cursor the server answers with every current document as
//! `added`. Each change carries the device that wrote it; changes written by
//! this device are surfaced with `has_pending_writes` set so the bridge
//! does not re-apply its own writes.
//!
//! Writes that cannot reach the server go to an in-order outbox and are
//! retried by [`RemoteStore::flush_pending`]. With a file path configured
//! the outbox survives restarts.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{ChangeFeed, ChangeKind, DocumentChange, RemoteStore};
use crate::error::{Error, Result};
use crate::model::{Collection, Document};
use crate::sync::file::{append_jsonl, atomic_write, read_jsonl, write_jsonl};

/// Header naming the writing device.
pub const DEVICE_HEADER: &str = "X-Deskline-Device";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// A write waiting in the outbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
enum QueuedWrite {
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
    },
    DeleteBlob {
        key: String,
    },
}

impl QueuedWrite {
    fn blob_key(&self) -> Option<&str> {
        match self {
            Self::PutBlob { key } => Some(key),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct Outbox {
    entries: VecDeque<QueuedWrite>,
    blobs: HashMap<String, Arc<[u8]>>,
    path: Option<PathBuf>,
}

impl Outbox {
    fn load(path: PathBuf) -> Result<Self> {
        let mut entries = VecDeque::new();
        let mut blobs = HashMap::new();
        let spool = blob_spool_dir(&path);

        for entry in read_jsonl::<QueuedWrite>(&path)? {
            if let Some(key) = entry.blob_key() {
                match std::fs::read(spool.join(key)) {
                    Ok(data) => {
                        blobs.insert(key.to_string(), Arc::from(data));
                    }
                    Err(e) => {
                        warn!(key, error = %e, "dropping queued blob upload without spooled payload");
                        continue;
                    }
                }
            }
            entries.push_back(entry);
        }

        if !entries.is_empty() {
            debug!(count = entries.len(), path = %path.display(), "loaded remote outbox");
        }
        Ok(Self {
            entries,
            blobs,
            path: Some(path),
        })
    }

    fn push(&mut self, entry: QueuedWrite, blob: Option<Arc<[u8]>>) -> Result<()> {
        if let Some(path) = &self.path {
            if let (Some(key), Some(data)) = (entry.blob_key(), &blob) {
                atomic_write(&blob_spool_dir(path).join(key), data)?;
            }
            append_jsonl(path, &entry)?;
        }
        if let (Some(key), Some(data)) = (entry.blob_key(), blob) {
            self.blobs.insert(key.to_string(), data);
        }
        self.entries.push_back(entry);
        Ok(())
    }

    fn front(&self) -> Option<(QueuedWrite, Option<Arc<[u8]>>)> {
        let entry = self.entries.front()?.clone();
        let blob = entry.blob_key().and_then(|k| self.blobs.get(k).cloned());
        Some((entry, blob))
    }

    fn pop(&mut self) -> Result<()> {
        let Some(entry) = self.entries.pop_front() else {
            return Ok(());
        };

        if let Some(key) = entry.blob_key() {
            let still_queued = self.entries.iter().any(|e| e.blob_key() == Some(key));
            if !still_queued {
                self.blobs.remove(key);
                if let Some(path) = &self.path {
                    let spooled = blob_spool_dir(path).join(key);
                    if spooled.exists() {
                        std::fs::remove_file(spooled)?;
                    }
                }
            }
        }

        if let Some(path) = &self.path {
            let remaining: Vec<&QueuedWrite> = self.entries.iter().collect();
            write_jsonl(path, &remaining)?;
        }
        Ok(())
    }
}

fn blob_spool_dir(outbox: &Path) -> PathBuf {
    outbox.with_extension("blobs")
}

/// Why a request did not go through.
enum Failure {
    /// Worth retrying later (unreachable, timeout, 5xx, 429).
    Transient(Error),
    /// The server refused it; retrying will not help.
    Rejected(Error),
}

impl Failure {
    fn from_status(status: StatusCode, body: String) -> Self {
        let error = Error::Remote(format!("server answered {status}: {body}"));
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            Self::Transient(error)
        } else {
            Self::Rejected(error)
        }
    }
}

#[derive(Debug)]
struct Inner {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    device_id: String,
    poll_interval: Duration,
    outbox: Mutex<Outbox>,
    flush_lock: tokio::sync::Mutex<()>,
}

/// Client for the REST document endpoint.
#[derive(Debug, Clone)]
pub struct HttpRemote {
    inner: Arc<Inner>,
}

/// Construction parameters for [`HttpRemote`].
#[derive(Debug, Clone)]
pub struct HttpRemoteConfig {
    pub endpoint: String,
    pub project_id: String,
    pub api_key: Option<String>,
    pub device_id: String,
    pub poll_interval: Duration,
    /// Outbox file; `None` keeps queued writes in memory only.
    pub outbox_path: Option<PathBuf>,
}

impl HttpRemote {
    /// Build a client, loading any persisted outbox.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built or the outbox
    /// file cannot be read.
    pub fn new(config: HttpRemoteConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        let outbox = match config.outbox_path {
            Some(path) => Outbox::load(path)?,
            None => Outbox::default(),
        };

        let base_url = format!(
            "{}/v1/projects/{}",
            config.endpoint.trim_end_matches('/'),
            config.project_id
        );

        Ok(Self {
            inner: Arc::new(Inner {
                client,
                base_url,
                api_key: config.api_key.filter(|k| !k.is_empty()),
                device_id: config.device_id,
                poll_interval: config.poll_interval,
                outbox: Mutex::new(outbox),
                flush_lock: tokio::sync::Mutex::new(()),
            }),
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    fn document_url(&self, collection: Collection, key: &str) -> String {
        format!(
            "{}/collections/{}/documents/{key}",
            self.inner.base_url,
            collection.as_str()
        )
    }

    fn blob_url(&self, key: &str) -> String {
        format!("{}/blobs/{key}", self.inner.base_url)
    }

    fn changes_url(&self, collection: Collection) -> String {
        format!(
            "{}/collections/{}/changes",
            self.inner.base_url,
            collection.as_str()
        )
    }

    fn outbox(&self) -> MutexGuard<'_, Outbox> {
        self.inner.outbox.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .inner
            .client
            .request(method, url)
            .header(DEVICE_HEADER, &self.inner.device_id);
        if let Some(key) = &self.inner.api_key {
            builder = builder.bearer_auth(key);
        }
        builder
    }

    async fn send(&self, write: &QueuedWrite, blob: Option<Arc<[u8]>>) -> std::result::Result<(), Failure> {
        use reqwest::Method;

        let (builder, missing_ok) = match write {
            QueuedWrite::Set {
                collection,
                key,
                document,
            } => (
                self.request(Method::PUT, &self.document_url(*collection, key))
                    .json(document),
                false,
            ),
            QueuedWrite::Merge {
                collection,
                key,
                patch,
            } => (
                self.request(Method::PATCH, &self.document_url(*collection, key))
                    .json(patch),
                false,
            ),
            QueuedWrite::Delete { collection, key } => (
                self.request(Method::DELETE, &self.document_url(*collection, key)),
                true,
            ),
            QueuedWrite::PutBlob { key } => {
                let Some(data) = blob else {
                    return Err(Failure::Rejected(Error::Remote(format!(
                        "blob {key} has no payload"
                    ))));
                };
                (
                    self.request(Method::PUT, &self.blob_url(key))
                        .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                        .body(data.to_vec()),
                    false,
                )
            }
            QueuedWrite::DeleteBlob { key } => {
                (self.request(Method::DELETE, &self.blob_url(key)), true)
            }
        };

        let response = builder
            .send()
            .await
            .map_err(|e| Failure::Transient(e.into()))?;
        let status = response.status();
        if status.is_success() || (missing_ok && status == StatusCode::NOT_FOUND) {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(Failure::from_status(status, body))
    }

    /// Send now, or queue behind earlier writes.
    async fn write(&self, write: QueuedWrite, blob: Option<Arc<[u8]>>) -> Result<()> {
        if self.pending_writes() > 0 {
            self.outbox().push(write, blob)?;
            self.flush_pending().await?;
            return Ok(());
        }

        match self.send(&write, blob.clone()).await {
            Ok(()) => Ok(()),
            Err(Failure::Transient(e)) => {
                debug!(error = %e, "remote unreachable, queueing write");
                self.outbox().push(write, blob)
            }
            Err(Failure::Rejected(e)) => Err(e),
        }
    }

    async fn poll(&self, collection: Collection, cursor: Option<&str>) -> Result<ChangesPage> {
        let mut builder = self.request(reqwest::Method::GET, &self.changes_url(collection));
        if let Some(cursor) = cursor {
            builder = builder.query(&[("since", cursor)]);
        }
        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Remote(format!(
                "change feed for {collection} answered {status}: {body}"
            )));
        }
        response
            .json::<ChangesPage>()
            .await
            .map_err(|e| Error::Remote(format!("bad change feed response: {e}")))
    }

    fn to_batch(&self, changes: Vec<WireChange>) -> Vec<DocumentChange> {
        changes
            .into_iter()
            .map(|c| DocumentChange {
                has_pending_writes: c.origin.as_deref() == Some(self.inner.device_id.as_str()),
                kind: c.kind,
                key: c.key,
                data: c.data,
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct ChangesPage {
    #[serde(default)]
    changes: Vec<WireChange>,
    #[serde(default)]
    cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireChange {
    kind: ChangeKind,
    key: String,
    #[serde(default)]
    data: Document,
    #[serde(default)]
    origin: Option<String>,
}

impl RemoteStore for HttpRemote {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn set(&self, collection: Collection, key: &str, document: Document) -> Result<()> {
        self.write(
            QueuedWrite::Set {
                collection,
                key: key.to_string(),
                document,
            },
            None,
        )
        .await
    }

    async fn merge(&self, collection: Collection, key: &str, patch: Document) -> Result<()> {
        self.write(
            QueuedWrite::Merge {
                collection,
                key: key.to_string(),
                patch,
            },
            None,
        )
        .await
    }

    async fn delete(&self, collection: Collection, key: &str) -> Result<()> {
        self.write(
            QueuedWrite::Delete {
                collection,
                key: key.to_string(),
            },
            None,
        )
        .await
    }

    async fn subscribe(&self, collection: Collection) -> Result<ChangeFeed> {
        let (tx, rx) = mpsc::unbounded_channel();

        // Unreachable at startup: keep polling without a cursor, so the
        // first successful poll delivers the full snapshot.
        let mut cursor = match self.poll(collection, None).await {
            Ok(first) => {
                let snapshot = self.to_batch(first.changes);
                if !snapshot.is_empty() {
                    let _ = tx.send(snapshot);
                }
                first.cursor
            }
            Err(e) => {
                warn!(%collection, error = %e, "remote unreachable, change feed will keep polling");
                None
            }
        };

        let this = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.inner.poll_interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = tx.closed() => break,
                    _ = ticker.tick() => {}
                }
                match this.poll(collection, cursor.as_deref()).await {
                    Ok(page) => {
                        if page.cursor.is_some() {
                            cursor = page.cursor;
                        }
                        let batch = this.to_batch(page.changes);
                        if !batch.is_empty() && tx.send(batch).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(%collection, error = %e, "change feed poll failed"),
                }
            }
            debug!(%collection, "change feed closed");
        });

        Ok(rx)
    }

    async fn put_blob(&self, key: &str, data: Arc<[u8]>) -> Result<()> {
        self.write(
            QueuedWrite::PutBlob {
                key: key.to_string(),
            },
            Some(data),
        )
        .await
    }

    async fn get_blob(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let response = self
            .request(reqwest::Method::GET, &self.blob_url(key))
            .send()
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(response.bytes().await?.to_vec())),
            status => Err(Error::Remote(format!("blob {key}: server answered {status}"))),
        }
    }

    async fn delete_blob(&self, key: &str) -> Result<()> {
        self.write(
            QueuedWrite::DeleteBlob {
                key: key.to_string(),
            },
            None,
        )
        .await
    }

    async fn flush_pending(&self) -> Result<usize> {
        let _guard = self.inner.flush_lock.lock().await;
        let mut sent = 0;

        loop {
            let Some((entry, blob)) = self.outbox().front() else {
                break;
            };
            match self.send(&entry, blob).await {
                Ok(()) => {
                    self.outbox().pop()?;
                    sent += 1;
                }
                Err(Failure::Rejected(e)) => {
                    warn!(error = %e, "server rejected queued write, dropping it");
                    self.outbox().pop()?;
                }
                Err(Failure::Transient(e)) => {
                    debug!(error = %e, remaining = self.pending_writes(), "remote still unreachable");
                    break;
                }
            }
        }

        if sent > 0 {
            debug!(sent, "flushed queued remote writes");
        }
        Ok(sent)
    }

    fn pending_writes(&self) -> usize {
        self.outbox().entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Record, RecordKey, Ticket};
    use crate::storage::{LocalStore, SharedStore};
    use crate::sync::SyncBridge;
    use serde_json::json;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use tempfile::TempDir;

    // Nothing listens on port 1; connections are refused immediately.
    const UNREACHABLE: &str = "http://127.0.0.1:1";

    fn config(outbox_path: Option<PathBuf>) -> HttpRemoteConfig {
        HttpRemoteConfig {
            endpoint: format!("{UNREACHABLE}/"),
            project_id: "frontdesk".to_string(),
            api_key: Some("secret".to_string()),
            device_id: "device-a".to_string(),
            poll_interval: Duration::from_secs(5),
            outbox_path,
        }
    }

    fn doc(value: serde_json::Value) -> Document {
        match value {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    fn queued_on_disk(path: &Path) -> usize {
        read_jsonl::<QueuedWrite>(path).unwrap().len()
    }

    /// A port nothing listens on yet.
    fn free_port() -> u16 {
        TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    fn config_on(port: u16) -> HttpRemoteConfig {
        HttpRemoteConfig {
            endpoint: format!("http://127.0.0.1:{port}"),
            poll_interval: Duration::from_millis(50),
            ..config(None)
        }
    }

    /// Bare HTTP endpoint: ticket polls return one ticket written by
    /// `device-b`, every other collection is empty.
    fn serve_ticket_feed(listener: TcpListener) {
        let ticket = Ticket::new("Printer jam", "Acme", RecordKey::Id(1), 1_000)
            .to_document()
            .unwrap();
        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { continue };
                let mut reader = BufReader::new(stream.try_clone().unwrap());
                let mut request_line = String::new();
                reader.read_line(&mut request_line).unwrap();
                loop {
                    let mut header = String::new();
                    if reader.read_line(&mut header).unwrap() == 0 || header == "\r\n" {
                        break;
                    }
                }

                let body = if request_line.contains("/collections/tickets/changes") {
                    json!({
                        "changes": [
                            {"kind": "added", "key": "77", "data": ticket, "origin": "device-b"}
                        ],
                        "cursor": "1"
                    })
                } else {
                    json!({"changes": []})
                }
                .to_string();
                let _ = write!(
                    stream,
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
            }
        });
    }

    #[test]
    fn test_urls() {
        let remote = HttpRemote::new(config(None)).unwrap();
        assert_eq!(remote.base_url(), "http://127.0.0.1:1/v1/projects/frontdesk");
        assert_eq!(
            remote.document_url(Collection::CaseNotes, "7"),
            "http://127.0.0.1:1/v1/projects/frontdesk/collections/caseNotes/documents/7"
        );
        assert_eq!(
            remote.blob_url("abc"),
            "http://127.0.0.1:1/v1/projects/frontdesk/blobs/abc"
        );
    }

    #[test]
    fn test_wire_changes_from_this_device_are_pending() {
        let remote = HttpRemote::new(config(None)).unwrap();
        let page: ChangesPage = serde_json::from_value(json!({
            "changes": [
                {"kind": "added", "key": "1", "data": {"name": "a"}, "origin": "device-a"},
                {"kind": "removed", "key": "2", "origin": "device-b"}
            ],
            "cursor": "42"
        }))
        .unwrap();

        let batch = remote.to_batch(page.changes);
        assert!(batch[0].has_pending_writes);
        assert!(!batch[1].has_pending_writes);
        assert_eq!(batch[1].kind, ChangeKind::Removed);
        assert!(batch[1].data.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_writes_are_queued_in_order() {
        let remote = HttpRemote::new(config(None)).unwrap();

        remote
            .set(Collection::Tickets, "1", doc(json!({"status": "Open"})))
            .await
            .unwrap();
        remote
            .merge(Collection::Tickets, "1", doc(json!({"status": "Closed"})))
            .await
            .unwrap();
        assert_eq!(remote.pending_writes(), 2);

        let front = remote.outbox().front().unwrap().0;
        assert!(matches!(front, QueuedWrite::Set { .. }));

        assert_eq!(remote.flush_pending().await.unwrap(), 0);
        assert_eq!(remote.pending_writes(), 2);
    }

    #[tokio::test]
    async fn test_outbox_survives_restart() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("outbox.jsonl");

        let remote = HttpRemote::new(config(Some(path.clone()))).unwrap();
        remote
            .put_blob("k1", Arc::from(&b"audio"[..]))
            .await
            .unwrap();
        remote.delete(Collection::Calls, "3").await.unwrap();
        assert_eq!(queued_on_disk(&path), 2);
        drop(remote);

        let reopened = HttpRemote::new(config(Some(path))).unwrap();
        assert_eq!(reopened.pending_writes(), 2);
        let (entry, blob) = reopened.outbox().front().unwrap();
        assert_eq!(entry, QueuedWrite::PutBlob { key: "k1".into() });
        assert_eq!(&*blob.unwrap(), b"audio");
    }

    #[test]
    fn test_pop_rewrites_file_and_spool() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("outbox.jsonl");
        let mut outbox = Outbox::load(path.clone()).unwrap();

        outbox
            .push(
                QueuedWrite::PutBlob { key: "k1".into() },
                Some(Arc::from(&b"x"[..])),
            )
            .unwrap();
        outbox
            .push(QueuedWrite::DeleteBlob { key: "k1".into() }, None)
            .unwrap();
        assert!(blob_spool_dir(&path).join("k1").exists());

        outbox.pop().unwrap();
        assert!(!blob_spool_dir(&path).join("k1").exists());
        assert_eq!(queued_on_disk(&path), 1);
        assert!(outbox.blobs.is_empty());
    }

    #[tokio::test]
    async fn test_feed_starts_while_unreachable_and_recovers() {
        let port = free_port();
        let remote = HttpRemote::new(config_on(port)).unwrap();

        let mut feed = remote.subscribe(Collection::Tickets).await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(feed.try_recv().is_err());

        serve_ticket_feed(TcpListener::bind(("127.0.0.1", port)).unwrap());
        let batch = tokio::time::timeout(Duration::from_secs(5), feed.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(batch[0].key, "77");
        assert_eq!(batch[0].kind, ChangeKind::Added);
        assert!(!batch[0].has_pending_writes);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_bridge_started_offline_receives_changes_after_reconnect() {
        let port = free_port();
        let store: SharedStore = Arc::new(Mutex::new(LocalStore::open_memory().unwrap()));
        let remote = HttpRemote::new(config_on(port)).unwrap();
        let _bridge = SyncBridge::start(store.clone(), Some(remote));

        tokio::time::sleep(Duration::from_millis(300)).await;
        serve_ticket_feed(TcpListener::bind(("127.0.0.1", port)).unwrap());

        let key = RecordKey::Id(77);
        let mut received = None;
        for _ in 0..100 {
            received = store
                .lock()
                .unwrap()
                .get::<Ticket>(&key)
                .unwrap();
            if received.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        let ticket = received.expect("ticket from the other device");
        assert_eq!(ticket.description, "Printer jam");
        assert_eq!(ticket.client_name, "Acme");
    }

    #[test]
    fn test_failure_classification() {
        assert!(matches!(
            Failure::from_status(StatusCode::SERVICE_UNAVAILABLE, String::new()),
            Failure::Transient(_)
        ));
        assert!(matches!(
            Failure::from_status(StatusCode::TOO_MANY_REQUESTS, String::new()),
            Failure::Transient(_)
        ));
        assert!(matches!(
            Failure::from_status(StatusCode::FORBIDDEN, String::new()),
            Failure::Rejected(_)
        ));
    }
}
