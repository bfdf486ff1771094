//! Remote document store.
//!
//! Defines the interface the sync bridge talks to, plus two clients:
//!
//! - [`MemoryRemote`] - in-process document server shared by several devices
//! - [`HttpRemote`] - REST document endpoint with a polling change feed
//!
//! [`Remote`] dispatches between them at runtime; [`create_remote`] picks one
//! from configuration.

pub mod factory;
pub mod http;
pub mod memory;

pub use factory::create_remote;
pub use http::HttpRemote;
pub use memory::{MemoryRemote, MemoryServer, RemoteOp};

use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::Result;
use crate::model::{Collection, Document};

/// What happened to a remote document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

/// One entry of a change feed batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentChange {
    pub kind: ChangeKind,
    /// Remote document key (always a string).
    pub key: String,
    /// Document body; empty for removals.
    #[serde(default)]
    pub data: Document,
    /// True when the change reflects this client's own not-yet-acknowledged
    /// write rather than the server's state.
    #[serde(default)]
    pub has_pending_writes: bool,
}

/// Live feed of change batches for one collection.
pub type ChangeFeed = mpsc::UnboundedReceiver<Vec<DocumentChange>>;

/// Interface to a remote document store.
///
/// Writes are fire-and-forget from the caller's point of view: a client that
/// cannot reach the server queues the write and retries it itself.
pub trait RemoteStore: Send + Sync + 'static {
    /// Short client name for logs.
    fn name(&self) -> &'static str;

    /// Create or replace a document.
    fn set(
        &self,
        collection: Collection,
        key: &str,
        document: Document,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Merge fields into a document, creating it if missing.
    fn merge(
        &self,
        collection: Collection,
        key: &str,
        patch: Document,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Delete a document. Deleting a missing document is not an error.
    fn delete(&self, collection: Collection, key: &str) -> impl Future<Output = Result<()>> + Send;

    /// Subscribe to a collection's changes.
    ///
    /// The first batch is a snapshot of the existing documents as `Added`.
    fn subscribe(&self, collection: Collection) -> impl Future<Output = Result<ChangeFeed>> + Send;

    /// Upload an audio payload under its content key.
    fn put_blob(&self, key: &str, data: Arc<[u8]>) -> impl Future<Output = Result<()>> + Send;

    /// Download an audio payload.
    fn get_blob(&self, key: &str) -> impl Future<Output = Result<Option<Vec<u8>>>> + Send;

    fn delete_blob(&self, key: &str) -> impl Future<Output = Result<()>> + Send;

    /// Retry queued writes. Returns how many went through.
    ///
    /// Default implementation has nothing queued.
    fn flush_pending(&self) -> impl Future<Output = Result<usize>> + Send {
        async { Ok(0) }
    }

    /// Writes waiting for the server.
    fn pending_writes(&self) -> usize {
        0
    }
}

/// Runtime choice of remote client.
#[derive(Debug, Clone)]
pub enum Remote {
    Memory(MemoryRemote),
    Http(HttpRemote),
}

impl RemoteStore for Remote {
    fn name(&self) -> &'static str {
        match self {
            Self::Memory(r) => r.name(),
            Self::Http(r) => r.name(),
        }
    }

    async fn set(&self, collection: Collection, key: &str, document: Document) -> Result<()> {
        match self {
            Self::Memory(r) => r.set(collection, key, document).await,
            Self::Http(r) => r.set(collection, key, document).await,
        }
    }

    async fn merge(&self, collection: Collection, key: &str, patch: Document) -> Result<()> {
        match self {
            Self::Memory(r) => r.merge(collection, key, patch).await,
            Self::Http(r) => r.merge(collection, key, patch).await,
        }
    }

    async fn delete(&self, collection: Collection, key: &str) -> Result<()> {
        match self {
            Self::Memory(r) => r.delete(collection, key).await,
            Self::Http(r) => r.delete(collection, key).await,
        }
    }

    async fn subscribe(&self, collection: Collection) -> Result<ChangeFeed> {
        match self {
            Self::Memory(r) => r.subscribe(collection).await,
            Self::Http(r) => r.subscribe(collection).await,
        }
    }

    async fn put_blob(&self, key: &str, data: Arc<[u8]>) -> Result<()> {
        match self {
            Self::Memory(r) => r.put_blob(key, data).await,
            Self::Http(r) => r.put_blob(key, data).await,
        }
    }

    async fn get_blob(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match self {
            Self::Memory(r) => r.get_blob(key).await,
            Self::Http(r) => r.get_blob(key).await,
        }
    }

    async fn delete_blob(&self, key: &str) -> Result<()> {
        match self {
            Self::Memory(r) => r.delete_blob(key).await,
            Self::Http(r) => r.delete_blob(key).await,
        }
    }

    async fn flush_pending(&self) -> Result<usize> {
        match self {
            Self::Memory(r) => r.flush_pending().await,
            Self::Http(r) => r.flush_pending().await,
        }
    }

    fn pending_writes(&self) -> usize {
        match self {
            Self::Memory(r) => r.pending_writes(),
            Self::Http(r) => r.pending_writes(),
        }
    }
}
