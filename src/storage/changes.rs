//! Committed change notifications.
//!
//! Every mutation collects the changes it makes and, once the transaction
//! has committed, hands them to each registered [`ChangeObserver`]. The sync
//! bridge is the main observer; it forwards local changes to the remote.

use std::sync::Arc;

use serde::Serialize;

use crate::model::{Collection, Document, RecordKey};

/// Where a mutation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// A user action on this device.
    Local,
    /// Applied from the remote change feed.
    Remote,
}

/// One committed change to the local store.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Change {
    Created {
        collection: Collection,
        key: RecordKey,
        document: Document,
    },
    /// Only the fields that changed.
    Updated {
        collection: Collection,
        key: RecordKey,
        patch: Document,
    },
    Deleted {
        collection: Collection,
        key: RecordKey,
    },
    /// An audio payload was stored. Always precedes the recording that
    /// references it within the same change set.
    BlobStored {
        key: String,
        #[serde(skip)]
        data: Arc<[u8]>,
    },
    BlobDeleted {
        key: String,
    },
}

impl Change {
    /// Collection touched, `None` for blob changes.
    #[must_use]
    pub const fn collection(&self) -> Option<Collection> {
        match self {
            Self::Created { collection, .. }
            | Self::Updated { collection, .. }
            | Self::Deleted { collection, .. } => Some(*collection),
            Self::BlobStored { .. } | Self::BlobDeleted { .. } => None,
        }
    }
}

/// All changes committed by one mutation.
#[derive(Debug, Clone)]
pub struct ChangeSet {
    /// Operation name, for logs.
    pub op: String,
    pub origin: Origin,
    pub changes: Vec<Change>,
}

/// Hook called after each committed mutation.
///
/// Called synchronously while the store is borrowed, so implementations
/// must not block or call back into the store.
pub trait ChangeObserver: Send + Sync {
    fn on_commit(&self, changes: &ChangeSet);
}
