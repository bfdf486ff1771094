//! Data models for Deskline.
//!
//! One typed record per synced collection:
//! - User (`users`)
//! - Recording (`calls`)
//! - Task (`activities`)
//! - Ticket (`tickets`)
//! - CaseNote (`caseNotes`)
//!
//! Field names on the wire and in the local tables are camelCase.

pub mod case_note;
pub mod key;
pub mod recording;
pub mod task;
pub mod ticket;
pub mod user;

pub use case_note::{CaseNote, CaseNotePatch};
pub use key::{Collection, RecordKey};
pub use recording::{Recording, RecordingPatch};
pub use task::{Task, TaskPatch, TaskStatus};
pub use ticket::{Priority, Ticket, TicketPatch, TicketStatus};
pub use user::{Role, User, UserPatch};

use crate::error::{Error, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// A record body as exchanged with the remote store: a JSON object without `id`.
pub type Document = serde_json::Map<String, Value>;

/// A typed record belonging to one collection.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + 'static {
    /// Collection the record lives in.
    const COLLECTION: Collection;

    /// Partial update: every field optional, absent fields not serialized.
    type Patch: Serialize + Default;

    fn key(&self) -> Option<&RecordKey>;

    fn set_key(&mut self, key: RecordKey);

    /// Serialize to a remote document (drops `id`).
    ///
    /// # Errors
    ///
    /// Returns an error if the record does not serialize to a JSON object.
    fn to_document(&self) -> Result<Document> {
        match serde_json::to_value(self)? {
            Value::Object(mut map) => {
                map.remove("id");
                Ok(map)
            }
            other => Err(Error::Other(format!(
                "{} record serialized to non-object: {other}",
                Self::COLLECTION
            ))),
        }
    }

    /// Decode a remote document under the given key.
    ///
    /// # Errors
    ///
    /// Returns `InvalidDocument` if required fields are missing or mistyped.
    fn from_document(key: RecordKey, mut doc: Document) -> Result<Self> {
        let key_str = key.to_string();
        doc.insert("id".to_string(), serde_json::to_value(&key)?);
        serde_json::from_value(Value::Object(doc)).map_err(|e| Error::InvalidDocument {
            collection: Self::COLLECTION,
            key: key_str,
            message: e.to_string(),
        })
    }
}

/// Serialize a patch into the set of fields it changes.
///
/// # Errors
///
/// Returns an error if the patch does not serialize to a JSON object.
pub fn patch_document<P: Serialize>(patch: &P) -> Result<Document> {
    match serde_json::to_value(patch)? {
        Value::Object(map) => Ok(map),
        other => Err(Error::Other(format!("patch serialized to non-object: {other}"))),
    }
}

/// Decode a document as the collection's record type and re-encode it.
///
/// Drops unknown fields and fills serde defaults, so whatever reaches the
/// local tables has the typed record's shape.
///
/// # Errors
///
/// Returns `InvalidDocument` if the document does not decode.
pub fn normalize_document(collection: Collection, key: &RecordKey, doc: Document) -> Result<Document> {
    fn round_trip<T: Record>(key: &RecordKey, doc: Document) -> Result<Document> {
        T::from_document(key.clone(), doc)?.to_document()
    }

    match collection {
        Collection::Users => round_trip::<User>(key, doc),
        Collection::Calls => round_trip::<Recording>(key, doc),
        Collection::Activities => round_trip::<Task>(key, doc),
        Collection::Tickets => round_trip::<Ticket>(key, doc),
        Collection::CaseNotes => round_trip::<CaseNote>(key, doc),
    }
}

/// Current time in epoch milliseconds.
#[must_use]
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// `YYYY-MM-DD` (UTC) label for an epoch-ms timestamp.
#[must_use]
pub fn date_label(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms)
        .unwrap_or_default()
        .format("%Y-%m-%d")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_document_drops_id() {
        let mut task = Task::new("Call back", RecordKey::Id(1), 1_000);
        task.set_key(RecordKey::Id(9));
        let doc = task.to_document().unwrap();
        assert!(!doc.contains_key("id"));
        assert_eq!(doc["title"], json!("Call back"));
        assert_eq!(doc["status"], json!("pending"));
    }

    #[test]
    fn test_from_document_attaches_key() {
        let doc = json!({"title": "x", "status": "completed", "timestamp": 5, "userId": 2});
        let Value::Object(doc) = doc else { unreachable!() };
        let task = Task::from_document(RecordKey::Opaque("abc".into()), doc).unwrap();
        assert_eq!(task.key(), Some(&RecordKey::Opaque("abc".into())));
        assert_eq!(task.status, TaskStatus::Completed);
    }

    #[test]
    fn test_undecodable_document_is_invalid() {
        let Value::Object(doc) = json!({"title": 12}) else { unreachable!() };
        let err = normalize_document(Collection::Activities, &RecordKey::Id(1), doc).unwrap_err();
        assert!(matches!(err, Error::InvalidDocument { collection: Collection::Activities, .. }));
    }

    #[test]
    fn test_normalize_drops_unknown_fields() {
        let Value::Object(doc) = json!({
            "name": "ana", "pin": "1234", "role": "agent", "avatar": "x.png"
        }) else {
            unreachable!()
        };
        let doc = normalize_document(Collection::Users, &RecordKey::Id(2), doc).unwrap();
        assert!(!doc.contains_key("avatar"));
        assert_eq!(doc["name"], json!("ana"));
    }

    #[test]
    fn test_date_label() {
        // 2024-03-05T12:00:00Z
        assert_eq!(date_label(1_709_640_000_000), "2024-03-05");
    }
}
