//! Client case notes.

use serde::{Deserialize, Serialize};

use super::{Collection, Record, RecordKey};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseNote {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RecordKey>,
    pub date_string: String,
    #[serde(default)]
    pub case_type: String,
    pub client_name: String,
    pub notes: String,
    #[serde(default)]
    pub user_id: Option<RecordKey>,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseNotePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_string: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub case_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl CaseNote {
    /// Whether `term` (already lowercased) matches client, notes, or case type.
    #[must_use]
    pub fn matches(&self, term: &str) -> bool {
        self.client_name.to_lowercase().contains(term)
            || self.notes.to_lowercase().contains(term)
            || self.case_type.to_lowercase().contains(term)
    }
}

impl Record for CaseNote {
    const COLLECTION: Collection = Collection::CaseNotes;
    type Patch = CaseNotePatch;

    fn key(&self) -> Option<&RecordKey> {
        self.id.as_ref()
    }

    fn set_key(&mut self, key: RecordKey) {
        self.id = Some(key);
    }
}
