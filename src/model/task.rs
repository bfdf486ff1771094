//! Follow-up tasks (stored in the `activities` collection).

use serde::{Deserialize, Serialize};

use super::{Collection, Record, RecordKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Pending,
    Completed,
}

impl TaskStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
        }
    }

    /// The other state.
    #[must_use]
    pub const fn toggled(self) -> Self {
        match self {
            Self::Pending => Self::Completed,
            Self::Completed => Self::Pending,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RecordKey>,
    pub title: String,
    #[serde(default)]
    pub status: TaskStatus,
    pub timestamp: i64,
    #[serde(default)]
    pub user_id: Option<RecordKey>,
}

impl Task {
    #[must_use]
    pub fn new(title: &str, user_id: RecordKey, timestamp: i64) -> Self {
        Self {
            id: None,
            title: title.trim().to_string(),
            status: TaskStatus::Pending,
            timestamp,
            user_id: Some(user_id),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
}

impl Record for Task {
    const COLLECTION: Collection = Collection::Activities;
    type Patch = TaskPatch;

    fn key(&self) -> Option<&RecordKey> {
        self.id.as_ref()
    }

    fn set_key(&mut self, key: RecordKey) {
        self.id = Some(key);
    }
}
