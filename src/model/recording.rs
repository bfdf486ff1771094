//! Recorded calls.
//!
//! The audio itself lives in the blob store; a recording only carries the
//! content hash of its payload in `audioRef`.

use serde::{Deserialize, Serialize};

use super::{Collection, Record, RecordKey, date_label};

/// Client name used when none is given.
pub const ANONYMOUS_CLIENT: &str = "Anonymous Client";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recording {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RecordKey>,
    pub client_name: String,
    /// Length in seconds.
    #[serde(default)]
    pub duration: i64,
    /// Epoch milliseconds.
    pub timestamp: i64,
    #[serde(default)]
    pub date_string: String,
    #[serde(default)]
    pub user_id: Option<RecordKey>,
    #[serde(default)]
    pub audio_ref: Option<String>,
}

impl Recording {
    /// A new recording made at `timestamp` by `user_id`.
    ///
    /// A blank client name falls back to [`ANONYMOUS_CLIENT`].
    #[must_use]
    pub fn new(client_name: &str, duration: i64, user_id: RecordKey, timestamp: i64) -> Self {
        let client_name = client_name.trim();
        Self {
            id: None,
            client_name: if client_name.is_empty() {
                ANONYMOUS_CLIENT.to_string()
            } else {
                client_name.to_string()
            },
            duration,
            timestamp,
            date_string: date_label(timestamp),
            user_id: Some(user_id),
            audio_ref: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_string: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,
}

impl Record for Recording {
    const COLLECTION: Collection = Collection::Calls;
    type Patch = RecordingPatch;

    fn key(&self) -> Option<&RecordKey> {
        self.id.as_ref()
    }

    fn set_key(&mut self, key: RecordKey) {
        self.id = Some(key);
    }
}

/// Format a duration in seconds as `mm:ss`.
#[must_use]
pub fn format_duration(seconds: i64) -> String {
    let seconds = seconds.max(0);
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_client_is_anonymous() {
        let rec = Recording::new("  ", 30, RecordKey::Id(1), 0);
        assert_eq!(rec.client_name, ANONYMOUS_CLIENT);
        assert_eq!(rec.date_string, "1970-01-01");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0), "00:00");
        assert_eq!(format_duration(75), "01:15");
        assert_eq!(format_duration(3600), "60:00");
    }
}
