//! Record identifiers and collection names.

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a record within its collection.
///
/// Keys assigned by the local store are numeric. Documents created elsewhere
/// may carry any string key; those that are not plain decimal numbers are
/// kept verbatim as `Opaque`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordKey {
    Id(i64),
    Opaque(String),
}

impl RecordKey {
    /// Key as used for the remote document path.
    #[must_use]
    pub fn to_doc_key(&self) -> String {
        match self {
            Self::Id(id) => id.to_string(),
            Self::Opaque(s) => s.clone(),
        }
    }

    /// Coerce a remote document key into a local key.
    ///
    /// A non-empty run of ASCII digits that fits in `i64` becomes `Id`;
    /// everything else is `Opaque`. Never fails.
    #[must_use]
    pub fn from_doc_key(key: &str) -> Self {
        if !key.is_empty() && key.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(id) = key.parse::<i64>() {
                return Self::Id(id);
            }
        }
        Self::Opaque(key.to_string())
    }

    /// The numeric id, if this key has one.
    #[must_use]
    pub const fn as_id(&self) -> Option<i64> {
        match self {
            Self::Id(id) => Some(*id),
            Self::Opaque(_) => None,
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Opaque(s) => f.write_str(s),
        }
    }
}

impl From<i64> for RecordKey {
    fn from(id: i64) -> Self {
        Self::Id(id)
    }
}

impl ToSql for RecordKey {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Self::Id(id) => ToSqlOutput::from(*id),
            Self::Opaque(s) => ToSqlOutput::from(s.as_str()),
        })
    }
}

impl FromSql for RecordKey {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value {
            ValueRef::Integer(id) => Ok(Self::Id(id)),
            ValueRef::Text(bytes) => std::str::from_utf8(bytes)
                .map(|s| Self::Opaque(s.to_string()))
                .map_err(|e| FromSqlError::Other(Box::new(e))),
            _ => Err(FromSqlError::InvalidType),
        }
    }
}

/// The five synced collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Collection {
    Users,
    Calls,
    Activities,
    Tickets,
    CaseNotes,
}

impl Collection {
    pub const ALL: [Self; 5] = [
        Self::Users,
        Self::Calls,
        Self::Activities,
        Self::Tickets,
        Self::CaseNotes,
    ];

    /// Wire name, also used as the local table name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Users => "users",
            Self::Calls => "calls",
            Self::Activities => "activities",
            Self::Tickets => "tickets",
            Self::CaseNotes => "caseNotes",
        }
    }

    /// Parse a wire name.
    #[must_use]
    pub fn from_wire(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == s)
    }

    /// Field holding the record's creation time (epoch ms), if any.
    #[must_use]
    pub const fn timestamp_field(&self) -> Option<&'static str> {
        match self {
            Self::Users => None,
            Self::Calls | Self::Activities | Self::CaseNotes => Some("timestamp"),
            Self::Tickets => Some("createdAt"),
        }
    }

    /// CLI subcommand that manages this collection.
    #[must_use]
    pub const fn command_name(&self) -> &'static str {
        match self {
            Self::Users => "user",
            Self::Calls => "call",
            Self::Activities => "task",
            Self::Tickets => "ticket",
            Self::CaseNotes => "note",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_doc_key_becomes_id() {
        assert_eq!(RecordKey::from_doc_key("42"), RecordKey::Id(42));
        assert_eq!(RecordKey::from_doc_key("007"), RecordKey::Id(7));
    }

    #[test]
    fn test_non_numeric_doc_key_stays_opaque() {
        assert_eq!(
            RecordKey::from_doc_key("client-abc"),
            RecordKey::Opaque("client-abc".into())
        );
        assert_eq!(RecordKey::from_doc_key(""), RecordKey::Opaque(String::new()));
        assert_eq!(RecordKey::from_doc_key("-5"), RecordKey::Opaque("-5".into()));
        assert_eq!(RecordKey::from_doc_key("4.2"), RecordKey::Opaque("4.2".into()));
        // Overflows i64
        let huge = "99999999999999999999";
        assert_eq!(RecordKey::from_doc_key(huge), RecordKey::Opaque(huge.into()));
    }

    #[test]
    fn test_doc_key_round_trip() {
        assert_eq!(RecordKey::Id(17).to_doc_key(), "17");
        let opaque = RecordKey::Opaque("xYz".into());
        assert_eq!(RecordKey::from_doc_key(&opaque.to_doc_key()), opaque);
    }

    #[test]
    fn test_key_serializes_untagged() {
        assert_eq!(serde_json::to_value(RecordKey::Id(3)).unwrap(), serde_json::json!(3));
        assert_eq!(
            serde_json::from_value::<RecordKey>(serde_json::json!("abc")).unwrap(),
            RecordKey::Opaque("abc".into())
        );
    }

    #[test]
    fn test_collection_wire_names() {
        assert_eq!(Collection::CaseNotes.as_str(), "caseNotes");
        assert_eq!(
            serde_json::to_value(Collection::CaseNotes).unwrap(),
            serde_json::json!("caseNotes")
        );
        assert_eq!(Collection::from_wire("tickets"), Some(Collection::Tickets));
        assert_eq!(Collection::from_wire("nope"), None);
    }
}
