//! Command implementations.

pub mod call;
pub mod cleanup;
pub mod completions;
pub mod dashboard;
pub mod init;
pub mod note;
pub mod sync;
pub mod task;
pub mod ticket;
pub mod user;
pub mod version;

use crate::error::Result;
use crate::model::RecordKey;
use serde::Serialize;

/// Print one compact JSON document on stdout.
pub(crate) fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

/// Display form of an optional key (empty when unsaved).
pub(crate) fn key_str(key: Option<&RecordKey>) -> String {
    key.map(RecordKey::to_doc_key).unwrap_or_default()
}

/// Cut `s` to `max` characters, marking the cut with `...`.
pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{head}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a longer line of text", 10), "a longe...");
    }

    #[test]
    fn test_key_str() {
        assert_eq!(key_str(Some(&RecordKey::Id(7))), "7");
        assert_eq!(key_str(None), "");
    }
}
