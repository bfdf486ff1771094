//! Input validation for the command line.
//!
//! Statuses, priorities, and roles resolve in three tiers: exact match
//! (case-insensitive), then synonym lookup, then an error carrying the
//! closest valid spelling.

use std::collections::HashMap;
use std::sync::LazyLock;

use crate::error::{Error, Result};
use crate::model::{Priority, RecordKey, Role, TaskStatus, TicketStatus};

// ── Synonym maps ─────────────────────────────────────────────

static TASK_STATUS_SYNONYMS: LazyLock<HashMap<&str, TaskStatus>> = LazyLock::new(|| {
    [
        ("done", TaskStatus::Completed),
        ("complete", TaskStatus::Completed),
        ("finished", TaskStatus::Completed),
        ("closed", TaskStatus::Completed),
        ("todo", TaskStatus::Pending),
        ("open", TaskStatus::Pending),
        ("new", TaskStatus::Pending),
    ]
    .into_iter()
    .collect()
});

static TICKET_STATUS_SYNONYMS: LazyLock<HashMap<&str, TicketStatus>> = LazyLock::new(|| {
    [
        ("done", TicketStatus::Closed),
        ("resolved", TicketStatus::Closed),
        ("completed", TicketStatus::Closed),
        ("fixed", TicketStatus::Closed),
        ("todo", TicketStatus::Open),
        ("new", TicketStatus::Open),
        ("reopen", TicketStatus::Open),
        ("pending", TicketStatus::Open),
    ]
    .into_iter()
    .collect()
});

static PRIORITY_SYNONYMS: LazyLock<HashMap<&str, Priority>> = LazyLock::new(|| {
    [
        ("urgent", Priority::High),
        ("critical", Priority::High),
        ("important", Priority::High),
        ("normal", Priority::Medium),
        ("default", Priority::Medium),
        ("med", Priority::Medium),
        ("minor", Priority::Low),
        ("trivial", Priority::Low),
    ]
    .into_iter()
    .collect()
});

fn resolve<T: Copy>(
    what: &str,
    input: &str,
    valid: &[(&str, T)],
    synonyms: &HashMap<&str, T>,
) -> Result<T> {
    let lower = input.trim().to_lowercase();

    if let Some((_, value)) = valid.iter().find(|(name, _)| name.eq_ignore_ascii_case(&lower)) {
        return Ok(*value);
    }
    if let Some(value) = synonyms.get(lower.as_str()) {
        return Ok(*value);
    }

    let names: Vec<&str> = valid
        .iter()
        .map(|(name, _)| *name)
        .chain(synonyms.keys().copied())
        .collect();
    let message = match closest(&lower, &names) {
        Some(suggestion) => format!("unknown {what} '{input}', did you mean '{suggestion}'?"),
        None => format!("unknown {what} '{input}'"),
    };
    Err(Error::InvalidArgument(message))
}

/// Parse a task status (`pending` / `completed`).
///
/// # Errors
///
/// Returns `InvalidArgument` with a suggestion for unknown input.
pub fn parse_task_status(input: &str) -> Result<TaskStatus> {
    resolve(
        "status",
        input,
        &[
            (TaskStatus::Pending.as_str(), TaskStatus::Pending),
            (TaskStatus::Completed.as_str(), TaskStatus::Completed),
        ],
        &TASK_STATUS_SYNONYMS,
    )
}

/// Parse a ticket status (`Open` / `Closed`).
///
/// # Errors
///
/// Returns `InvalidArgument` with a suggestion for unknown input.
pub fn parse_ticket_status(input: &str) -> Result<TicketStatus> {
    resolve(
        "status",
        input,
        &[
            (TicketStatus::Open.as_str(), TicketStatus::Open),
            (TicketStatus::Closed.as_str(), TicketStatus::Closed),
        ],
        &TICKET_STATUS_SYNONYMS,
    )
}

/// Parse a ticket priority.
///
/// # Errors
///
/// Returns `InvalidArgument` with a suggestion for unknown input.
pub fn parse_priority(input: &str) -> Result<Priority> {
    resolve(
        "priority",
        input,
        &[
            (Priority::Low.as_str(), Priority::Low),
            (Priority::Medium.as_str(), Priority::Medium),
            (Priority::High.as_str(), Priority::High),
        ],
        &PRIORITY_SYNONYMS,
    )
}

/// Parse a user role.
///
/// # Errors
///
/// Returns `InvalidArgument` for anything but `admin` / `agent`.
pub fn parse_role(input: &str) -> Result<Role> {
    resolve(
        "role",
        input,
        &[
            (Role::Admin.as_str(), Role::Admin),
            (Role::Agent.as_str(), Role::Agent),
        ],
        &HashMap::new(),
    )
}

/// Parse a record ID typed on the command line.
///
/// # Errors
///
/// Returns `InvalidArgument` for blank input.
pub fn parse_key(input: &str) -> Result<RecordKey> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidArgument("record ID cannot be empty".into()));
    }
    Ok(RecordKey::from_doc_key(trimmed))
}

/// Closest candidate within edit distance 3.
fn closest<'a>(input: &str, candidates: &[&'a str]) -> Option<&'a str> {
    candidates
        .iter()
        .map(|c| (levenshtein_distance(input, &c.to_lowercase()), *c))
        .filter(|(dist, _)| *dist <= 3)
        .min_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1)))
        .map(|(_, c)| c)
}

// ── Levenshtein distance ─────────────────────────────────────

/// Compute the Levenshtein edit distance between two strings.
#[must_use]
pub fn levenshtein_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for i in 1..=a.len() {
        curr[0] = i;
        for j in 1..=b.len() {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// Names similar to `searched`, closest first, at most `max`.
#[must_use]
pub fn find_similar_names(searched: &str, existing: &[String], max: usize) -> Vec<String> {
    let searched = searched.to_lowercase();
    let mut candidates: Vec<(usize, &str)> = existing
        .iter()
        .map(|name| (levenshtein_distance(&searched, &name.to_lowercase()), name.as_str()))
        .filter(|(dist, _)| *dist <= 3)
        .collect();

    candidates.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1)));
    candidates
        .into_iter()
        .take(max)
        .map(|(_, name)| name.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_status() {
        assert_eq!(parse_task_status("pending").unwrap(), TaskStatus::Pending);
        assert_eq!(parse_task_status("Completed").unwrap(), TaskStatus::Completed);
        assert_eq!(parse_task_status("done").unwrap(), TaskStatus::Completed);
        assert_eq!(parse_task_status("todo").unwrap(), TaskStatus::Pending);
    }

    #[test]
    fn test_ticket_status() {
        assert_eq!(parse_ticket_status("open").unwrap(), TicketStatus::Open);
        assert_eq!(parse_ticket_status("CLOSED").unwrap(), TicketStatus::Closed);
        assert_eq!(parse_ticket_status("resolved").unwrap(), TicketStatus::Closed);
    }

    #[test]
    fn test_unknown_status_suggests() {
        let err = parse_ticket_status("closd").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("status"));
        assert!(msg.contains("Closed"));
        assert!(err.hint().is_some());
    }

    #[test]
    fn test_priority() {
        assert_eq!(parse_priority("high").unwrap(), Priority::High);
        assert_eq!(parse_priority("urgent").unwrap(), Priority::High);
        assert_eq!(parse_priority("Low").unwrap(), Priority::Low);
        assert!(parse_priority("whenever").is_err());
    }

    #[test]
    fn test_role() {
        assert_eq!(parse_role("Admin").unwrap(), Role::Admin);
        assert_eq!(parse_role("agent").unwrap(), Role::Agent);
        assert!(parse_role("boss").is_err());
    }

    #[test]
    fn test_parse_key() {
        assert_eq!(parse_key(" 42 ").unwrap(), RecordKey::Id(42));
        assert_eq!(
            parse_key("client-abc").unwrap(),
            RecordKey::Opaque("client-abc".into())
        );
        assert!(parse_key("  ").is_err());
    }

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein_distance("", ""), 0);
        assert_eq!(levenshtein_distance("abc", "abd"), 1);
        assert_eq!(levenshtein_distance("kitten", "sitting"), 3);
    }

    #[test]
    fn test_find_similar_names() {
        let names = vec!["Ravish".to_string(), "Mina".to_string(), "Ravi".to_string()];
        let result = find_similar_names("ravsh", &names, 2);
        assert_eq!(result[0], "Ravish");
    }
}
