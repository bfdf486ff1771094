//! Support tickets and the client kanban board.

use serde::{Deserialize, Serialize};

use super::{Collection, Record, RecordKey, date_label};

/// Board column for tickets without a client.
pub const UNASSIGNED_COLUMN: &str = "Unassigned";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TicketStatus {
    #[default]
    Open,
    Closed,
}

impl TicketStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "Open",
            Self::Closed => "Closed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::High => "High",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RecordKey>,
    pub description: String,
    #[serde(default)]
    pub status: TicketStatus,
    #[serde(default)]
    pub priority: Priority,
    /// Epoch milliseconds.
    pub created_at: i64,
    #[serde(default)]
    pub date_string: String,
    #[serde(default)]
    pub client_name: String,
    #[serde(default)]
    pub user_id: Option<RecordKey>,
    #[serde(default)]
    pub assignee_id: Option<RecordKey>,
    /// Recording this ticket was raised from.
    #[serde(default)]
    pub call_id: Option<RecordKey>,
    /// Copied from the recording, in seconds.
    #[serde(default)]
    pub duration: Option<i64>,
}

impl Ticket {
    /// A new open ticket. The description is bullet-formatted.
    #[must_use]
    pub fn new(description: &str, client_name: &str, user_id: RecordKey, created_at: i64) -> Self {
        Self {
            id: None,
            description: format_description(description),
            status: TicketStatus::Open,
            priority: Priority::Medium,
            created_at,
            date_string: date_label(created_at),
            client_name: client_name.trim().to_string(),
            user_id: Some(user_id),
            assignee_id: None,
            call_id: None,
            duration: None,
        }
    }

    /// Kanban column this ticket sits in.
    #[must_use]
    pub fn column(&self) -> &str {
        if self.client_name.is_empty() {
            UNASSIGNED_COLUMN
        } else {
            &self.client_name
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TicketStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_string: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
    /// `Some(None)` clears the assignee.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee_id: Option<Option<RecordKey>>,
}

impl Record for Ticket {
    const COLLECTION: Collection = Collection::Tickets;
    type Patch = TicketPatch;

    fn key(&self) -> Option<&RecordKey> {
        self.id.as_ref()
    }

    fn set_key(&mut self, key: RecordKey) {
        self.id = Some(key);
    }
}

/// Normalize free text into a bullet list.
///
/// Lines are trimmed, blank lines dropped, and each line not already
/// starting with `•` gets a `• ` prefix.
#[must_use]
pub fn format_description(raw: &str) -> String {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            if line.starts_with('•') {
                line.to_string()
            } else {
                format!("• {line}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Client name to store when a ticket is dropped on `column`.
#[must_use]
pub fn client_for_column(column: &str) -> String {
    if column == UNASSIGNED_COLUMN {
        String::new()
    } else {
        column.trim().to_string()
    }
}

/// Group tickets into board columns by client.
///
/// The `Unassigned` column always comes first (even when empty), the rest
/// follow alphabetically. Ticket order within a column is preserved.
#[must_use]
pub fn kanban_columns(tickets: Vec<Ticket>) -> Vec<(String, Vec<Ticket>)> {
    let mut columns: std::collections::BTreeMap<String, Vec<Ticket>> =
        std::collections::BTreeMap::new();
    let mut unassigned = Vec::new();

    for ticket in tickets {
        if ticket.client_name.is_empty() {
            unassigned.push(ticket);
        } else {
            columns.entry(ticket.client_name.clone()).or_default().push(ticket);
        }
    }

    let mut board = Vec::with_capacity(columns.len() + 1);
    board.push((UNASSIGNED_COLUMN.to_string(), unassigned));
    board.extend(columns);
    board
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_description_bullets() {
        let raw = "  first \n\n• second\nthird  ";
        assert_eq!(format_description(raw), "• first\n• second\n• third");
        assert_eq!(format_description("   \n "), "");
    }

    #[test]
    fn test_kanban_unassigned_first() {
        let mk = |client: &str| Ticket::new("x", client, RecordKey::Id(1), 0);
        let board = kanban_columns(vec![mk("Zeta"), mk(""), mk("Acme"), mk("Zeta")]);
        let names: Vec<_> = board.iter().map(|(c, _)| c.as_str()).collect();
        assert_eq!(names, ["Unassigned", "Acme", "Zeta"]);
        assert_eq!(board[2].1.len(), 2);
    }

    #[test]
    fn test_kanban_empty_board_has_unassigned() {
        let board = kanban_columns(Vec::new());
        assert_eq!(board.len(), 1);
        assert_eq!(board[0].0, UNASSIGNED_COLUMN);
    }

    #[test]
    fn test_client_for_column() {
        assert_eq!(client_for_column("Unassigned"), "");
        assert_eq!(client_for_column("Acme "), "Acme");
    }

    #[test]
    fn test_status_wire_names() {
        assert_eq!(serde_json::to_value(TicketStatus::Open).unwrap(), "Open");
        assert_eq!(serde_json::to_value(Priority::High).unwrap(), "High");
    }
}
