//! User lookups for display.
//!
//! Records reference users by key and those users may have been deleted (or
//! not synced yet), so names fall back to placeholders instead of failing.

use std::collections::HashMap;

use crate::model::{RecordKey, User};

pub const UNKNOWN_USER: &str = "Unknown";
pub const UNASSIGNED: &str = "Unassigned";

#[derive(Debug, Clone, Default)]
pub struct UserDirectory {
    names: HashMap<RecordKey, String>,
}

impl UserDirectory {
    #[must_use]
    pub fn new(users: &[User]) -> Self {
        let names = users
            .iter()
            .filter_map(|u| u.id.clone().map(|id| (id, u.name.clone())))
            .collect();
        Self { names }
    }

    /// Name of a record's owner.
    #[must_use]
    pub fn owner_name(&self, id: Option<&RecordKey>) -> &str {
        id.and_then(|id| self.names.get(id))
            .map_or(UNKNOWN_USER, String::as_str)
    }

    /// Name of a ticket's assignee.
    #[must_use]
    pub fn assignee_name(&self, id: Option<&RecordKey>) -> &str {
        id.and_then(|id| self.names.get(id))
            .map_or(UNASSIGNED, String::as_str)
    }

    /// Key of the user with this name, ignoring case.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&RecordKey> {
        self.names
            .iter()
            .find(|(_, n)| n.eq_ignore_ascii_case(name.trim()))
            .map(|(id, _)| id)
    }
}
