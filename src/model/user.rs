//! User accounts.

use serde::{Deserialize, Serialize};

use super::{Collection, Record, RecordKey};

/// Access role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    #[default]
    Agent,
}

impl Role {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Agent => "agent",
        }
    }
}

/// A front-office user. Names are unique ignoring case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RecordKey>,
    pub name: String,
    /// Credential secret, compared verbatim.
    pub pin: String,
    #[serde(default)]
    pub role: Role,
}

impl User {
    #[must_use]
    pub fn new(name: &str, pin: &str, role: Role) -> Self {
        Self {
            id: None,
            name: name.trim().to_string(),
            pin: pin.to_string(),
            role,
        }
    }

    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
}

impl Record for User {
    const COLLECTION: Collection = Collection::Users;
    type Patch = UserPatch;

    fn key(&self) -> Option<&RecordKey> {
        self.id.as_ref()
    }

    fn set_key(&mut self, key: RecordKey) {
        self.id = Some(key);
    }
}
