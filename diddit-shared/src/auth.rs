use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Role a user holds inside one household. A user has exactly one role per
/// membership; the same user may be `admin` in one household and `child` in another.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Parent,
    Child,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Parent => "parent",
            Role::Child => "child",
        }
    }

    /// Admins and parents may manage children, tasks, assignments and rewards.
    pub fn is_guardian(&self) -> bool {
        matches!(self, Role::Admin | Role::Parent)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown role: {0}")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "parent" => Ok(Role::Parent),
            "child" => Ok(Role::Child),
            other => Err(UnknownRole(other.to_string())),
        }
    }
}
