use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Review state of a task completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionStatus {
    Pending,
    Approved,
    Rejected,
}

impl CompletionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompletionStatus::Pending => "pending",
            CompletionStatus::Approved => "approved",
            CompletionStatus::Rejected => "rejected",
        }
    }

    /// Pending and approved completions block another completion of the same assignment.
    pub fn is_open(&self) -> bool {
        !matches!(self, CompletionStatus::Rejected)
    }
}

impl fmt::Display for CompletionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown completion status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for CompletionStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(CompletionStatus::Pending),
            "approved" => Ok(CompletionStatus::Approved),
            "rejected" => Ok(CompletionStatus::Rejected),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// Normalizes an email address for storage and lookup.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
