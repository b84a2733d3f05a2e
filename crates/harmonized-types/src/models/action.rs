//! Record actions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// What a record asks the receiving side to do.
///
/// Wire names are camelCase (`"save"`, `"deletePermanently"`). Anything else is
/// kept verbatim as [`Action::Other`] so channels can log and drop it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Action {
    /// Create or update
    Save,
    /// Soft delete: remote removes it, handle is kept with `deleted = true`
    Delete,
    /// Hard delete: every replica drops it
    DeletePermanently,
    /// Remote procedure call, never stored
    Function,
    /// Unrecognized action
    Other(String),
}

impl Action {
    /// Parse from wire name.
    pub fn from_string(s: &str) -> Self {
        match s {
            "save" => Self::Save,
            "delete" => Self::Delete,
            "deletePermanently" => Self::DeletePermanently,
            "function" => Self::Function,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Save => "save",
            Self::Delete => "delete",
            Self::DeletePermanently => "deletePermanently",
            Self::Function => "function",
            Self::Other(name) => name,
        }
    }

    /// `delete` or `deletePermanently`.
    pub fn is_delete(&self) -> bool {
        matches!(self, Self::Delete | Self::DeletePermanently)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for Action {
    fn from(s: String) -> Self {
        Self::from_string(&s)
    }
}

impl From<Action> for String {
    fn from(action: Action) -> Self {
        action.as_str().to_string()
    }
}
