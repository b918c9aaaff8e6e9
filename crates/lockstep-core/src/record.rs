use std::fmt;

use serde::Serialize;

use crate::invocation::ToolOutput;

pub const NO_CHANGE: &str = "N/A";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Committed(String),
    Unchanged,
}

impl Outcome {
    pub fn commit_id(&self) -> Option<&str> {
        match self {
            Self::Committed(id) => Some(id),
            Self::Unchanged => None,
        }
    }

    pub fn is_unchanged(&self) -> bool {
        matches!(self, Self::Unchanged)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Committed(id) => f.write_str(id),
            Self::Unchanged => f.write_str(NO_CHANGE),
        }
    }
}

/// Audit entry for one lifecycle action. "Committed" means the working tree was dirty after
/// the command ran, not that the command alone caused every change in that commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationRecord {
    pub project: String,
    pub command: String,
    pub output: ToolOutput,
    pub outcome: Outcome,
}

impl OperationRecord {
    pub fn audit_line(&self) -> String {
        format!("{}, {}, {}", self.project, self.command, self.outcome)
    }
}
