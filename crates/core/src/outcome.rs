//! Per-line outcomes for partial-success batch operations.

use serde::{Deserialize, Serialize};

/// What happened to one line of a batch.
///
/// Batches that follow skip-and-report semantics (item decisions, supply runs)
/// return one of these per line instead of failing the whole batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LineOutcome<R> {
    Applied,
    Skipped { reason: R },
    Failed { reason: R },
}

impl<R> LineOutcome<R> {
    pub fn skipped(reason: R) -> Self {
        Self::Skipped { reason }
    }

    pub fn failed(reason: R) -> Self {
        Self::Failed { reason }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }

    pub fn reason(&self) -> Option<&R> {
        match self {
            Self::Applied => None,
            Self::Skipped { reason } | Self::Failed { reason } => Some(reason),
        }
    }
}
