//! End-of-run reporting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::context::RowStatus;

/// How the run ended. Failures surface as errors from
/// [`ExecutionEngine::run`](crate::engine::ExecutionEngine::run), not here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    Stopped,
}

/// Final record for one visited data row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowReport {
    pub row_index: usize,
    pub status: RowStatus,
    /// First error encountered in the row, if any.
    pub first_error: Option<String>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub outcome: RunOutcome,
    /// Visited rows in visit order. Empty for standalone runs.
    pub rows: Vec<RowReport>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    pub fn completed_rows(&self) -> usize {
        self.count(RowStatus::Complete)
    }

    pub fn failed_rows(&self) -> usize {
        self.count(RowStatus::Failed)
    }

    pub fn skipped_rows(&self) -> usize {
        self.count(RowStatus::Skipped)
    }

    fn count(&self, status: RowStatus) -> usize {
        self.rows.iter().filter(|r| r.status == status).count()
    }
}
