use std::fmt;
use std::time::Duration;

use crate::error::MigratorError;
use crate::migrate::run_options::ExecutionMode;

/// Outcome of one execution unit; `index` is its 0-based position in the artifact.
#[derive(Debug)]
pub struct StatementResult {
    pub index: usize,
    pub sql: String,
    pub outcome: Result<(), MigratorError>,
    pub elapsed: Duration,
}

impl StatementResult {
    pub fn succeeded(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn error_message(&self) -> Option<String> {
        self.outcome.as_ref().err().map(|err| err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Applied,
    PartiallyApplied,
    Failed,
    Aborted,
    Skipped,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RunStatus::Applied => write!(f, "applied"),
            RunStatus::PartiallyApplied => write!(f, "partially applied"),
            RunStatus::Failed => write!(f, "failed"),
            RunStatus::Aborted => write!(f, "aborted"),
            RunStatus::Skipped => write!(f, "skipped (already applied)"),
        }
    }
}

#[derive(Debug)]
pub struct RunReport {
    pub artifact_id: String,
    pub mode: ExecutionMode,
    pub results: Vec<StatementResult>,
    aborted: bool,
    skipped: bool,
}

impl RunReport {
    pub fn new(
        artifact_id: String,
        mode: ExecutionMode,
        results: Vec<StatementResult>,
        aborted: bool,
    ) -> Self {
        RunReport {
            artifact_id,
            mode,
            results,
            aborted,
            skipped: false,
        }
    }

    pub fn skipped(artifact_id: String, mode: ExecutionMode) -> Self {
        RunReport {
            artifact_id,
            mode,
            results: Vec::new(),
            aborted: false,
            skipped: true,
        }
    }

    pub fn succeeded_count(&self) -> usize {
        self.results.iter().filter(|r| r.succeeded()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.results.len() - self.succeeded_count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &StatementResult> {
        self.results.iter().filter(|r| !r.succeeded())
    }

    pub fn status(&self) -> RunStatus {
        if self.skipped {
            RunStatus::Skipped
        } else if self.aborted {
            RunStatus::Aborted
        } else if self.failed_count() == 0 {
            RunStatus::Applied
        } else if self.succeeded_count() == 0 {
            RunStatus::Failed
        } else {
            RunStatus::PartiallyApplied
        }
    }
}
