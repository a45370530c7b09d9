use std::fmt;
use std::str::FromStr;

use crate::error::MigratorError;

/// How an artifact is submitted to the endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// The whole text is sent as a single execution unit.
    Whole,
    /// The text is split into statements, each executed on its own.
    Split,
}

/// What the runner does after a statement fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPolicy {
    Continue,
    Abort,
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub(crate) mode: ExecutionMode,
    pub(crate) error_policy: ErrorPolicy,
    pub(crate) use_ledger: bool,
    pub(crate) ledger_table: String,
    pub(crate) force: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        RunOptions {
            mode: ExecutionMode::Split,
            error_policy: ErrorPolicy::Continue,
            use_ledger: false,
            ledger_table: "schema_migrations".to_string(),
            force: false,
        }
    }
}

impl FromStr for ExecutionMode {
    type Err = MigratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "whole" | "file" => Ok(ExecutionMode::Whole),
            "split" | "statements" => Ok(ExecutionMode::Split),
            other => Err(MigratorError::Configuration(format!(
                "Unknown execution mode '{}', expected 'whole' or 'split'",
                other
            ))),
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ExecutionMode::Whole => write!(f, "whole-file"),
            ExecutionMode::Split => write!(f, "statement-split"),
        }
    }
}

impl FromStr for ErrorPolicy {
    type Err = MigratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "continue" => Ok(ErrorPolicy::Continue),
            "abort" => Ok(ErrorPolicy::Abort),
            other => Err(MigratorError::Configuration(format!(
                "Unknown error policy '{}', expected 'continue' or 'abort'",
                other
            ))),
        }
    }
}
