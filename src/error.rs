use std::path::PathBuf;

use thiserror::Error;

/// SQLSTATE for a reference to a column that does not exist.
pub const UNDEFINED_COLUMN: &str = "42703";

/// SQLSTATE for a reference to a table that does not exist.
pub const UNDEFINED_TABLE: &str = "42P01";

#[derive(Debug, Error)]
pub enum MigratorError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Cannot read SQL artifact {path}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// `number` is the 1-based position of the statement in the artifact.
    #[error("Statement #{number} failed: {message}")]
    StatementExecution { number: usize, message: String },

    #[error("Verification mismatch on {table}.{column}: {detail}")]
    VerificationMismatch {
        table: String,
        column: String,
        detail: String,
    },

    #[error("Endpoint error: {0}")]
    Endpoint(String),

    #[error("{message}")]
    Sql {
        code: Option<String>,
        message: String,
    },
}

impl MigratorError {
    pub fn sql(code: Option<&str>, message: impl Into<String>) -> Self {
        MigratorError::Sql {
            code: code.map(str::to_string),
            message: message.into(),
        }
    }

    /// SQLSTATE reported by the database, when the failure came from SQL.
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            MigratorError::Sql { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// True when the database reported that the referenced table or column is missing.
    pub fn is_undefined_object(&self) -> bool {
        match (self, self.sql_state()) {
            (MigratorError::Sql { .. }, Some(UNDEFINED_COLUMN | UNDEFINED_TABLE)) => true,
            (MigratorError::Sql { message, .. }, None) => message.contains("does not exist"),
            _ => false,
        }
    }
}
