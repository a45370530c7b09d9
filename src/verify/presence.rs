use std::fmt;

use crate::error::MigratorError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnPresence {
    Present,
    Absent,
    /// The check itself failed for a reason other than the object being missing
    /// (permissions, row-level security, network).
    Unknown(String),
}

impl ColumnPresence {
    /// Classify the outcome of a zero-row `SELECT` of a column.
    pub fn from_probe(result: Result<(), MigratorError>) -> Self {
        match result {
            Ok(()) => ColumnPresence::Present,
            Err(err) if err.is_undefined_object() => ColumnPresence::Absent,
            Err(err) => ColumnPresence::Unknown(err.to_string()),
        }
    }

    pub fn is_present(&self) -> bool {
        matches!(self, ColumnPresence::Present)
    }
}

impl fmt::Display for ColumnPresence {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ColumnPresence::Present => write!(f, "present"),
            ColumnPresence::Absent => write!(f, "absent"),
            ColumnPresence::Unknown(reason) => write!(f, "unknown ({})", reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationReport {
    pub table: String,
    pub columns: Vec<(String, ColumnPresence)>,
}

impl VerificationReport {
    #[cfg(test)]
    pub fn presence(&self, column: &str) -> Option<&ColumnPresence> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, presence)| presence)
    }

    pub fn is_complete(&self) -> bool {
        self.columns.iter().all(|(_, presence)| presence.is_present())
    }

    pub fn mismatches(&self) -> Vec<MigratorError> {
        self.columns
            .iter()
            .filter(|(_, presence)| !presence.is_present())
            .map(|(column, presence)| MigratorError::VerificationMismatch {
                table: self.table.clone(),
                column: column.clone(),
                detail: presence.to_string(),
            })
            .collect()
    }

    /// Print every column; mismatches are warnings, never errors.
    pub fn log(&self) {
        for (column, presence) in &self.columns {
            if presence.is_present() {
                info!("{}.{}: {}", self.table, column, presence);
            }
        }

        for mismatch in self.mismatches() {
            warn!("{}", mismatch);
        }

        if self.is_complete() {
            info!("Table {} has all {} expected column(s)", self.table, self.columns.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UNDEFINED_COLUMN;

    #[test]
    fn classifies_probe_outcomes() {
        assert_eq!(ColumnPresence::from_probe(Ok(())), ColumnPresence::Present);
        assert_eq!(
            ColumnPresence::from_probe(Err(MigratorError::sql(
                Some(UNDEFINED_COLUMN),
                "column \"c\" does not exist"
            ))),
            ColumnPresence::Absent
        );
        assert_eq!(
            ColumnPresence::from_probe(Err(MigratorError::sql(
                Some("42501"),
                "permission denied for table leases"
            ))),
            ColumnPresence::Unknown("permission denied for table leases".to_string())
        );
    }

    #[test]
    fn mismatches_cover_absent_and_unknown() {
        let report = VerificationReport {
            table: "contracts".to_string(),
            columns: vec![
                ("id".to_string(), ColumnPresence::Present),
                ("signed_at".to_string(), ColumnPresence::Absent),
                ("tenant_id".to_string(), ColumnPresence::Unknown("timeout".to_string())),
            ],
        };

        assert!(!report.is_complete());
        let messages: Vec<String> = report.mismatches().iter().map(|m| m.to_string()).collect();
        assert_eq!(
            messages,
            vec![
                "Verification mismatch on contracts.signed_at: absent",
                "Verification mismatch on contracts.tenant_id: unknown (timeout)",
            ]
        );
        assert_eq!(report.presence("id"), Some(&ColumnPresence::Present));
        assert_eq!(report.presence("missing"), None);
    }
}
