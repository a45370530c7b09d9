use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;

use crate::common::helpers::{qualified_name, quote_ident, quote_literal};
use crate::connection::SqlExecutor;
use crate::verify::presence::{ColumnPresence, VerificationReport};

/// How column existence is established.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyMethod {
    /// One lookup in `information_schema.columns`.
    Metadata,
    /// A zero-row `SELECT` of each column.
    Probe,
}

pub struct SchemaVerifier {
    executor: Arc<dyn SqlExecutor>,
    schema: String,
    method: VerifyMethod,
}

impl SchemaVerifier {
    pub fn new(executor: Arc<dyn SqlExecutor>, schema: &str, method: VerifyMethod) -> Self {
        SchemaVerifier {
            executor,
            schema: schema.to_string(),
            method,
        }
    }

    pub async fn verify_columns(&self, table: &str, expected: &[String]) -> VerificationReport {
        debug!(
            "Verifying {} column(s) of {} via {:?}",
            expected.len(),
            table,
            self.method
        );

        let columns = match self.method {
            VerifyMethod::Metadata => self.check_metadata(table, expected).await,
            VerifyMethod::Probe => self.probe_columns(table, expected).await,
        };

        let report = VerificationReport {
            table: table.to_string(),
            columns,
        };

        report.log();
        report
    }

    async fn check_metadata(&self, table: &str, expected: &[String]) -> Vec<(String, ColumnPresence)> {
        let query = format!(
            "SELECT column_name FROM information_schema.columns WHERE table_schema = {} AND table_name = {}",
            quote_literal(&self.schema),
            quote_literal(table)
        );

        match self.executor.query(&query).await {
            Ok(rows) => {
                if rows.is_empty() {
                    warn!("No columns found for {}.{}, table may not exist", self.schema, table);
                }

                let existing: HashSet<&str> = rows
                    .iter()
                    .filter_map(|row| row.get("column_name").and_then(Value::as_str))
                    .collect();

                expected
                    .iter()
                    .map(|column| {
                        let presence = if existing.contains(column.as_str()) {
                            ColumnPresence::Present
                        } else {
                            ColumnPresence::Absent
                        };
                        (column.clone(), presence)
                    })
                    .collect()
            }
            Err(err) => {
                let reason = err.to_string();
                expected
                    .iter()
                    .map(|column| (column.clone(), ColumnPresence::Unknown(reason.clone())))
                    .collect()
            }
        }
    }

    async fn probe_columns(&self, table: &str, expected: &[String]) -> Vec<(String, ColumnPresence)> {
        let relation = qualified_name(&self.schema, table);
        let mut columns = Vec::with_capacity(expected.len());

        for column in expected {
            let query = format!("SELECT {} FROM {} LIMIT 0", quote_ident(column), relation);
            let result = self.executor.query(&query).await.map(|_| ());
            columns.push((column.clone(), ColumnPresence::from_probe(result)));
        }

        columns
    }
}
