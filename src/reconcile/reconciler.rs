use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::Value;
use tokio::time::Instant;

use crate::common::helpers::{preview, value_key};
use crate::connection::SqlExecutor;
use crate::reconcile::rule::ReconcileRule;

#[derive(Debug, Default)]
pub struct ReconcileReport {
    pub scanned: usize,
    pub updated: usize,
    /// Keys of rows whose source value had no single non-NULL lookup match.
    pub unresolved: Vec<Value>,
    /// Keys of rows whose update failed, with the error message.
    pub failed: Vec<(Value, String)>,
}

pub struct DataReconciler {
    executor: Arc<dyn SqlExecutor>,
    schema: String,
}

impl DataReconciler {
    pub fn new(executor: Arc<dyn SqlExecutor>, schema: &str) -> Self {
        DataReconciler {
            executor,
            schema: schema.to_string(),
        }
    }

    pub async fn reconcile(&self, rule: &ReconcileRule) -> Result<ReconcileReport> {
        info!("Reconciling {}", rule.name);

        let start_time = Instant::now();

        let rows = self
            .executor
            .query(&rule.incomplete_rows_query(&self.schema))
            .await
            .with_context(|| format!("Cannot select incomplete rows of {}", rule.table))?;

        let mut report = ReconcileReport {
            scanned: rows.len(),
            ..ReconcileReport::default()
        };

        if rows.is_empty() {
            info!("{}: nothing to reconcile", rule.name);
            return Ok(report);
        }

        let lookup = self.load_lookup(rule).await?;

        for row in rows {
            let key = row.get("key_value").cloned().unwrap_or(Value::Null);
            let source = row.get("source_value").cloned().unwrap_or(Value::Null);

            let value = match (key.is_null(), value_key(&source).and_then(|k| lookup.get(&k))) {
                (false, Some(Some(value))) => value,
                (_, Some(None)) => {
                    warn!(
                        "{}: {} = {} matches several {} rows, skipping",
                        rule.name, rule.source_column, source, rule.lookup_table
                    );
                    report.unresolved.push(key);
                    continue;
                }
                _ => {
                    warn!(
                        "{}: no {} row for {} = {} (key {})",
                        rule.name, rule.lookup_table, rule.source_column, source, key
                    );
                    report.unresolved.push(key);
                    continue;
                }
            };

            let statement = rule.update_statement(&self.schema, &key, value);

            match self.executor.execute(&statement).await {
                Ok(()) => {
                    debug!("{}: {}", rule.name, preview(&statement));
                    report.updated += 1;
                }
                Err(err) => {
                    error!("{}: update of key {} failed\n       └> {}", rule.name, key, err);
                    report.failed.push((key, err.to_string()));
                }
            }
        }

        let end_time = Instant::now();

        info!(
            "{}: scanned {}, updated {}, unresolved {}, failed {}, took: {}s",
            rule.name,
            report.scanned,
            report.updated,
            report.unresolved.len(),
            report.failed.len(),
            end_time.saturating_duration_since(start_time).as_secs_f32()
        );

        Ok(report)
    }

    /// Match value → lookup value; `None` marks a match value shared by rows
    /// with different lookup values. NULL lookup values are never loaded.
    async fn load_lookup(&self, rule: &ReconcileRule) -> Result<HashMap<String, Option<Value>>> {
        let rows = self
            .executor
            .query(&rule.lookup_query(&self.schema))
            .await
            .with_context(|| format!("Cannot load lookup table {}", rule.lookup_table))?;

        let mut lookup: HashMap<String, Option<Value>> = HashMap::new();

        for row in rows {
            let Some(match_key) = row.get("match_value").and_then(value_key) else {
                continue;
            };
            let Some(value) = row.get("lookup_value").filter(|value| !value.is_null()).cloned() else {
                continue;
            };

            lookup
                .entry(match_key)
                .and_modify(|existing| {
                    if existing.as_ref() != Some(&value) {
                        *existing = None;
                    }
                })
                .or_insert_with(|| Some(value.clone()));
        }

        debug!("{}: loaded {} lookup value(s)", rule.name, lookup.len());

        Ok(lookup)
    }
}
