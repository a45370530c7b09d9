use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::time::Instant;

use crate::common::helpers::{preview, print_error_chain};
use crate::connection::SqlExecutor;
use crate::error::MigratorError;
use crate::migrate::artifact::MigrationArtifact;
use crate::migrate::ledger::MigrationLedger;
use crate::migrate::run_options::{ErrorPolicy, RunOptions};
use crate::migrate::run_report::{RunReport, RunStatus, StatementResult};

pub struct MigrationRunner {
    executor: Arc<dyn SqlExecutor>,
    ledger: Option<MigrationLedger>,
    options: RunOptions,
}

impl MigrationRunner {
    pub fn new(executor: Arc<dyn SqlExecutor>, options: RunOptions, schema: &str) -> Self {
        let ledger = if options.use_ledger {
            Some(MigrationLedger::new(
                executor.clone(),
                schema,
                &options.ledger_table,
            ))
        } else {
            None
        };

        MigrationRunner {
            executor,
            ledger,
            options,
        }
    }

    /// Apply artifacts in order. Under the abort policy the remaining
    /// artifacts are left alone once one is not fully applied.
    pub async fn run_all(&self, artifacts: &[MigrationArtifact]) -> Vec<RunReport> {
        let mut reports = Vec::with_capacity(artifacts.len());

        for (index, artifact) in artifacts.iter().enumerate() {
            let result = self
                .run_artifact(artifact)
                .await
                .with_context(|| format!("Error while applying {}", artifact.id));

            let succeeded = match result {
                Ok(report) => {
                    let succeeded = matches!(report.status(), RunStatus::Applied | RunStatus::Skipped);
                    reports.push(report);
                    succeeded
                }
                Err(err) => {
                    print_error_chain(&err);
                    false
                }
            };

            let remaining = artifacts.len() - index - 1;

            if !succeeded && self.options.error_policy == ErrorPolicy::Abort && remaining > 0 {
                warn!("Stopping before the remaining {} file(s)", remaining);
                break;
            }
        }

        reports
    }

    pub async fn run_artifact(&self, artifact: &MigrationArtifact) -> Result<RunReport> {
        info!(
            "Applying {} ({} mode)",
            artifact.source_path.display(),
            self.options.mode
        );

        if let Some(ledger) = &self.ledger {
            ledger.ensure().await?;

            if let Some(entry) = ledger.find(&artifact.id).await? {
                if entry.checksum != artifact.checksum {
                    warn!(
                        "{} changed since it was applied at {} (recorded checksum {}, current {})",
                        artifact.id, entry.applied_at, entry.checksum, artifact.checksum
                    );
                }

                if !self.options.force {
                    info!(
                        "Skipping {}, already applied at {}",
                        artifact.id, entry.applied_at
                    );
                    return Ok(RunReport::skipped(artifact.id.clone(), self.options.mode));
                }

                info!("Re-applying {} (forced)", artifact.id);
            }
        }

        let start_time = Instant::now();

        let units = artifact.execution_units(self.options.mode);
        if units.is_empty() {
            warn!("{} contains no statements", artifact.id);
        }

        let (results, aborted) = self.execute_units(&units).await;
        let report = RunReport::new(artifact.id.clone(), self.options.mode, results, aborted);

        let end_time = Instant::now();

        info!(
            "{} {}: {} succeeded, {} failed, took: {}s",
            artifact.id,
            report.status(),
            report.succeeded_count(),
            report.failed_count(),
            end_time.saturating_duration_since(start_time).as_secs_f32()
        );

        if report.status() == RunStatus::Applied {
            if let Some(ledger) = &self.ledger {
                if let Err(err) = ledger
                    .record(artifact)
                    .await
                    .with_context(|| format!("{} was applied but not recorded", artifact.id))
                {
                    print_error_chain(&err);
                }
            }
        }

        Ok(report)
    }

    /// Run each unit in order. Returns the results and whether the error
    /// policy stopped the run before every unit was attempted.
    async fn execute_units(&self, units: &[String]) -> (Vec<StatementResult>, bool) {
        let total = units.len();
        let mut results = Vec::with_capacity(total);

        for (index, sql) in units.iter().enumerate() {
            let start_time = Instant::now();

            let outcome = self.executor.execute(sql).await.map_err(|err| {
                MigratorError::StatementExecution {
                    number: index + 1,
                    message: err.to_string(),
                }
            });

            let elapsed = Instant::now().saturating_duration_since(start_time);

            match &outcome {
                Ok(()) => info!(
                    "[{}/{}] OK {} ({}s)",
                    index + 1,
                    total,
                    preview(sql),
                    elapsed.as_secs_f32()
                ),
                Err(err) => error!("[{}/{}] FAILED {}\n       └> {}", index + 1, total, preview(sql), err),
            }

            let failed = outcome.is_err();

            results.push(StatementResult {
                index,
                sql: sql.clone(),
                outcome,
                elapsed,
            });

            if failed && self.options.error_policy == ErrorPolicy::Abort && index + 1 < total {
                warn!(
                    "Aborting run, {} statement(s) not attempted",
                    total - index - 1
                );
                return (results, true);
            }
        }

        (results, false)
    }
}
