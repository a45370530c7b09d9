#[macro_use]
extern crate log;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::{env, fs, thread};

use anyhow::{bail, Context, Result};
use chrono::Local;
use env_logger::Env;
use structopt::StructOpt;
use toml::Value;

use crate::args::{Args, Command, ReconcileArgs, RunArgs, VerifyArgs};
use crate::common::helpers::{preview, print_error_chain};
use crate::config::{Config, VerifyTarget};
use crate::connection::{connect, SqlExecutor};
use crate::migrate::artifact::{collect_artifact_paths, MigrationArtifact};
use crate::migrate::ledger::MigrationLedger;
use crate::migrate::run_options::{ErrorPolicy, RunOptions};
use crate::migrate::run_report::{RunReport, RunStatus};
use crate::migrate::runner::MigrationRunner;
use crate::reconcile::reconciler::DataReconciler;
use crate::reconcile::rule::ReconcileRule;
use crate::verify::verifier::{SchemaVerifier, VerifyMethod};

mod args;
mod common;
mod config;
mod connection;
mod error;
mod migrate;
mod reconcile;
#[cfg(test)]
mod test_helpers;
mod verify;

const DEFAULT_CONFIG_FILE: &str = "config.toml";

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    if let Err(errors) = init().await.with_context(|| "Run failed") {
        print_error_chain(&errors);
    }

    Ok(())
}

async fn init() -> Result<()> {
    let options = Args::from_args();

    initialize_logger(options.verbose, options.quiet);

    let mut config = load_config(options.config.as_deref()).context("Failed to load config file")?;
    config.apply_env(|name| env::var(name).ok().filter(|value| !value.is_empty()));

    match options.command {
        Command::Run(run_args) => run_migrations(&config, run_args).await,
        Command::Verify(verify_args) => run_verification(&config, verify_args).await,
        Command::Reconcile(reconcile_args) => run_reconciliation(&config, reconcile_args).await,
        Command::Status => show_status(&config).await,
    }
}

async fn run_migrations(config: &Config, args: RunArgs) -> Result<()> {
    let settings = config.settings();

    // Every file is read before any SQL is sent.
    let artifacts = collect_artifact_paths(&args.paths)?
        .iter()
        .map(|path| MigrationArtifact::load(path))
        .collect::<Result<Vec<_>, _>>()?;

    if artifacts.is_empty() {
        bail!("No SQL files found in the given paths");
    }

    let options = RunOptions {
        mode: args.mode.unwrap_or(settings.mode),
        error_policy: if args.abort_on_error {
            ErrorPolicy::Abort
        } else {
            settings.error_policy
        },
        use_ledger: settings.ledger && !args.no_ledger,
        ledger_table: settings.ledger_table.clone(),
        force: args.force,
    };

    if args.dry_run {
        print_plan(&artifacts, &options);
        return Ok(());
    }

    let executor = connect_endpoint(config).await?;
    apply_artifacts(executor, config, &artifacts, options, args.verify, args.reconcile).await;

    Ok(())
}

/// Apply every artifact, print the summary, then run the requested follow-up stages.
async fn apply_artifacts(
    executor: Arc<dyn SqlExecutor>,
    config: &Config,
    artifacts: &[MigrationArtifact],
    options: RunOptions,
    verify: bool,
    reconcile: bool,
) -> Vec<RunReport> {
    let settings = config.settings();
    let runner = MigrationRunner::new(executor.clone(), options, &settings.schema);

    let reports = runner.run_all(artifacts).await;
    print_summary(&reports, artifacts.len());

    if verify {
        verify_targets(executor.clone(), &settings.schema, config.verify_targets(), VerifyMethod::Metadata)
            .await;
    }

    if reconcile {
        reconcile_rules(executor, &settings.schema, config.reconcile_rules(), &[]).await;
    }

    reports
}

async fn run_verification(config: &Config, args: VerifyArgs) -> Result<()> {
    let targets = match args.table {
        Some(table) => {
            if args.columns.is_empty() {
                bail!("--columns is required together with --table");
            }
            vec![VerifyTarget {
                table,
                columns: args.columns,
            }]
        }
        None => config.verify_targets().to_vec(),
    };

    let method = if args.probe {
        VerifyMethod::Probe
    } else {
        VerifyMethod::Metadata
    };

    let executor = connect_endpoint(config).await?;
    verify_targets(executor, &config.settings().schema, &targets, method).await;

    Ok(())
}

async fn run_reconciliation(config: &Config, args: ReconcileArgs) -> Result<()> {
    let executor = connect_endpoint(config).await?;
    reconcile_rules(executor, &config.settings().schema, config.reconcile_rules(), &args.rules).await;

    Ok(())
}

async fn show_status(config: &Config) -> Result<()> {
    let settings = config.settings();
    let executor = connect_endpoint(config).await?;
    let ledger = MigrationLedger::new(executor, &settings.schema, &settings.ledger_table);

    let entries = ledger.entries().await?;

    if entries.is_empty() {
        info!("No migrations recorded in {}", settings.ledger_table);
    }

    for entry in entries {
        let short_checksum: String = entry.checksum.chars().take(12).collect();
        info!("{}  {}  {}", entry.applied_at, short_checksum, entry.id);
    }

    Ok(())
}

async fn connect_endpoint(config: &Config) -> Result<Arc<dyn SqlExecutor>> {
    info!("Connecting to {:?} endpoint...", config.endpoint().kind);

    connect(config.endpoint())
        .await
        .context("Failed to initialize database endpoint")
}

async fn verify_targets(
    executor: Arc<dyn SqlExecutor>,
    schema: &str,
    targets: &[VerifyTarget],
    method: VerifyMethod,
) {
    if targets.is_empty() {
        warn!("No verification targets configured");
        return;
    }

    let verifier = SchemaVerifier::new(executor, schema, method);

    for target in targets {
        verifier.verify_columns(&target.table, &target.columns).await;
    }
}

async fn reconcile_rules(
    executor: Arc<dyn SqlExecutor>,
    schema: &str,
    rules: &[ReconcileRule],
    only: &[String],
) {
    for name in only {
        if !rules.iter().any(|rule| &rule.name == name) {
            warn!("Reconcile rule {} is not configured", name);
        }
    }

    let selected: Vec<&ReconcileRule> = rules
        .iter()
        .filter(|rule| only.is_empty() || only.contains(&rule.name))
        .collect();

    if selected.is_empty() {
        warn!("No reconcile rules to run");
        return;
    }

    let reconciler = DataReconciler::new(executor, schema);

    for rule in selected {
        if let Err(err) = reconciler
            .reconcile(rule)
            .await
            .with_context(|| format!("Error while reconciling {}", rule.name))
        {
            print_error_chain(&err);
        }
    }
}

fn print_plan(artifacts: &[MigrationArtifact], options: &RunOptions) {
    for artifact in artifacts {
        let units = artifact.execution_units(options.mode);
        println!(
            "-- {} ({} mode, {} unit(s))",
            artifact.source_path.display(),
            options.mode,
            units.len()
        );
        for (index, unit) in units.iter().enumerate() {
            println!("-- [{}/{}]\n{};\n", index + 1, units.len(), unit.trim_end());
        }
    }
}

fn print_summary(reports: &[RunReport], total: usize) {
    info!("Processed {} of {} file(s)", reports.len(), total);

    for report in reports {
        let line = format!(
            "{} [{}]: {} ({} ok, {} failed)",
            report.artifact_id,
            report.mode,
            report.status(),
            report.succeeded_count(),
            report.failed_count()
        );

        match report.status() {
            RunStatus::Applied | RunStatus::Skipped => info!("{}", line),
            _ => warn!("{}", line),
        }

        for failure in report.failures() {
            warn!(
                "  #{} {} ({}s) -> {}",
                failure.index + 1,
                preview(&failure.sql),
                failure.elapsed.as_secs_f32(),
                failure.error_message().unwrap_or_default()
            );
        }
    }
}

fn initialize_logger(verbose: bool, quiet: bool) {
    let level = if quiet {
        "warn"
    } else if verbose {
        "debug"
    } else {
        "info"
    };

    // RUST_LOG, when set, still takes precedence over the flags
    env_logger::Builder::from_env(Env::default().default_filter_or(level))
        .filter_module("sqlx", log::LevelFilter::Error)
        .filter_module("reqwest", log::LevelFilter::Error)
        .filter_module("hyper", log::LevelFilter::Error)
        .format(|buf, record| {
            let timestamp = Local::now().format("%H:%M:%S");

            writeln!(
                buf,
                "{} {:<5} [{}] - {}",
                timestamp,
                record.level(),
                thread::current().name().unwrap_or("<unnamed>"),
                record.args()
            )
        })
        .init();
}

/// An explicit `--config` must exist; the default file is optional and
/// credentials may then come from the environment alone.
fn load_config(path: Option<&Path>) -> Result<Config> {
    let config_file = match path {
        Some(path) => {
            if !path.exists() {
                bail!("Config file not found: {}", path.display());
            }
            path.to_path_buf()
        }
        None => {
            let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
            if !default_path.exists() {
                warn!(
                    "Config file {} not found, using defaults and environment",
                    DEFAULT_CONFIG_FILE
                );
                return Ok(Config::default());
            }
            default_path
        }
    };

    let content = fs::read_to_string(&config_file)?;
    let value = content.parse::<Value>()?;
    let config = Config::from_toml(value)?;
    Ok(config)
}
