use std::path::PathBuf;

use structopt::clap::AppSettings;
use structopt::StructOpt;

use crate::migrate::run_options::ExecutionMode;

#[derive(Debug, StructOpt)]
#[structopt(
name = "SqlRpcMigrator",
version = env ! ("CARGO_PKG_VERSION"),
about = "Applies SQL migration files to a hosted Postgres, verifies the resulting schema and reconciles rows left inconsistent by schema changes.",
setting = AppSettings::ColoredHelp,
)]
pub struct Args {
    /// Activate verbose mode
    #[structopt(short = "v", long = "verbose")]
    pub verbose: bool,

    /// Activate quiet mode
    #[structopt(short = "q", long = "quiet")]
    pub quiet: bool,

    /// Configuration file (defaults to config.toml when present)
    #[structopt(short = "c", long = "config", parse(from_os_str))]
    pub config: Option<PathBuf>,

    #[structopt(subcommand)]
    pub command: Command,
}

#[derive(Debug, StructOpt)]
pub enum Command {
    /// Apply SQL migration files, or directories of .sql files, in order
    Run(RunArgs),

    /// Check that expected columns exist
    Verify(VerifyArgs),

    /// Fill derived columns left NULL by a schema change
    Reconcile(ReconcileArgs),

    /// List migrations recorded in the ledger
    Status,
}

#[derive(Debug, StructOpt)]
pub struct RunArgs {
    /// SQL files or directories
    #[structopt(parse(from_os_str), required = true)]
    pub paths: Vec<PathBuf>,

    /// Execution mode: "whole" sends each file at once, "split" runs statement by statement
    #[structopt(short = "m", long = "mode")]
    pub mode: Option<ExecutionMode>,

    /// Stop at the first failing statement
    #[structopt(short = "a", long = "abort-on-error")]
    pub abort_on_error: bool,

    /// Re-apply files already recorded in the ledger
    #[structopt(short = "f", long = "force")]
    pub force: bool,

    /// Do not read or write the migration ledger
    #[structopt(long = "no-ledger")]
    pub no_ledger: bool,

    /// Print the statements that would run without contacting the database
    #[structopt(long = "dry-run")]
    pub dry_run: bool,

    /// Verify the configured tables afterwards
    #[structopt(long = "verify")]
    pub verify: bool,

    /// Run the configured reconcile rules afterwards
    #[structopt(long = "reconcile")]
    pub reconcile: bool,
}

#[derive(Debug, StructOpt)]
pub struct VerifyArgs {
    /// Table to check; without it every configured target is checked
    #[structopt(short = "t", long = "table")]
    pub table: Option<String>,

    /// Comma-separated expected columns for --table
    #[structopt(long = "columns", use_delimiter = true)]
    pub columns: Vec<String>,

    /// Probe each column with a zero-row select instead of reading information_schema
    #[structopt(short = "p", long = "probe")]
    pub probe: bool,
}

#[derive(Debug, StructOpt)]
pub struct ReconcileArgs {
    /// Only run the named rules
    #[structopt(short = "r", long = "rule")]
    pub rules: Vec<String>,
}
