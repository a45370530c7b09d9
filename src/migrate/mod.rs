pub mod artifact;
pub mod ledger;
pub mod run_options;
pub mod run_report;
pub mod runner;
pub mod splitter;
