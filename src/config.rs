use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use toml::Value;

use crate::error::MigratorError;
use crate::migrate::run_options::{ErrorPolicy, ExecutionMode};
use crate::reconcile::rule::ReconcileRule;

pub const ENV_URL: &str = "MIGRATOR_URL";
pub const ENV_KEY: &str = "MIGRATOR_KEY";
pub const ENV_DATABASE_URL: &str = "MIGRATOR_DATABASE_URL";

const DEFAULT_RPC_FUNCTION: &str = "exec_sql";
const DEFAULT_TIMEOUT_SECS: u64 = 60;
const DEFAULT_SCHEMA: &str = "public";
const DEFAULT_LEDGER_TABLE: &str = "schema_migrations";

#[derive(Debug, Clone, Default)]
pub(crate) struct Config {
    endpoint: EndpointConfig,
    settings: SettingsConfig,
    verify: Vec<VerifyTarget>,
    reconcile: Vec<ReconcileRule>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    Rpc,
    Postgres,
}

#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub kind: EndpointKind,
    pub url: String,
    pub key: String,
    pub rpc_function: String,
    pub database_url: String,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct SettingsConfig {
    pub mode: ExecutionMode,
    pub error_policy: ErrorPolicy,
    pub ledger: bool,
    pub ledger_table: String,
    pub schema: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyTarget {
    pub table: String,
    pub columns: Vec<String>,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        EndpointConfig {
            kind: EndpointKind::Rpc,
            url: String::new(),
            key: String::new(),
            rpc_function: DEFAULT_RPC_FUNCTION.to_string(),
            database_url: String::new(),
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl Default for SettingsConfig {
    fn default() -> Self {
        SettingsConfig {
            mode: ExecutionMode::Split,
            error_policy: ErrorPolicy::Continue,
            ledger: true,
            ledger_table: DEFAULT_LEDGER_TABLE.to_string(),
            schema: DEFAULT_SCHEMA.to_string(),
        }
    }
}

impl Config {
    pub(crate) fn from_toml(config: Value) -> Result<Self> {
        let endpoint = match config.get("endpoint") {
            Some(value) => parse_endpoint_config(value)?,
            None => EndpointConfig::default(),
        };

        let settings = match config.get("settings") {
            Some(value) => parse_settings_config(value)?,
            None => SettingsConfig::default(),
        };

        let verify = match config.get("verify") {
            Some(value) => parse_verify_targets(value)?,
            None => Vec::new(),
        };

        let reconcile = match config.get("reconcile") {
            Some(value) => parse_reconcile_rules(value)?,
            None => Vec::new(),
        };

        Ok(Config {
            endpoint,
            settings,
            verify,
            reconcile,
        })
    }

    /// Fill endpoint credentials from the environment. Values from the
    /// environment win over the ones in the file.
    pub(crate) fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_URL) {
            self.endpoint.url = url;
        }
        if let Some(key) = lookup(ENV_KEY) {
            self.endpoint.key = key;
        }
        if let Some(database_url) = lookup(ENV_DATABASE_URL) {
            self.endpoint.database_url = database_url;
        }
    }

    pub fn endpoint(&self) -> &EndpointConfig {
        &self.endpoint
    }

    pub fn settings(&self) -> &SettingsConfig {
        &self.settings
    }

    pub fn verify_targets(&self) -> &[VerifyTarget] {
        &self.verify
    }

    pub fn reconcile_rules(&self) -> &[ReconcileRule] {
        &self.reconcile
    }
}

impl EndpointConfig {
    /// Checks that the credentials required by the selected endpoint are present.
    pub fn validate(&self) -> Result<(), MigratorError> {
        match self.kind {
            EndpointKind::Rpc => {
                if self.url.trim().is_empty() {
                    return Err(MigratorError::Configuration(format!(
                        "endpoint url is empty (set endpoint.url or {})",
                        ENV_URL
                    )));
                }
                if self.key.trim().is_empty() {
                    return Err(MigratorError::Configuration(format!(
                        "endpoint key is empty (set endpoint.key or {})",
                        ENV_KEY
                    )));
                }
                if self.rpc_function.trim().is_empty() {
                    return Err(MigratorError::Configuration(
                        "endpoint rpc_function is empty".to_string(),
                    ));
                }
            }
            EndpointKind::Postgres => {
                if self.database_url.trim().is_empty() {
                    return Err(MigratorError::Configuration(format!(
                        "database url is empty (set endpoint.database_url or {})",
                        ENV_DATABASE_URL
                    )));
                }
            }
        }

        Ok(())
    }
}

fn parse_endpoint_config(config: &Value) -> Result<EndpointConfig> {
    let defaults = EndpointConfig::default();

    let kind = match optional_str(config, "kind")? {
        None | Some("rpc") => EndpointKind::Rpc,
        Some("postgres") => EndpointKind::Postgres,
        Some(other) => bail!("Invalid endpoint kind: {}", other),
    };

    let url = optional_str(config, "url")?.unwrap_or_default().to_string();
    let key = optional_str(config, "key")?.unwrap_or_default().to_string();

    let rpc_function = optional_str(config, "rpc_function")?
        .map(str::to_string)
        .unwrap_or(defaults.rpc_function);

    let database_url = optional_str(config, "database_url")?
        .unwrap_or_default()
        .to_string();

    let request_timeout = match config.get("request_timeout_secs") {
        Some(value) => {
            let secs = value
                .as_integer()
                .ok_or_else(|| anyhow!("Missing or invalid request_timeout_secs"))?;
            Duration::from_secs(secs.try_into()?)
        }
        None => defaults.request_timeout,
    };

    Ok(EndpointConfig {
        kind,
        url,
        key,
        rpc_function,
        database_url,
        request_timeout,
    })
}

fn parse_settings_config(config: &Value) -> Result<SettingsConfig> {
    let defaults = SettingsConfig::default();

    let mode = match optional_str(config, "mode")? {
        Some(value) => value.parse()?,
        None => defaults.mode,
    };

    let error_policy = match optional_str(config, "error_policy")? {
        Some(value) => value.parse()?,
        None => defaults.error_policy,
    };

    let ledger = match config.get("ledger") {
        Some(value) => value
            .as_bool()
            .ok_or_else(|| anyhow!("Missing or invalid ledger flag"))?,
        None => defaults.ledger,
    };

    let ledger_table = optional_str(config, "ledger_table")?
        .map(str::to_string)
        .unwrap_or(defaults.ledger_table);

    let schema = optional_str(config, "schema")?
        .map(str::to_string)
        .unwrap_or(defaults.schema);

    Ok(SettingsConfig {
        mode,
        error_policy,
        ledger,
        ledger_table,
        schema,
    })
}

fn parse_verify_targets(config: &Value) -> Result<Vec<VerifyTarget>> {
    let targets = config
        .as_array()
        .ok_or_else(|| anyhow!("Invalid verify targets format"))?;

    targets
        .iter()
        .map(|target| {
            let table = target
                .get("table")
                .and_then(|value| value.as_str())
                .ok_or_else(|| anyhow!("Missing or invalid verify table"))?
                .to_string();

            let columns = target
                .get("columns")
                .and_then(|value| value.as_array())
                .ok_or_else(|| anyhow!("Missing or invalid columns for table {}", table))?
                .iter()
                .filter_map(|value| value.as_str().map(|s| s.to_string()))
                .collect::<Vec<String>>();

            Ok(VerifyTarget { table, columns })
        })
        .collect()
}

fn parse_reconcile_rules(config: &Value) -> Result<Vec<ReconcileRule>> {
    let rules = config
        .as_array()
        .ok_or_else(|| anyhow!("Invalid reconcile rules format"))?;

    rules.iter().map(ReconcileRule::from_toml).collect()
}

fn optional_str<'a>(config: &'a Value, field: &str) -> Result<Option<&'a str>> {
    match config.get(field) {
        Some(value) => value
            .as_str()
            .map(Some)
            .ok_or_else(|| anyhow!("Missing or invalid {}", field)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Config {
        Config::from_toml(text.parse::<Value>().unwrap()).unwrap()
    }

    #[test]
    fn empty_file_uses_defaults() {
        let config = parse("");
        assert_eq!(config.endpoint().kind, EndpointKind::Rpc);
        assert_eq!(config.endpoint().rpc_function, "exec_sql");
        assert_eq!(config.endpoint().request_timeout, Duration::from_secs(60));
        assert_eq!(config.settings().mode, ExecutionMode::Split);
        assert_eq!(config.settings().error_policy, ErrorPolicy::Continue);
        assert!(config.settings().ledger);
        assert_eq!(config.settings().ledger_table, "schema_migrations");
        assert_eq!(config.settings().schema, "public");
        assert!(config.verify_targets().is_empty());
        assert!(config.reconcile_rules().is_empty());
    }

    #[test]
    fn parses_full_file() {
        let config = parse(
            r#"
            [endpoint]
            kind = "rpc"
            url = "https://project.example.co"
            key = "service-key"
            rpc_function = "run_sql"
            request_timeout_secs = 5

            [settings]
            mode = "whole"
            error_policy = "abort"
            ledger = false
            schema = "app"

            [[verify]]
            table = "applications"
            columns = ["property_id", "guarantor_id"]

            [[reconcile]]
            table = "applications"
            key_column = "id"
            target_column = "property_id"
            source_column = "property_ref"
            lookup_table = "properties"
            lookup_match_column = "reference"
            lookup_value_column = "id"
            "#,
        );

        assert_eq!(config.endpoint().url, "https://project.example.co");
        assert_eq!(config.endpoint().key, "service-key");
        assert_eq!(config.endpoint().rpc_function, "run_sql");
        assert_eq!(config.endpoint().request_timeout, Duration::from_secs(5));
        assert_eq!(config.settings().mode, ExecutionMode::Whole);
        assert_eq!(config.settings().error_policy, ErrorPolicy::Abort);
        assert!(!config.settings().ledger);
        assert_eq!(config.settings().schema, "app");
        assert_eq!(
            config.verify_targets(),
            &[VerifyTarget {
                table: "applications".to_string(),
                columns: vec!["property_id".to_string(), "guarantor_id".to_string()],
            }]
        );
        assert_eq!(config.reconcile_rules().len(), 1);
        assert_eq!(config.reconcile_rules()[0].lookup_table, "properties");
    }

    #[test]
    fn rejects_unknown_endpoint_kind() {
        let value = "[endpoint]\nkind = \"mysql\"".parse::<Value>().unwrap();
        assert!(Config::from_toml(value).is_err());
    }

    #[test]
    fn rejects_unknown_mode() {
        let value = "[settings]\nmode = \"batched\"".parse::<Value>().unwrap();
        assert!(Config::from_toml(value).is_err());
    }

    #[test]
    fn env_overrides_file_credentials() {
        let mut config = parse("[endpoint]\nurl = \"https://file\"\nkey = \"file-key\"");
        config.apply_env(|name| match name {
            ENV_KEY => Some("env-key".to_string()),
            _ => None,
        });

        assert_eq!(config.endpoint().url, "https://file");
        assert_eq!(config.endpoint().key, "env-key");
    }

    #[test]
    fn missing_rpc_credentials_is_configuration_error() {
        let config = parse("[endpoint]\nurl = \"https://project\"");
        let err = config.endpoint().validate().unwrap_err();
        assert!(matches!(err, MigratorError::Configuration(_)));
        assert!(err.to_string().contains("key"));
    }

    #[test]
    fn whitespace_url_is_configuration_error() {
        let config = parse("[endpoint]\nurl = \"   \"\nkey = \"k\"");
        assert!(matches!(
            config.endpoint().validate(),
            Err(MigratorError::Configuration(_))
        ));
    }

    #[test]
    fn postgres_endpoint_needs_database_url() {
        let mut config = parse("[endpoint]\nkind = \"postgres\"");
        assert!(config.endpoint().validate().is_err());

        config.apply_env(|name| {
            (name == ENV_DATABASE_URL).then(|| "postgres://localhost/app".to_string())
        });
        assert!(config.endpoint().validate().is_ok());
    }
}
