use anyhow::{anyhow, Result};
use serde_json::Value as JsonValue;
use toml::Value;

use crate::common::helpers::{qualified_name, quote_ident, sql_literal};

/// Describes rows whose derived column (`target_column`) was left NULL while
/// the column it derives from (`source_column`) is set, and how to compute the
/// missing value: the `lookup_value_column` of the `lookup_table` row whose
/// `lookup_match_column` equals the source value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileRule {
    pub name: String,
    pub table: String,
    pub key_column: String,
    pub target_column: String,
    pub source_column: String,
    pub lookup_table: String,
    pub lookup_match_column: String,
    pub lookup_value_column: String,
}

impl ReconcileRule {
    pub(crate) fn from_toml(value: &Value) -> Result<Self> {
        let table = required(value, "table")?;
        let target_column = required(value, "target_column")?;

        let name = optional(value, "name")?
            .unwrap_or_else(|| format!("{}.{}", table, target_column));

        Ok(ReconcileRule {
            name,
            key_column: optional(value, "key_column")?.unwrap_or_else(|| "id".to_string()),
            source_column: required(value, "source_column")?,
            lookup_table: required(value, "lookup_table")?,
            lookup_match_column: required(value, "lookup_match_column")?,
            lookup_value_column: optional(value, "lookup_value_column")?
                .unwrap_or_else(|| "id".to_string()),
            table,
            target_column,
        })
    }

    pub fn incomplete_rows_query(&self, schema: &str) -> String {
        format!(
            "SELECT {key} AS key_value, {source} AS source_value FROM {table} \
             WHERE {target} IS NULL AND {source} IS NOT NULL ORDER BY {key}",
            key = quote_ident(&self.key_column),
            source = quote_ident(&self.source_column),
            target = quote_ident(&self.target_column),
            table = qualified_name(schema, &self.table),
        )
    }

    pub fn lookup_query(&self, schema: &str) -> String {
        format!(
            "SELECT {matching} AS match_value, {value} AS lookup_value FROM {table} WHERE {matching} IS NOT NULL",
            matching = quote_ident(&self.lookup_match_column),
            value = quote_ident(&self.lookup_value_column),
            table = qualified_name(schema, &self.lookup_table),
        )
    }

    /// Targeted update for one row; re-checks the NULL so a concurrent fix is not overwritten.
    pub fn update_statement(&self, schema: &str, key: &JsonValue, value: &JsonValue) -> String {
        format!(
            "UPDATE {table} SET {target} = {value} WHERE {key_column} = {key} AND {target} IS NULL",
            table = qualified_name(schema, &self.table),
            target = quote_ident(&self.target_column),
            value = sql_literal(value),
            key_column = quote_ident(&self.key_column),
            key = sql_literal(key),
        )
    }
}

fn required(value: &Value, field: &str) -> Result<String> {
    value
        .get(field)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow!("Missing or invalid '{}' field in reconcile rule", field))
}

fn optional(value: &Value, field: &str) -> Result<Option<String>> {
    match value.get(field) {
        Some(v) => v
            .as_str()
            .map(|s| Some(s.to_string()))
            .ok_or_else(|| anyhow!("Invalid '{}' field in reconcile rule", field)),
        None => Ok(None),
    }
}
