//! In-memory stand-in for the remote database used by unit tests.
//!
//! It keeps a table → columns model that understands the guarded DDL the
//! migrations use (`ADD COLUMN IF NOT EXISTS`, `CREATE TABLE IF NOT EXISTS`),
//! answers `information_schema.columns` lookups and zero-row column probes,
//! and rejects statements that do not start with a SQL keyword.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::connection::{Row, SqlExecutor};
use crate::error::{MigratorError, UNDEFINED_COLUMN, UNDEFINED_TABLE};
use crate::migrate::splitter::split_statements;

const KEYWORDS: &[&str] = &[
    "ALTER", "BEGIN", "COMMENT", "COMMIT", "CREATE", "DELETE", "DO", "DROP", "GRANT", "INSERT",
    "SELECT", "TRUNCATE", "UPDATE", "WITH",
];

type Tables = BTreeMap<String, Vec<String>>;

#[derive(Default)]
pub struct FakeExecutor {
    state: Mutex<FakeState>,
}

#[derive(Default)]
struct FakeState {
    tables: Tables,
    executed: Vec<String>,
    queried: Vec<String>,
    failures: Vec<(String, Option<String>, String)>,
    responses: Vec<(String, Vec<Row>)>,
}

impl FakeExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(self, table: &str, columns: &[&str]) -> Self {
        self.state.lock().unwrap().tables.insert(
            table.to_string(),
            columns.iter().map(|c| c.to_string()).collect(),
        );
        self
    }

    /// Any statement or query containing `needle` fails with the given error.
    pub fn fail_when(self, needle: &str, code: Option<&str>, message: &str) -> Self {
        self.state.lock().unwrap().failures.push((
            needle.to_string(),
            code.map(str::to_string),
            message.to_string(),
        ));
        self
    }

    /// Queries containing `needle` return `rows`.
    pub fn respond(self, needle: &str, rows: Vec<Value>) -> Self {
        let rows = rows
            .into_iter()
            .map(|row| match row {
                Value::Object(map) => map,
                other => panic!("fake rows must be objects, got {}", other),
            })
            .collect();
        self.state
            .lock()
            .unwrap()
            .responses
            .push((needle.to_string(), rows));
        self
    }

    pub fn executed(&self) -> Vec<String> {
        self.state.lock().unwrap().executed.clone()
    }

    pub fn queried(&self) -> Vec<String> {
        self.state.lock().unwrap().queried.clone()
    }

    pub fn columns(&self, table: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .tables
            .get(table)
            .cloned()
            .unwrap_or_default()
    }
}

impl FakeState {
    fn injected_failure(&self, sql: &str) -> Option<MigratorError> {
        self.failures
            .iter()
            .find(|(needle, _, _)| sql.contains(needle.as_str()))
            .map(|(_, code, message)| MigratorError::sql(code.as_deref(), message.clone()))
    }
}

#[async_trait]
impl SqlExecutor for FakeExecutor {
    async fn execute(&self, sql: &str) -> Result<(), MigratorError> {
        let mut state = self.state.lock().unwrap();
        state.executed.push(sql.to_string());

        if let Some(err) = state.injected_failure(sql) {
            return Err(err);
        }

        // All statements of one call apply together or not at all.
        let mut tables = state.tables.clone();
        for statement in split_statements(sql) {
            apply_statement(&mut tables, &statement)?;
        }
        state.tables = tables;

        Ok(())
    }

    async fn query(&self, sql: &str) -> Result<Vec<Row>, MigratorError> {
        let mut state = self.state.lock().unwrap();
        state.queried.push(sql.to_string());

        if let Some(err) = state.injected_failure(sql) {
            return Err(err);
        }

        if let Some((_, rows)) = state
            .responses
            .iter()
            .find(|(needle, _)| sql.contains(needle.as_str()))
        {
            return Ok(rows.clone());
        }

        if sql.contains("information_schema.columns") {
            let table = literal_after(sql, "table_name = ").unwrap_or_default();
            let rows = state
                .tables
                .get(&table)
                .map(|columns| {
                    columns
                        .iter()
                        .map(|column| row(json!({ "column_name": column })))
                        .collect()
                })
                .unwrap_or_default();
            return Ok(rows);
        }

        if sql.trim_end().ends_with("LIMIT 0") {
            let tokens: Vec<&str> = sql.split_whitespace().collect();
            let column = unquote(tokens[1]);
            let table = unquote(tokens[3]);
            return match state.tables.get(&table) {
                None => Err(MigratorError::sql(
                    Some(UNDEFINED_TABLE),
                    format!("relation \"{}\" does not exist", table),
                )),
                Some(columns) if !columns.contains(&column) => Err(MigratorError::sql(
                    Some(UNDEFINED_COLUMN),
                    format!("column \"{}\" does not exist", column),
                )),
                Some(_) => Ok(Vec::new()),
            };
        }

        Ok(Vec::new())
    }
}

fn apply_statement(tables: &mut Tables, statement: &str) -> Result<(), MigratorError> {
    let code = statement
        .lines()
        .filter(|line| !line.trim_start().starts_with("--"))
        .collect::<Vec<_>>()
        .join(" ");
    let tokens: Vec<&str> = code.split_whitespace().collect();
    let upper: Vec<String> = tokens.iter().map(|t| t.to_ascii_uppercase()).collect();

    let first = upper.first().map(String::as_str).unwrap_or_default();
    if !KEYWORDS.contains(&first) {
        return Err(MigratorError::sql(
            Some("42601"),
            format!("syntax error at or near \"{}\"", tokens.first().unwrap_or(&"")),
        ));
    }

    let words: Vec<&str> = upper.iter().map(String::as_str).collect();

    match words.as_slice() {
        ["CREATE", "TABLE", "IF", "NOT", "EXISTS", ..] => {
            tables.entry(unquote(tokens[5])).or_default();
        }
        ["CREATE", "TABLE", ..] => {
            let table = unquote(tokens[2]);
            if tables.contains_key(&table) {
                return Err(MigratorError::sql(
                    Some("42P07"),
                    format!("relation \"{}\" already exists", table),
                ));
            }
            tables.insert(table, Vec::new());
        }
        ["ALTER", "TABLE", _, "ADD", "COLUMN", rest @ ..] => {
            let table = unquote(tokens[2]);
            let guarded = rest.starts_with(&["IF", "NOT", "EXISTS"]);
            let column = unquote(tokens[if guarded { 8 } else { 5 }]);

            let columns = tables.get_mut(&table).ok_or_else(|| {
                MigratorError::sql(
                    Some(UNDEFINED_TABLE),
                    format!("relation \"{}\" does not exist", table),
                )
            })?;

            if columns.contains(&column) {
                if !guarded {
                    return Err(MigratorError::sql(
                        Some("42701"),
                        format!("column \"{}\" of relation \"{}\" already exists", column, table),
                    ));
                }
            } else {
                columns.push(column);
            }
        }
        _ => {}
    }

    Ok(())
}

/// `"public"."offers"` → `offers`.
fn unquote(raw: &str) -> String {
    let name = raw.split('(').next().unwrap_or(raw);
    name.rsplit('.')
        .next()
        .unwrap_or(name)
        .trim_matches('"')
        .to_string()
}

fn literal_after(sql: &str, marker: &str) -> Option<String> {
    let start = sql.find(marker)? + marker.len();
    let rest = sql[start..].strip_prefix('\'')?;
    rest.find('\'').map(|end| rest[..end].to_string())
}

pub fn row(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        other => panic!("expected an object, got {}", other),
    }
}
