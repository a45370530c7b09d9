use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Map, Value};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Executor;
use tokio::time::timeout;

use crate::common::helpers::{preview, wrap_rows_query};
use crate::config::{EndpointConfig, EndpointKind};
use crate::error::MigratorError;

/// One result row, keyed by column name.
pub type Row = Map<String, Value>;

/// Something that can run SQL against the target database.
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    /// Execute one or more statements, discarding any result.
    async fn execute(&self, sql: &str) -> Result<(), MigratorError>;

    /// Run a row-returning query.
    async fn query(&self, sql: &str) -> Result<Vec<Row>, MigratorError>;
}

#[async_trait]
pub trait DatabaseConnection: Sized {
    async fn new(config: &EndpointConfig) -> Result<Self>;
}

/// Hosted endpoint exposing a SQL function over HTTP: `POST /rest/v1/rpc/<function>`
/// with `{"sql": "..."}`.
pub struct RpcConnection {
    client: Client,
    endpoint: String,
    key: String,
}

pub struct PostgresConnection {
    pool: PgPool,
    request_timeout: Duration,
}

#[async_trait]
impl DatabaseConnection for RpcConnection {
    async fn new(config: &EndpointConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("Failed to build HTTP client")?;

        let endpoint = format!(
            "{}/rest/v1/rpc/{}",
            config.url.trim_end_matches('/'),
            config.rpc_function
        );

        Ok(RpcConnection {
            client,
            endpoint,
            key: config.key.clone(),
        })
    }
}

#[async_trait]
impl DatabaseConnection for PostgresConnection {
    async fn new(config: &EndpointConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(config.request_timeout)
            .connect(&config.database_url)
            .await
            .context("Failed to connect to Postgres")?;

        Ok(PostgresConnection {
            pool,
            request_timeout: config.request_timeout,
        })
    }
}

impl RpcConnection {
    async fn call(&self, sql: &str) -> Result<Value, MigratorError> {
        debug!("POST {} ({})", self.endpoint, preview(sql));

        let response = self
            .client
            .post(&self.endpoint)
            .header("apikey", &self.key)
            .bearer_auth(&self.key)
            .json(&json!({ "sql": sql }))
            .send()
            .await
            .map_err(|err| MigratorError::Endpoint(err.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| MigratorError::Endpoint(err.to_string()))?;

        if !status.is_success() {
            return Err(parse_error_payload(status, &body));
        }

        if body.trim().is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_str(&body)
            .map_err(|err| MigratorError::Endpoint(format!("Invalid response body: {}", err)))
    }
}

#[async_trait]
impl SqlExecutor for RpcConnection {
    async fn execute(&self, sql: &str) -> Result<(), MigratorError> {
        self.call(sql).await.map(|_| ())
    }

    async fn query(&self, sql: &str) -> Result<Vec<Row>, MigratorError> {
        let value = self.call(&wrap_rows_query(sql)).await?;
        rows_from_value(value)
    }
}

#[async_trait]
impl SqlExecutor for PostgresConnection {
    async fn execute(&self, sql: &str) -> Result<(), MigratorError> {
        // A plain &str runs over the simple query protocol, so multi-statement text is accepted.
        within(self.request_timeout, async {
            (&self.pool)
                .execute(sql)
                .await
                .map(|_| ())
                .map_err(map_sqlx_error)
        })
        .await
    }

    async fn query(&self, sql: &str) -> Result<Vec<Row>, MigratorError> {
        let wrapped = wrap_rows_query(sql);
        let value = within(self.request_timeout, async {
            sqlx::query_scalar::<_, Value>(&wrapped)
                .fetch_one(&self.pool)
                .await
                .map_err(map_sqlx_error)
        })
        .await?;

        rows_from_value(value)
    }
}

/// Build the executor selected by the endpoint configuration.
pub async fn connect(config: &EndpointConfig) -> Result<Arc<dyn SqlExecutor>> {
    config.validate()?;

    let executor: Arc<dyn SqlExecutor> = match config.kind {
        EndpointKind::Rpc => Arc::new(RpcConnection::new(config).await?),
        EndpointKind::Postgres => Arc::new(PostgresConnection::new(config).await?),
    };

    Ok(executor)
}

/// Bound one round-trip; an elapsed deadline becomes an endpoint error.
async fn within<T, F>(limit: Duration, request: F) -> Result<T, MigratorError>
where
    F: Future<Output = Result<T, MigratorError>>,
{
    match timeout(limit, request).await {
        Ok(result) => result,
        Err(_) => Err(MigratorError::Endpoint(format!(
            "No response within {}s",
            limit.as_secs_f32()
        ))),
    }
}

fn parse_error_payload(status: StatusCode, body: &str) -> MigratorError {
    if let Ok(payload) = serde_json::from_str::<Value>(body) {
        if let Some(message) = payload.get("message").and_then(Value::as_str) {
            let code = payload.get("code").and_then(Value::as_str);
            return MigratorError::sql(code, message);
        }
    }

    MigratorError::Endpoint(format!("HTTP {}: {}", status, preview(body)))
}

fn rows_from_value(value: Value) -> Result<Vec<Row>, MigratorError> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(row) => Ok(row),
                other => Err(MigratorError::Endpoint(format!(
                    "Expected a row object, got: {}",
                    other
                ))),
            })
            .collect(),
        other => Err(MigratorError::Endpoint(format!(
            "Expected an array of rows, got: {}",
            preview(&other.to_string())
        ))),
    }
}

fn map_sqlx_error(err: sqlx::Error) -> MigratorError {
    match err {
        sqlx::Error::Database(db_error) => {
            MigratorError::sql(db_error.code().as_deref(), db_error.message())
        }
        other => MigratorError::Endpoint(other.to_string()),
    }
}
