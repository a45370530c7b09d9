use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::common::helpers::{qualified_name, quote_literal};
use crate::connection::{Row, SqlExecutor};
use crate::migrate::artifact::MigrationArtifact;

/// A row of the migration ledger table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LedgerEntry {
    pub id: String,
    pub checksum: String,
    pub applied_at: String,
}

/// Records which artifacts were fully applied, so each runs at most once.
pub struct MigrationLedger {
    executor: Arc<dyn SqlExecutor>,
    table: String,
}

impl MigrationLedger {
    pub fn new(executor: Arc<dyn SqlExecutor>, schema: &str, table: &str) -> Self {
        MigrationLedger {
            executor,
            table: qualified_name(schema, table),
        }
    }

    pub async fn ensure(&self) -> Result<()> {
        let query = format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    id text PRIMARY KEY,\n    checksum text NOT NULL,\n    applied_at timestamptz NOT NULL DEFAULT now()\n)",
            self.table
        );

        self.executor
            .execute(&query)
            .await
            .with_context(|| format!("Cannot create ledger table {}", self.table))
    }

    pub async fn find(&self, id: &str) -> Result<Option<LedgerEntry>> {
        let query = format!(
            "SELECT id, checksum, applied_at::text AS applied_at FROM {} WHERE id = {}",
            self.table,
            quote_literal(id)
        );

        let rows = self
            .executor
            .query(&query)
            .await
            .with_context(|| format!("Cannot read ledger entry for {}", id))?;

        rows.into_iter().next().map(parse_entry).transpose()
    }

    pub async fn entries(&self) -> Result<Vec<LedgerEntry>> {
        let query = format!(
            "SELECT id, checksum, applied_at::text AS applied_at FROM {} ORDER BY applied_at, id",
            self.table
        );

        let rows = self
            .executor
            .query(&query)
            .await
            .with_context(|| format!("Cannot read ledger table {}", self.table))?;

        rows.into_iter().map(parse_entry).collect()
    }

    pub async fn record(&self, artifact: &MigrationArtifact) -> Result<()> {
        let applied_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);

        let query = format!(
            "INSERT INTO {} (id, checksum, applied_at) VALUES ({}, {}, {}) \
             ON CONFLICT (id) DO UPDATE SET checksum = EXCLUDED.checksum, applied_at = EXCLUDED.applied_at",
            self.table,
            quote_literal(&artifact.id),
            quote_literal(&artifact.checksum),
            quote_literal(&applied_at)
        );

        self.executor
            .execute(&query)
            .await
            .with_context(|| format!("Cannot record {} in the ledger", artifact.id))?;

        debug!("Recorded {} in {}", artifact.id, self.table);

        Ok(())
    }
}

fn parse_entry(row: Row) -> Result<LedgerEntry> {
    serde_json::from_value(Value::Object(row)).context("Malformed ledger row")
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use serde_json::json;

    use super::*;
    use crate::test_helpers::FakeExecutor;

    fn ledger(fake: &Arc<FakeExecutor>) -> MigrationLedger {
        MigrationLedger::new(fake.clone(), "public", "schema_migrations")
    }

    #[tokio::test]
    async fn ensure_creates_table_idempotently() {
        let fake = Arc::new(FakeExecutor::new());
        let ledger = ledger(&fake);

        ledger.ensure().await.unwrap();
        ledger.ensure().await.unwrap();

        let executed = fake.executed();
        assert_eq!(executed.len(), 2);
        assert!(executed[0].starts_with("CREATE TABLE IF NOT EXISTS \"public\".\"schema_migrations\""));
    }

    #[tokio::test]
    async fn find_returns_recorded_entry() {
        let fake = Arc::new(FakeExecutor::new().respond(
            "WHERE id = '20240101_init.sql'",
            vec![json!({
                "id": "20240101_init.sql",
                "checksum": "abc",
                "applied_at": "2024-01-01 10:00:00+00"
            })],
        ));

        let entry = ledger(&fake).find("20240101_init.sql").await.unwrap();

        assert_eq!(
            entry,
            Some(LedgerEntry {
                id: "20240101_init.sql".to_string(),
                checksum: "abc".to_string(),
                applied_at: "2024-01-01 10:00:00+00".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn find_returns_none_for_unknown_artifact() {
        let fake = Arc::new(FakeExecutor::new());
        assert_eq!(ledger(&fake).find("new.sql").await.unwrap(), None);
    }

    #[tokio::test]
    async fn malformed_row_is_an_error() {
        let fake = Arc::new(FakeExecutor::new().respond("FROM", vec![json!({ "id": 1 })]));
        assert!(ledger(&fake).entries().await.is_err());
    }

    #[tokio::test]
    async fn record_upserts_identity_and_checksum() {
        let fake = Arc::new(FakeExecutor::new());
        let artifact =
            MigrationArtifact::from_sql(Path::new("o'neil.sql"), "SELECT 1;".to_string());

        ledger(&fake).record(&artifact).await.unwrap();

        let executed = fake.executed();
        assert_eq!(executed.len(), 1);
        assert!(executed[0].starts_with("INSERT INTO \"public\".\"schema_migrations\""));
        assert!(executed[0].contains("'o''neil.sql'"));
        assert!(executed[0].contains(&artifact.checksum));
        assert!(executed[0].contains("ON CONFLICT (id)"));
    }
}
