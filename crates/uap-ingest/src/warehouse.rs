//! Append-only warehouse
//!
//! The warehouse holds one raw table per entity plus the replaceable
//! summary table. The contract is deliberately thin: create the
//! dataset if absent, append newline-delimited JSON into a raw table
//! (no deduplication, at-least-once by design), read a table back for
//! aggregation, and replace a table wholesale.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::{PgPool, Row};
use tracing::{debug, info, instrument};

use crate::{IngestError, Result};

/// Warehouse collaborator contract.
///
/// Implementations surface append failures as `Load` errors.
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Create the dataset (table namespace) if it does not exist.
    /// Must be idempotent; runs exactly once per cycle before any
    /// entity pipeline starts.
    async fn ensure_dataset(&self) -> Result<()>;

    /// Append the records of an NDJSON document into `table`, creating
    /// the table on first load. Schema is detected from the payload
    /// (rows are stored as JSON documents). Returns rows appended.
    async fn load_append(&self, table: &str, ndjson: &[u8]) -> Result<u64>;

    /// Read all rows of `table` (empty if the table does not exist).
    async fn fetch_table(&self, table: &str) -> Result<Vec<Value>>;

    /// Replace `table` with exactly `rows` (create-or-replace).
    async fn replace_table(&self, table: &str, rows: Vec<Value>) -> Result<()>;
}

/// PostgreSQL warehouse: one schema per dataset, JSONB row tables.
pub struct PgWarehouse {
    pool: PgPool,
    dataset: String,
}

impl PgWarehouse {
    pub fn new(pool: PgPool, dataset: impl Into<String>) -> Result<Self> {
        let dataset = dataset.into();
        validate_ident(&dataset)?;
        Ok(Self { pool, dataset })
    }

    fn qualified(&self, table: &str) -> Result<String> {
        validate_ident(table)?;
        Ok(format!("\"{}\".\"{}\"", self.dataset, table))
    }
}

#[async_trait]
impl Warehouse for PgWarehouse {
    #[instrument(skip(self))]
    async fn ensure_dataset(&self) -> Result<()> {
        sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS \"{}\"", self.dataset))
            .execute(&self.pool)
            .await?;

        info!(dataset = %self.dataset, "dataset ready");
        Ok(())
    }

    #[instrument(skip(self, ndjson))]
    async fn load_append(&self, table: &str, ndjson: &[u8]) -> Result<u64> {
        let target = self.qualified(table)?;

        let text = std::str::from_utf8(ndjson)
            .map_err(|e| IngestError::Load(format!("{}: snapshot not UTF-8: {}", table, e)))?;
        let rows: Vec<Value> = text
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(serde_json::from_str)
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| IngestError::Load(format!("{}: invalid NDJSON line: {}", table, e)))?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| IngestError::Load(format!("{}: begin: {}", table, e)))?;

        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {} (data JSONB NOT NULL, loaded_at TIMESTAMPTZ NOT NULL DEFAULT now())",
            target
        ))
        .execute(&mut *tx)
        .await
        .map_err(|e| IngestError::Load(format!("{}: create: {}", table, e)))?;

        let insert = format!("INSERT INTO {} (data) VALUES ($1)", target);
        for row in &rows {
            sqlx::query(&insert)
                .bind(row)
                .execute(&mut *tx)
                .await
                .map_err(|e| IngestError::Load(format!("{}: insert: {}", table, e)))?;
        }

        tx.commit()
            .await
            .map_err(|e| IngestError::Load(format!("{}: commit: {}", table, e)))?;

        info!(table, rows = rows.len(), "appended rows");
        Ok(rows.len() as u64)
    }

    #[instrument(skip(self))]
    async fn fetch_table(&self, table: &str) -> Result<Vec<Value>> {
        let target = self.qualified(table)?;

        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM information_schema.tables WHERE table_schema = $1 AND table_name = $2)",
        )
        .bind(&self.dataset)
        .bind(table)
        .fetch_one(&self.pool)
        .await?;

        if !exists {
            debug!(table, "table absent, treating as empty");
            return Ok(Vec::new());
        }

        let rows = sqlx::query(&format!("SELECT data FROM {} ORDER BY loaded_at", target))
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|row| row.try_get::<Value, _>("data").map_err(IngestError::from))
            .collect()
    }

    #[instrument(skip(self, rows))]
    async fn replace_table(&self, table: &str, rows: Vec<Value>) -> Result<()> {
        let target = self.qualified(table)?;

        let mut tx = self.pool.begin().await?;

        sqlx::query(&format!("DROP TABLE IF EXISTS {}", target))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!(
            "CREATE TABLE {} (data JSONB NOT NULL, position BIGINT NOT NULL)",
            target
        ))
        .execute(&mut *tx)
        .await?;

        let insert = format!("INSERT INTO {} (data, position) VALUES ($1, $2)", target);
        for (position, row) in rows.iter().enumerate() {
            sqlx::query(&insert)
                .bind(row)
                .bind(position as i64)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        info!(table, rows = rows.len(), "table replaced");
        Ok(())
    }
}

/// Dataset and table names are interpolated into DDL, so they are
/// restricted to the usual unquoted-identifier alphabet.
fn validate_ident(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        },
        None => false,
    };

    if valid {
        Ok(())
    } else {
        Err(IngestError::Config(format!("invalid identifier: {:?}", name)))
    }
}
