//! Home Assistant recorder (SQLite) source connector.
//!
//! The database is opened read-only through a single-connection pool, so a
//! run never competes with itself for the file.

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, TypeInfo, ValueRef};
use tracing::{debug, info};

use crate::config::SourceConfig;
use crate::connectors::{SourceConnector, SourceLayout, SourceRecord, SourceSchema, SourceValue};
use crate::error::{Error, Result};
use crate::planner::SourceQuery;
use crate::transform::to_instant;

/// Recorder database connector.
pub struct SqliteConnector {
    config: SourceConfig,
    pool: Option<SqlitePool>,
    layout: Option<SourceLayout>,
}

impl SqliteConnector {
    /// Creates a connector; nothing is opened until [`SourceConnector::connect`].
    #[must_use]
    pub fn new(config: SourceConfig) -> Self {
        Self {
            config,
            pool: None,
            layout: None,
        }
    }

    fn pool(&self) -> Result<&SqlitePool> {
        self.pool
            .as_ref()
            .ok_or_else(|| Error::SourceConnection("Not connected".to_string()))
    }

    async fn detect_layout(pool: &SqlitePool) -> Result<SourceLayout> {
        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' \
             AND name IN ('states', 'states_meta', 'state_attributes')",
        )
        .fetch_all(pool)
        .await?;
        let has = |name: &str| tables.iter().any(|t| t == name);

        if !has("states") || !has("state_attributes") {
            return Err(Error::SourceConnection(
                "not a Home Assistant recorder database (missing states tables)".to_string(),
            ));
        }

        let has_ts: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM pragma_table_info('states') WHERE name = 'last_updated_ts'",
        )
        .fetch_one(pool)
        .await?;
        if has_ts == 0 {
            return Err(Error::SourceConnection(
                "recorder schema predates last_updated_ts; start Home Assistant once to upgrade it"
                    .to_string(),
            ));
        }

        Ok(if has("states_meta") {
            SourceLayout::StatesMeta
        } else {
            SourceLayout::Legacy
        })
    }
}

#[async_trait]
impl SourceConnector for SqliteConnector {
    fn source_type(&self) -> &'static str {
        "sqlite"
    }

    async fn connect(&mut self) -> Result<()> {
        if !self.config.path.is_file() {
            return Err(Error::SourceConnection(format!(
                "recorder database not found: {}",
                self.config.path.display()
            )));
        }

        let options = SqliteConnectOptions::new()
            .filename(&self.config.path)
            .read_only(true)
            .create_if_missing(false);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| {
                Error::SourceConnection(format!(
                    "failed to open {}: {}",
                    self.config.path.display(),
                    e
                ))
            })?;

        let layout = Self::detect_layout(&pool).await?;
        info!(path = %self.config.path.display(), ?layout, "connected to recorder database");

        self.layout = Some(layout);
        self.pool = Some(pool);
        Ok(())
    }

    async fn inspect(&self) -> Result<SourceSchema> {
        let pool = self.pool()?;
        let layout = self
            .layout
            .ok_or_else(|| Error::SourceConnection("Not connected".to_string()))?;

        let total_rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM states")
            .fetch_one(pool)
            .await?;
        let entities: i64 = match layout {
            SourceLayout::StatesMeta => {
                sqlx::query_scalar("SELECT COUNT(*) FROM states_meta")
                    .fetch_one(pool)
                    .await?
            }
            SourceLayout::Legacy => {
                sqlx::query_scalar("SELECT COUNT(DISTINCT entity_id) FROM states")
                    .fetch_one(pool)
                    .await?
            }
        };
        let range = sqlx::query("SELECT MIN(last_updated_ts), MAX(last_updated_ts) FROM states")
            .fetch_one(pool)
            .await?;

        Ok(SourceSchema {
            layout,
            total_rows: u64::try_from(total_rows).unwrap_or(0),
            entities: u64::try_from(entities).unwrap_or(0),
            oldest: to_instant(&column_value(&range, 0)?),
            newest: to_instant(&column_value(&range, 1)?),
        })
    }

    async fn count(&self, query: &SourceQuery) -> Result<u64> {
        let pool = self.pool()?;
        let mut q = sqlx::query_scalar::<_, i64>(&query.count_sql);
        if let Some(bound) = query.upper_bound {
            q = q.bind(bound);
        }
        let count = q.fetch_one(pool).await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    fn fetch<'a>(&'a self, query: &'a SourceQuery) -> BoxStream<'a, Result<SourceRecord>> {
        let pool = match self.pool() {
            Ok(pool) => pool,
            Err(e) => return stream::once(async move { Err(e) }).boxed(),
        };
        debug!(sql = %query.sql, upper_bound = ?query.upper_bound, "opening source cursor");

        let mut q = sqlx::query(&query.sql);
        if let Some(bound) = query.upper_bound {
            q = q.bind(bound);
        }
        q.fetch(pool)
            .map(|row| {
                row.map_err(|e| Error::Extraction(e.to_string()))
                    .and_then(|row| decode_row(&row))
            })
            .boxed()
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(pool) = self.pool.take() {
            pool.close().await;
        }
        Ok(())
    }
}

fn decode_row(row: &SqliteRow) -> Result<SourceRecord> {
    Ok(SourceRecord {
        state: column_value(row, 0)?,
        entity_id: column_text(row, 1)?.unwrap_or_default(),
        updated_at: column_value(row, 2)?,
        attributes: column_text(row, 3)?,
        row_id: row.try_get::<i64, _>(4)?,
    })
}

/// Reads a text column whatever storage class the value actually has.
fn column_text(row: &SqliteRow, idx: usize) -> Result<Option<String>> {
    Ok(match column_value(row, idx)? {
        SourceValue::Null => None,
        SourceValue::Integer(i) => Some(i.to_string()),
        SourceValue::Real(f) => Some(f.to_string()),
        SourceValue::Text(s) => Some(s),
    })
}

/// Reads a column by its storage class rather than its declared type.
fn column_value(row: &SqliteRow, idx: usize) -> Result<SourceValue> {
    let kind = {
        let raw = row.try_get_raw(idx)?;
        if raw.is_null() {
            return Ok(SourceValue::Null);
        }
        raw.type_info().name().to_string()
    };

    Ok(match kind.as_str() {
        "INTEGER" | "BOOLEAN" => SourceValue::Integer(row.try_get_unchecked::<i64, _>(idx)?),
        "REAL" | "NUMERIC" => SourceValue::Real(row.try_get_unchecked::<f64, _>(idx)?),
        "BLOB" => {
            let bytes = row.try_get_unchecked::<Vec<u8>, _>(idx)?;
            SourceValue::Text(String::from_utf8_lossy(&bytes).into_owned())
        }
        _ => SourceValue::Text(row.try_get_unchecked::<String, _>(idx)?),
    })
}

#[cfg(test)]
#[path = "sqlite_tests.rs"]
mod tests;
