//! Source and target store connectors.

pub mod common;
pub mod influxdb;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::planner::SourceQuery;
use crate::point::DataPoint;

/// A loosely-typed column value as stored by SQLite.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceValue {
    /// SQL `NULL`.
    Null,
    /// `INTEGER` storage class.
    Integer(i64),
    /// `REAL` storage class.
    Real(f64),
    /// `TEXT` (or `BLOB`) storage class.
    Text(String),
}

/// One row of recorder history.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRecord {
    /// `states.state_id`, the tie-breaker of the extraction order.
    pub row_id: i64,
    /// Raw state.
    pub state: SourceValue,
    /// `domain.slug`
    pub entity_id: String,
    /// Update time in epoch seconds (not trusted to be numeric).
    pub updated_at: SourceValue,
    /// Raw `shared_attrs` JSON.
    pub attributes: Option<String>,
}

/// Recorder schema generations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceLayout {
    /// Entity ids normalized into `states_meta` (recorder schema 41+).
    StatesMeta,
    /// Entity id stored on `states` itself, with `last_updated_ts`.
    Legacy,
}

/// What the source database holds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSchema {
    /// Schema generation in use.
    pub layout: SourceLayout,
    /// Rows in `states`.
    pub total_rows: u64,
    /// Distinct entities.
    pub entities: u64,
    /// Oldest `last_updated_ts`.
    pub oldest: Option<DateTime<Utc>>,
    /// Newest `last_updated_ts`.
    pub newest: Option<DateTime<Utc>>,
}

/// Read side: the recorder database.
#[async_trait]
pub trait SourceConnector: Send + Sync {
    /// Get the source type name.
    fn source_type(&self) -> &'static str;

    /// Open the database. Failure here is fatal.
    async fn connect(&mut self) -> Result<()>;

    /// Inspect the schema layout and content.
    async fn inspect(&self) -> Result<SourceSchema>;

    /// Number of rows `query` will return.
    async fn count(&self, query: &SourceQuery) -> Result<u64>;

    /// Run `query` through one forward-only cursor.
    ///
    /// An `Err` item means the cursor is broken and the run must stop.
    fn fetch<'a>(&'a self, query: &'a SourceQuery) -> BoxStream<'a, Result<SourceRecord>>;

    /// Close the connection and cleanup resources.
    async fn close(&mut self) -> Result<()>;
}

/// Write side: the time-series database.
#[async_trait]
pub trait TargetConnector: Send + Sync {
    /// Get the target type name.
    fn target_type(&self) -> &'static str;

    /// Check that the server is reachable. Failure here is fatal.
    async fn connect(&mut self) -> Result<()>;

    /// Oldest point time in `measurement`, `None` when it holds no data.
    async fn earliest_time(&self, measurement: &str) -> Result<Option<DateTime<Utc>>>;

    /// Write `points` as one request. Returns once the server acknowledged.
    async fn write(&self, points: &[DataPoint]) -> Result<()>;

    /// Release resources.
    async fn close(&mut self) -> Result<()>;
}

/// Create the source connector for a configuration.
#[must_use]
pub fn create_source(config: &crate::config::SourceConfig) -> Box<dyn SourceConnector> {
    Box::new(sqlite::SqliteConnector::new(config.clone()))
}

/// Create the target connector for a configuration.
#[must_use]
pub fn create_target(config: &crate::config::DestinationConfig) -> Box<dyn TargetConnector> {
    Box::new(influxdb::InfluxConnector::new(config.clone()))
}
