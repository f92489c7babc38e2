// Migration tool - pedantic lints relaxed for CLI ergonomics
#![allow(clippy::pedantic)]

//! # Home Assistant history migration
//!
//! `hass-migrate` is a CLI tool and library that copies the state history
//! kept by the Home Assistant recorder (SQLite) into InfluxDB v2.
//!
//! Each run reads the oldest point already present in the target (the
//! *watermark*) and migrates only recorder rows strictly older than it, so
//! repeated runs extend the imported history backwards without duplicates.
//!
//! ## Quick Start
//!
//! ```bash
//! # From environment variables
//! SQLITE_DB=/config/home-assistant_v2.db INFLUXDB_URL=http://localhost:8086 \
//! INFLUXDB_TOKEN=... INFLUXDB_ORG=home INFLUXDB_BUCKET=hass hass-migrate
//!
//! # From a configuration file, preview only
//! hass-migrate run --config migration.yaml --dry-run
//! ```
//!
//! ## Configuration Example
//!
//! ```yaml
//! source:
//!   path: /config/home-assistant_v2.db
//!
//! destination:
//!   url: http://localhost:8086
//!   token: your-influxdb-token
//!   org: home
//!   bucket: home_assistant
//!
//! options:
//!   batch_size: 10000
//!   watermark_measurement: units
//! ```
//!
//! ## Field naming
//!
//! InfluxDB fixes a field's type on first write. Numeric states go to
//! `value`, text states to `state`, and text attributes get a `_str` suffix,
//! so each field name only ever carries one type (see [`naming`]).

#![warn(missing_docs)]

pub mod attributes;
pub mod config;
pub mod connectors;
pub mod error;
pub mod naming;
pub mod pipeline;
pub mod planner;
pub mod point;
pub mod retry;
pub mod transform;
pub mod watermark;

pub use config::{DestinationConfig, MigrationConfig, MigrationOptions, SourceConfig};
pub use connectors::{SourceConnector, SourceRecord, SourceSchema, TargetConnector};
pub use error::{Error, Result};
pub use naming::{FieldNaming, POLICY_VERSION};
pub use pipeline::{IngestState, MigrationStats, Pipeline};
pub use point::{DataPoint, FieldValue};
pub use transform::{PointBuilder, SkipReason};
pub use watermark::WatermarkResolver;
