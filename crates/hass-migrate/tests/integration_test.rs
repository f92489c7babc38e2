//! End-to-end runs against a recorder database on disk and a mocked
//! InfluxDB server.
//!
//! Run with: `cargo test -p hass-migrate --test integration_test`

#![allow(clippy::pedantic)]

use hass_migrate::config::{DestinationConfig, MigrationOptions, SourceConfig};
use hass_migrate::{Error, IngestState, MigrationConfig, Pipeline};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

/// 2023-12-31T23:59:00Z
const BEFORE: f64 = 1_704_067_140.0;
/// 2024-01-01T00:00:00Z
const WATERMARK: f64 = 1_704_067_200.0;

const RECORDER: &str = "
CREATE TABLE states_meta (metadata_id INTEGER PRIMARY KEY, entity_id VARCHAR(255));
CREATE TABLE state_attributes (attributes_id INTEGER PRIMARY KEY, hash BIGINT, shared_attrs TEXT);
CREATE TABLE states (
    state_id INTEGER PRIMARY KEY,
    entity_id CHAR(0),
    state VARCHAR(255),
    attributes_id INTEGER,
    last_updated_ts FLOAT,
    metadata_id INTEGER
);
INSERT INTO states_meta VALUES (1, 'sensor.temp1'), (2, 'switch.heater'), (3, 'sensor.hum');
INSERT INTO state_attributes VALUES
    (1, 1, '{\"friendly_name\":\"Temp 1\",\"unit_of_measurement\":\"°C\"}'),
    (2, 2, 'not json'),
    (3, 3, '{\"unit_of_measurement\":\"%\",\"humidity\":\"n/a\",\"id\":7}');
";

async fn recorder(dir: &Path, rows: &[(i64, Option<&str>, Option<i64>, f64, i64)]) -> PathBuf {
    let path = dir.join("home-assistant_v2.db");
    let options = SqliteConnectOptions::new()
        .filename(&path)
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .unwrap();
    sqlx::raw_sql(RECORDER).execute(&pool).await.unwrap();
    for &(id, state, attrs, ts, meta) in rows {
        sqlx::query(
            "INSERT INTO states (state_id, state, attributes_id, last_updated_ts, metadata_id) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(state)
        .bind(attrs)
        .bind(ts)
        .bind(meta)
        .execute(&pool)
        .await
        .unwrap();
    }
    pool.close().await;
    path
}

async fn influx(watermark_csv: &str, write_status: u16) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v2/buckets"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"buckets": [{"name": "hass"}]})),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v2/query"))
        .respond_with(ResponseTemplate::new(200).set_body_string(watermark_csv))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v2/write"))
        .respond_with(ResponseTemplate::new(write_status))
        .mount(&server)
        .await;
    server
}

fn config(db: PathBuf, server: &MockServer, batch_size: usize) -> MigrationConfig {
    MigrationConfig {
        source: SourceConfig { path: db },
        destination: DestinationConfig {
            url: server.uri(),
            token: "test-token".to_string(),
            org: "home".to_string(),
            bucket: "hass".to_string(),
        },
        options: MigrationOptions {
            batch_size,
            max_retries: 0,
            progress: false,
            ..Default::default()
        },
    }
}

async fn writes(server: &MockServer) -> Vec<String> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r: &&Request| r.url.path() == "/api/v2/write")
        .map(|r| String::from_utf8_lossy(&r.body).into_owned())
        .collect()
}

#[tokio::test]
async fn test_watermark_bounds_the_run() {
    let dir = TempDir::new().unwrap();
    let db = recorder(
        dir.path(),
        &[
            (1, Some("21.5"), Some(1), BEFORE, 1),
            (2, Some("on"), Some(2), BEFORE + 1.0, 2),
            (3, Some("22.0"), Some(1), WATERMARK, 1),
            (4, Some("23.0"), Some(1), WATERMARK + 60.0, 1),
        ],
    )
    .await;
    let server = influx(",result,table,_time\r\n,_result,0,2024-01-01T00:00:00Z\r\n", 204).await;

    let mut pipeline = Pipeline::new(config(db, &server, 100));
    let stats = pipeline.run().await.unwrap();

    assert_eq!(pipeline.state(), IngestState::Done);
    assert_eq!(stats.rows_read, 2);
    assert_eq!(stats.points_written, 2);
    assert_eq!(stats.malformed_attributes, 1);

    let bodies = writes(&server).await;
    assert_eq!(bodies.len(), 1);
    let lines: Vec<&str> = bodies[0].lines().collect();
    assert_eq!(
        lines,
        vec![
            "°C,domain=sensor,entity_id=temp1,friendly_name=Temp\\ 1,source=HA friendly_name_str=\"Temp 1\",unit_of_measurement_str=\"°C\",value=21.5 1704067140000000000",
            "default_measurement,domain=switch,entity_id=heater,friendly_name=heater,source=HA state=\"on\" 1704067141000000000",
        ]
    );
}

#[tokio::test]
async fn test_empty_target_migrates_everything_in_batches() {
    let dir = TempDir::new().unwrap();
    let rows: Vec<_> = (1..=5i64)
        .map(|i| (i, Some("1"), Some(1), BEFORE + i as f64, 1))
        .collect();
    let db = recorder(dir.path(), &rows).await;
    let server = influx("", 204).await;

    let stats = Pipeline::new(config(db, &server, 2)).run().await.unwrap();

    assert_eq!(stats.watermark, None);
    assert_eq!(stats.batches, 3);
    assert_eq!(stats.points_written, 5);
    let sizes: Vec<usize> = writes(&server).await.iter().map(|b| b.lines().count()).collect();
    assert_eq!(sizes, vec![2, 2, 1]);
}

#[tokio::test]
async fn test_skips_and_dropped_fields_are_counted() {
    let dir = TempDir::new().unwrap();
    let db = recorder(
        dir.path(),
        &[
            (1, Some("unavailable"), Some(1), BEFORE, 1),
            (2, None, None, BEFORE + 1.0, 1),
            (3, Some("55"), Some(3), BEFORE + 2.0, 3),
        ],
    )
    .await;
    let server = influx("", 204).await;

    let stats = Pipeline::new(config(db, &server, 10)).run().await.unwrap();

    assert_eq!(stats.rows_skipped, 2);
    assert_eq!(stats.skipped.unavailable, 1);
    assert_eq!(stats.skipped.missing_state, 1);
    assert_eq!(stats.field_conversion, 1);
    assert_eq!(stats.points_written, 1);

    let bodies = writes(&server).await;
    assert_eq!(
        bodies[0].trim_end(),
        "%,domain=sensor,entity_id=hum,friendly_name=hum,source=HA unit_of_measurement_str=\"%\",value=55 1704067142000000000"
    );
}

#[tokio::test]
async fn test_rejected_batches_do_not_abort_the_run() {
    let dir = TempDir::new().unwrap();
    let rows: Vec<_> = (1..=3i64)
        .map(|i| (i, Some("1"), Some(1), BEFORE + i as f64, 1))
        .collect();
    let db = recorder(dir.path(), &rows).await;
    let server = influx("", 400).await;

    let stats = Pipeline::new(config(db, &server, 2)).run().await.unwrap();

    assert_eq!(stats.batches, 2);
    assert_eq!(stats.failed_batches, 2);
    assert_eq!(stats.points_failed, 3);
    assert_eq!(stats.points_written, 0);
}

#[tokio::test]
async fn test_dry_run_sends_no_writes() {
    let dir = TempDir::new().unwrap();
    let db = recorder(dir.path(), &[(1, Some("21.5"), Some(1), BEFORE, 1)]).await;
    let server = influx("", 204).await;
    let mut config = config(db, &server, 10);
    config.options.dry_run = true;

    let stats = Pipeline::new(config).run().await.unwrap();

    assert_eq!(stats.points_written, 1);
    assert!(writes(&server).await.is_empty());
}

#[tokio::test]
async fn test_missing_database_is_fatal() {
    let dir = TempDir::new().unwrap();
    let server = influx("", 204).await;

    let err = Pipeline::new(config(dir.path().join("nope.db"), &server, 10))
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, Error::SourceConnection(_)));
}
