//! InfluxDB v2 target connector.
//!
//! Points are written as line protocol to `/api/v2/write`; the watermark is
//! read back with a Flux query against `/api/v2/query`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::config::DestinationConfig;
use crate::connectors::common::{create_http_client, handle_http_error, retry_after_secs};
use crate::connectors::TargetConnector;
use crate::error::{Error, Result};
use crate::point::{DataPoint, FieldValue};

/// InfluxDB v2 connector.
pub struct InfluxConnector {
    config: DestinationConfig,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct BucketsResponse {
    #[serde(default)]
    buckets: Vec<BucketInfo>,
}

#[derive(Debug, Deserialize)]
struct BucketInfo {
    name: String,
}

impl InfluxConnector {
    /// Creates a new connector with a configured HTTP client.
    pub fn new(config: DestinationConfig) -> Self {
        Self {
            config,
            client: create_http_client(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.url.trim_end_matches('/'), path)
    }

    fn auth_header(&self) -> String {
        format!("Token {}", self.config.token)
    }

    /// Flux query returning the single oldest `_time` of `measurement`.
    fn earliest_time_query(&self, measurement: &str) -> String {
        format!(
            "from(bucket: \"{}\")\n  \
             |> range(start: 0)\n  \
             |> filter(fn: (r) => r[\"_measurement\"] == \"{}\")\n  \
             |> group()\n  \
             |> sort(columns: [\"_time\"], desc: false)\n  \
             |> limit(n: 1)\n  \
             |> keep(columns: [\"_time\"])",
            flux_string(&self.config.bucket),
            flux_string(measurement)
        )
    }

    async fn check_health(&self) -> Result<()> {
        let response = self
            .client
            .get(self.endpoint("/health"))
            .send()
            .await
            .map_err(|e| Error::TargetConnection(format!("InfluxDB unreachable: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(Error::TargetConnection(format!(
                "InfluxDB health check failed ({}): {}",
                status, body
            )));
        }
        Ok(())
    }

    async fn check_bucket(&self) -> Result<()> {
        let response = self
            .client
            .get(self.endpoint("/api/v2/buckets"))
            .header("Authorization", self.auth_header())
            .query(&[
                ("org", self.config.org.as_str()),
                ("name", self.config.bucket.as_str()),
            ])
            .send()
            .await
            .map_err(|e| Error::TargetConnection(format!("InfluxDB request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let retry_after = retry_after_secs(&response);
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            if status == 404 {
                return Err(Error::Config(format!(
                    "InfluxDB organization '{}' not found",
                    self.config.org
                )));
            }
            return Err(handle_http_error(status, &body, retry_after, "InfluxDB buckets"));
        }

        let buckets: BucketsResponse = response
            .json()
            .await
            .map_err(|e| Error::TargetConnection(format!("Failed to parse buckets response: {}", e)))?;

        if buckets.buckets.iter().any(|b| b.name == self.config.bucket) {
            Ok(())
        } else {
            Err(Error::Config(format!(
                "InfluxDB bucket '{}' not found in organization '{}'",
                self.config.bucket, self.config.org
            )))
        }
    }
}

#[async_trait]
impl TargetConnector for InfluxConnector {
    fn target_type(&self) -> &'static str {
        "influxdb"
    }

    async fn connect(&mut self) -> Result<()> {
        self.check_health().await?;
        self.check_bucket().await?;
        debug!(url = %self.config.url, bucket = %self.config.bucket, "connected to InfluxDB");
        Ok(())
    }

    async fn earliest_time(&self, measurement: &str) -> Result<Option<DateTime<Utc>>> {
        let query = self.earliest_time_query(measurement);
        debug!(%query, "querying watermark");

        let response = self
            .client
            .post(self.endpoint("/api/v2/query"))
            .header("Authorization", self.auth_header())
            .header("Content-Type", "application/vnd.flux")
            .header("Accept", "application/csv")
            .query(&[("org", self.config.org.as_str())])
            .body(query)
            .send()
            .await
            .map_err(|e| Error::Query(format!("InfluxDB query request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let retry_after = retry_after_secs(&response);
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(handle_http_error(status, &body, retry_after, "InfluxDB query"));
        }

        let body = response
            .text()
            .await
            .map_err(|e| Error::Query(format!("Failed to read query response: {}", e)))?;
        parse_first_time(&body)
    }

    async fn write(&self, points: &[DataPoint]) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }
        let body = encode_batch(points)?;

        let response = self
            .client
            .post(self.endpoint("/api/v2/write"))
            .header("Authorization", self.auth_header())
            .header("Content-Type", "text/plain; charset=utf-8")
            .query(&[
                ("org", self.config.org.as_str()),
                ("bucket", self.config.bucket.as_str()),
                ("precision", "ns"),
            ])
            .body(body)
            .send()
            .await
            .map_err(|e| Error::Write(format!("InfluxDB write request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let retry_after = retry_after_secs(&response);
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(match status {
                429 | 401 | 403 => handle_http_error(status, &body, retry_after, "InfluxDB write"),
                // Points without a type conflict were stored.
                422 => Error::PartialWrite(body),
                _ => Error::Write(format!("InfluxDB write error {}: {}", status, body)),
            });
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Escapes a value for use inside a Flux string literal.
fn flux_string(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace("${", "\\${")
}

/// Extracts the first `_time` value from a CSV query response.
///
/// Annotation rows (`#datatype`, `#group`, `#default`) are skipped; the first
/// remaining record is the header.
fn parse_first_time(body: &str) -> Result<Option<DateTime<Utc>>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .comment(Some(b'#'))
        .from_reader(body.as_bytes());
    let mut records = reader
        .records()
        .map(|r| r.map_err(|e| Error::Query(format!("malformed query response: {}", e))));

    let (Some(header), Some(row)) = (records.next(), records.next()) else {
        return Ok(None);
    };
    let (header, row) = (header?, row?);

    if let Some(idx) = header.iter().position(|c| c == "error") {
        return Err(Error::Query(
            row.get(idx).unwrap_or("unknown error").to_string(),
        ));
    }
    let idx = header
        .iter()
        .position(|c| c == "_time")
        .ok_or_else(|| Error::Query("query response has no _time column".to_string()))?;
    let raw = row
        .get(idx)
        .ok_or_else(|| Error::Query(format!("malformed query row: {:?}", row)))?;
    let time = DateTime::parse_from_rfc3339(raw)
        .map_err(|e| Error::Query(format!("invalid _time '{}': {}", raw, e)))?;
    Ok(Some(time.with_timezone(&Utc)))
}

/// Encodes points as newline-separated line protocol.
///
/// # Errors
///
/// Returns [`Error::Write`] for a point without fields or with a timestamp
/// outside the nanosecond range.
pub fn encode_batch(points: &[DataPoint]) -> Result<String> {
    let mut out = String::with_capacity(points.len() * 128);
    for point in points {
        encode_line(point, &mut out)?;
        out.push('\n');
    }
    Ok(out)
}

/// Appends one point as a line protocol line (without the newline).
///
/// # Errors
///
/// See [`encode_batch`].
pub fn encode_line(point: &DataPoint, out: &mut String) -> Result<()> {
    if point.fields.is_empty() {
        return Err(Error::Write(format!(
            "point in '{}' has no fields",
            point.measurement
        )));
    }
    let nanos = point.timestamp.timestamp_nanos_opt().ok_or_else(|| {
        Error::Write(format!("timestamp {} out of range", point.timestamp))
    })?;

    escape_into(out, &point.measurement, &[',', ' ']);
    for (key, value) in &point.tags {
        if value.is_empty() {
            continue;
        }
        out.push(',');
        escape_into(out, key, &[',', '=', ' ']);
        out.push('=');
        escape_into(out, value, &[',', '=', ' ']);
    }

    let mut separator = ' ';
    for (key, value) in &point.fields {
        out.push(separator);
        separator = ',';
        escape_into(out, key, &[',', '=', ' ']);
        out.push('=');
        match value {
            FieldValue::Float(f) => out.push_str(&f.to_string()),
            FieldValue::Text(s) => {
                out.push('"');
                for c in s.chars() {
                    match c {
                        '"' | '\\' => {
                            out.push('\\');
                            out.push(c);
                        }
                        '\n' => out.push_str("\\n"),
                        '\r' => {}
                        _ => out.push(c),
                    }
                }
                out.push('"');
            }
        }
    }

    out.push(' ');
    out.push_str(&nanos.to_string());
    Ok(())
}

/// Escapes identifiers; line breaks cannot be escaped so they become spaces.
fn escape_into(out: &mut String, s: &str, specials: &[char]) {
    for c in s.chars() {
        let c = if c == '\n' || c == '\r' { ' ' } else { c };
        if specials.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
}

#[cfg(test)]
#[path = "influxdb_tests.rs"]
mod tests;
