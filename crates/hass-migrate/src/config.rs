//! Configuration types for hass-migrate.
//!
//! A [`MigrationConfig`] is built once at startup (from a YAML file or from
//! CLI flags / environment variables), validated, and then only ever passed
//! by reference.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::connectors::common::validate_url;
use crate::error::{Error, Result};
use crate::naming::FieldNaming;

/// Main migration configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Source recorder database.
    pub source: SourceConfig,
    /// Destination InfluxDB configuration.
    pub destination: DestinationConfig,
    /// Migration options.
    #[serde(default)]
    pub options: MigrationOptions,
}

/// Home Assistant recorder database (SQLite).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Path to `home-assistant_v2.db`.
    pub path: PathBuf,
}

/// InfluxDB v2 destination.
#[derive(Clone, Serialize, Deserialize)]
pub struct DestinationConfig {
    /// Server URL (e.g. `http://localhost:8086`).
    pub url: String,
    /// API token with read/write access to the bucket.
    pub token: String,
    /// Organization name.
    pub org: String,
    /// Bucket receiving the points.
    pub bucket: String,
}

impl fmt::Debug for DestinationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DestinationConfig")
            .field("url", &self.url)
            .field("token", &"<redacted>")
            .field("org", &self.org)
            .field("bucket", &self.bucket)
            .finish()
    }
}

/// Migration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationOptions {
    /// Rows fetched, converted and written together.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Dry run mode (convert everything, write nothing).
    #[serde(default)]
    pub dry_run: bool,
    /// Drop rows whose state is one of `unavailable_states`.
    #[serde(default = "default_true")]
    pub skip_unavailable: bool,
    /// Sentinel states meaning "no reading".
    #[serde(default = "default_unavailable_states")]
    pub unavailable_states: Vec<String>,
    /// Measurement whose earliest point is the resume watermark.
    #[serde(default = "default_watermark_measurement")]
    pub watermark_measurement: String,
    /// Value of the `source` tag on every point.
    #[serde(default = "default_source_tag")]
    pub source_tag: String,
    /// Measurement used when a row has no `unit_of_measurement`.
    #[serde(default = "default_measurement")]
    pub default_measurement: String,
    /// `friendly_name` used when neither the attribute nor a short name exists.
    #[serde(default = "default_friendly_name")]
    pub default_friendly_name: String,
    /// Attributes never written as fields.
    #[serde(default = "default_ignored_attributes")]
    pub ignored_attributes: Vec<String>,
    /// Attributes always written as float fields.
    #[serde(default = "default_numeric_attributes")]
    pub numeric_attributes: Vec<String>,
    /// Field naming policy.
    #[serde(default)]
    pub naming: FieldNaming,
    /// Retries for target store calls on transient errors.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Show a progress bar.
    #[serde(default = "default_true")]
    pub progress: bool,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            dry_run: false,
            skip_unavailable: true,
            unavailable_states: default_unavailable_states(),
            watermark_measurement: default_watermark_measurement(),
            source_tag: default_source_tag(),
            default_measurement: default_measurement(),
            default_friendly_name: default_friendly_name(),
            ignored_attributes: default_ignored_attributes(),
            numeric_attributes: default_numeric_attributes(),
            naming: FieldNaming::default(),
            max_retries: default_max_retries(),
            progress: true,
        }
    }
}

fn default_batch_size() -> usize {
    10_000
}

fn default_true() -> bool {
    true
}

fn default_unavailable_states() -> Vec<String> {
    vec!["unknown".to_string(), "unavailable".to_string()]
}

fn default_watermark_measurement() -> String {
    "units".to_string()
}

fn default_source_tag() -> String {
    "HA".to_string()
}

fn default_measurement() -> String {
    "default_measurement".to_string()
}

fn default_friendly_name() -> String {
    "unnamed".to_string()
}

fn default_ignored_attributes() -> Vec<String> {
    vec![
        "id".to_string(),
        "id_str".to_string(),
        "update_available".to_string(),
    ]
}

fn default_numeric_attributes() -> Vec<String> {
    vec!["temperature".to_string(), "humidity".to_string()]
}

fn default_max_retries() -> u32 {
    3
}

/// Loose settings gathered from CLI flags and environment variables.
///
/// Every connection value is optional here; [`ConnectionSettings::into_config`]
/// turns a missing one into a startup error.
#[derive(Debug, Clone, Default)]
pub struct ConnectionSettings {
    /// `SQLITE_DB`
    pub sqlite_db: Option<PathBuf>,
    /// `INFLUXDB_URL`
    pub influx_url: Option<String>,
    /// `INFLUXDB_TOKEN`
    pub influx_token: Option<String>,
    /// `INFLUXDB_ORG`
    pub influx_org: Option<String>,
    /// `INFLUXDB_BUCKET`
    pub influx_bucket: Option<String>,
}

impl ConnectionSettings {
    /// Builds a configuration with default options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming every missing value.
    pub fn into_config(self) -> Result<MigrationConfig> {
        let mut missing = Vec::new();
        if self.sqlite_db.is_none() {
            missing.push("SQLITE_DB");
        }
        if self.influx_url.is_none() {
            missing.push("INFLUXDB_URL");
        }
        if self.influx_token.is_none() {
            missing.push("INFLUXDB_TOKEN");
        }
        if self.influx_org.is_none() {
            missing.push("INFLUXDB_ORG");
        }
        if self.influx_bucket.is_none() {
            missing.push("INFLUXDB_BUCKET");
        }

        match (
            self.sqlite_db,
            self.influx_url,
            self.influx_token,
            self.influx_org,
            self.influx_bucket,
        ) {
            (Some(path), Some(url), Some(token), Some(org), Some(bucket)) => Ok(MigrationConfig {
                source: SourceConfig { path },
                destination: DestinationConfig {
                    url,
                    token,
                    org,
                    bucket,
                },
                options: MigrationOptions::default(),
            }),
            _ => Err(Error::Config(format!(
                "missing required settings: {}",
                missing.join(", ")
            ))),
        }
    }
}

impl MigrationConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.source.path.as_os_str().is_empty() {
            return Err(Error::Config("source path cannot be empty".to_string()));
        }
        validate_url(&self.destination.url)?;
        for (name, value) in [
            ("token", &self.destination.token),
            ("org", &self.destination.org),
            ("bucket", &self.destination.bucket),
        ] {
            if value.trim().is_empty() {
                return Err(Error::Config(format!("destination {} cannot be empty", name)));
            }
        }
        if self.options.batch_size == 0 {
            return Err(Error::Config(
                "batch_size must be greater than 0".to_string(),
            ));
        }
        if self.options.default_measurement.is_empty() {
            return Err(Error::Config(
                "default_measurement cannot be empty".to_string(),
            ));
        }
        if self.options.watermark_measurement.is_empty() {
            return Err(Error::Config(
                "watermark_measurement cannot be empty".to_string(),
            ));
        }
        self.options.naming.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> MigrationConfig {
        MigrationConfig {
            source: SourceConfig {
                path: PathBuf::from("./home-assistant_v2.db"),
            },
            destination: DestinationConfig {
                url: "http://localhost:8086".to_string(),
                token: "secret-token".to_string(),
                org: "home".to_string(),
                bucket: "hass".to_string(),
            },
            options: MigrationOptions::default(),
        }
    }

    #[test]
    fn test_config_defaults() {
        let options = MigrationOptions::default();
        assert_eq!(options.batch_size, 10_000);
        assert!(options.skip_unavailable);
        assert!(!options.dry_run);
        assert_eq!(options.watermark_measurement, "units");
        assert_eq!(options.source_tag, "HA");
        assert_eq!(options.unavailable_states, vec!["unknown", "unavailable"]);
        assert!(options.ignored_attributes.contains(&"id_str".to_string()));
    }

    #[test]
    fn test_config_validate_ok() {
        assert!(test_config().validate().is_ok());
    }

    #[test]
    fn test_config_validate_batch_size() {
        let mut config = test_config();
        config.options.batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validate_empty_bucket() {
        let mut config = test_config();
        config.destination.bucket = "  ".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("bucket"));
    }

    #[test]
    fn test_config_validate_bad_url() {
        let mut config = test_config();
        config.destination.url = "localhost:8086".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_destination_debug_hides_token() {
        let config = test_config();
        let debug = format!("{:?}", config.destination);
        assert!(!debug.contains("secret-token"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_config_yaml_parse() {
        let yaml = r#"
source:
  path: /config/home-assistant_v2.db
destination:
  url: http://influxdb:8086
  token: abc
  org: home
  bucket: hass
options:
  batch_size: 500
  naming:
    numeric_state_field: state_float
    text_state_field: state_str
"#;
        let config: MigrationConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.options.batch_size, 500);
        assert_eq!(config.options.naming.numeric_state_field, "state_float");
        assert_eq!(config.options.naming.text_suffix, "_str");
        assert_eq!(config.options.default_measurement, "default_measurement");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_connection_settings_complete() {
        let settings = ConnectionSettings {
            sqlite_db: Some(PathBuf::from("ha.db")),
            influx_url: Some("http://localhost:8086".to_string()),
            influx_token: Some("t".to_string()),
            influx_org: Some("o".to_string()),
            influx_bucket: Some("b".to_string()),
        };
        let config = settings.into_config().unwrap();
        assert_eq!(config.destination.bucket, "b");
        assert_eq!(config.options.batch_size, 10_000);
    }

    #[test]
    fn test_connection_settings_missing_values() {
        let settings = ConnectionSettings {
            sqlite_db: Some(PathBuf::from("ha.db")),
            influx_url: Some("http://localhost:8086".to_string()),
            ..Default::default()
        };
        let err = settings.into_config().unwrap_err().to_string();
        assert!(err.contains("INFLUXDB_TOKEN"));
        assert!(err.contains("INFLUXDB_ORG"));
        assert!(err.contains("INFLUXDB_BUCKET"));
        assert!(!err.contains("SQLITE_DB"));
    }
}
