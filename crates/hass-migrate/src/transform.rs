//! Row to point conversion.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, warn};

use crate::attributes::{self, ParsedAttributes};
use crate::config::MigrationOptions;
use crate::connectors::{SourceRecord, SourceValue};
use crate::point::{classify, classify_str, DataPoint, FieldValue};

/// Why a row produced no point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SkipReason {
    /// State is a sentinel such as `unavailable`.
    Unavailable,
    /// State column is NULL.
    MissingState,
    /// Update time is not a usable epoch.
    InvalidTimestamp,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unavailable => "unavailable",
            Self::MissingState => "missing_state",
            Self::InvalidTimestamp => "invalid_timestamp",
        })
    }
}

/// A field left out of an otherwise good point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldWarning {
    /// A numeric-only attribute held something that is not a number.
    Conversion {
        /// Attribute name.
        attribute: String,
    },
    /// The attribute would have landed on a state field name.
    ReservedName {
        /// Attribute name.
        attribute: String,
    },
    /// Another attribute of the same row produced the same field name.
    NameCollision {
        /// Attribute whose value was dropped.
        attribute: String,
        /// Field name both attributes mapped to.
        field: String,
    },
}

/// A converted row.
#[derive(Debug, Clone, PartialEq)]
pub struct Built {
    /// The point.
    pub point: DataPoint,
    /// Fields dropped along the way.
    pub warnings: Vec<FieldWarning>,
}

/// Result of [`PointBuilder::convert`].
#[derive(Debug, Clone, PartialEq)]
pub struct Conversion {
    /// The point, or why there is none.
    pub outcome: Result<Built, SkipReason>,
    /// The row carried an attribute blob that could not be parsed.
    pub malformed_attributes: bool,
}

/// Turns recorder rows into points, applying one naming policy to all rows.
pub struct PointBuilder<'a> {
    options: &'a MigrationOptions,
}

impl<'a> PointBuilder<'a> {
    /// Creates a builder over validated options.
    #[must_use]
    pub fn new(options: &'a MigrationOptions) -> Self {
        Self { options }
    }

    /// Parses the attribute blob and builds the point.
    ///
    /// Sentinel states are rejected before the blob is parsed.
    #[must_use]
    pub fn convert(&self, record: &SourceRecord) -> Conversion {
        if let Err(reason) = self.check_state(&record.state) {
            return Conversion {
                outcome: Err(reason),
                malformed_attributes: false,
            };
        }
        let attrs = attributes::parse(record.attributes.as_deref(), &record.entity_id);
        Conversion {
            outcome: self.build(record, &attrs),
            malformed_attributes: attrs.malformed,
        }
    }

    /// Builds the point for a row and its parsed attributes.
    ///
    /// # Errors
    ///
    /// Returns the [`SkipReason`] when the row must not be written.
    pub fn build(&self, record: &SourceRecord, attrs: &ParsedAttributes) -> Result<Built, SkipReason> {
        let state = self.check_state(&record.state)?;

        let Some(timestamp) = to_instant(&record.updated_at) else {
            warn!(
                entity_id = %record.entity_id,
                row_id = record.row_id,
                updated_at = ?record.updated_at,
                "skipping row with unusable timestamp"
            );
            return Err(SkipReason::InvalidTimestamp);
        };

        let (domain, short_name) = record
            .entity_id
            .split_once('.')
            .unwrap_or((record.entity_id.as_str(), ""));

        let friendly_name = attrs.text("friendly_name").unwrap_or_else(|| {
            if short_name.is_empty() {
                self.options.default_friendly_name.clone()
            } else {
                short_name.to_string()
            }
        });
        let measurement = attrs
            .text("unit_of_measurement")
            .unwrap_or_else(|| self.options.default_measurement.clone());

        let mut tags = BTreeMap::new();
        for (key, value) in [
            ("source", self.options.source_tag.as_str()),
            ("domain", domain),
            ("entity_id", short_name),
            ("friendly_name", friendly_name.as_str()),
        ] {
            if !value.is_empty() {
                tags.insert(key.to_string(), value.to_string());
            }
        }

        let naming = &self.options.naming;
        let mut fields = BTreeMap::new();
        fields.insert(naming.state_field(&state).to_string(), state);

        let mut warnings = Vec::new();
        // Field name -> attribute it was taken from.
        let mut sources: BTreeMap<String, &str> = BTreeMap::new();
        for (key, raw) in &attrs.set {
            if self.options.ignored_attributes.iter().any(|k| k == key) {
                continue;
            }
            let Some(mut value) = classify(raw) else {
                continue;
            };
            if self.options.numeric_attributes.iter().any(|k| k == key) {
                match coerce_float(value) {
                    Some(f) => value = FieldValue::Float(f),
                    None => {
                        warn!(
                            entity_id = %record.entity_id,
                            attribute = %key,
                            value = %raw,
                            "skipping non-numeric value of numeric attribute"
                        );
                        warnings.push(FieldWarning::Conversion {
                            attribute: key.clone(),
                        });
                        continue;
                    }
                }
            }
            match naming.attribute_field(key, value) {
                Some((name, value)) => {
                    // A key spelled exactly like the field wins over one that
                    // was suffixed into it.
                    let dropped = sources.get(name.as_str()).map(|&owner| {
                        if key.as_str() == name {
                            owner
                        } else {
                            key.as_str()
                        }
                    });
                    if let Some(dropped) = dropped {
                        warn!(
                            entity_id = %record.entity_id,
                            attribute = %dropped,
                            field = %name,
                            "two attributes map to the same field, dropping one"
                        );
                        warnings.push(FieldWarning::NameCollision {
                            attribute: dropped.to_string(),
                            field: name.clone(),
                        });
                        if dropped == key.as_str() {
                            continue;
                        }
                    }
                    sources.insert(name.clone(), key.as_str());
                    fields.insert(name, value);
                }
                None => {
                    debug!(
                        entity_id = %record.entity_id,
                        attribute = %key,
                        "attribute name reserved for the state field, dropped"
                    );
                    warnings.push(FieldWarning::ReservedName {
                        attribute: key.clone(),
                    });
                }
            }
        }

        Ok(Built {
            point: DataPoint {
                measurement,
                tags,
                fields,
                timestamp,
            },
            warnings,
        })
    }

    fn check_state(&self, state: &SourceValue) -> Result<FieldValue, SkipReason> {
        match state {
            SourceValue::Null => Err(SkipReason::MissingState),
            SourceValue::Text(s)
                if self.options.skip_unavailable
                    && self.options.unavailable_states.iter().any(|u| u == s) =>
            {
                Err(SkipReason::Unavailable)
            }
            SourceValue::Text(s) => Ok(classify_str(s)),
            SourceValue::Integer(i) => Ok(FieldValue::Float(*i as f64)),
            SourceValue::Real(f) if f.is_finite() => Ok(FieldValue::Float(*f)),
            SourceValue::Real(f) => Ok(FieldValue::Text(f.to_string())),
        }
    }
}

fn coerce_float(value: FieldValue) -> Option<f64> {
    match value {
        FieldValue::Float(f) => Some(f),
        FieldValue::Text(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
    }
}

/// Epoch seconds to an instant the target store can represent.
#[must_use]
pub fn to_instant(value: &SourceValue) -> Option<DateTime<Utc>> {
    let secs = match value {
        SourceValue::Integer(i) => *i as f64,
        SourceValue::Real(f) => *f,
        SourceValue::Text(s) => s.trim().parse::<f64>().ok()?,
        SourceValue::Null => return None,
    };
    if !secs.is_finite() {
        return None;
    }
    let micros = (secs * 1_000_000.0).round();
    if micros.abs() >= i64::MAX as f64 {
        return None;
    }
    let instant = DateTime::from_timestamp_micros(micros as i64)?;
    // Line protocol carries nanoseconds in an i64.
    instant.timestamp_nanos_opt()?;
    Some(instant)
}
