//! Time-series points and value classification.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;

/// A typed field value.
///
/// Every state and attribute goes through [`classify`] (or [`classify_str`])
/// so the numeric-vs-text decision is made in exactly one place.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Numeric reading, always finite.
    Float(f64),
    /// Anything that is not a plain decimal number.
    Text(String),
}

impl FieldValue {
    /// Returns true for [`FieldValue::Float`].
    #[must_use]
    pub fn is_float(&self) -> bool {
        matches!(self, Self::Float(_))
    }

    /// Converts the value into its text form.
    #[must_use]
    pub fn into_text(self) -> Self {
        match self {
            Self::Float(f) => Self::Text(f.to_string()),
            text @ Self::Text(_) => text,
        }
    }
}

/// One point destined for the target store.
#[derive(Debug, Clone, PartialEq)]
pub struct DataPoint {
    /// Series family (the unit of measurement).
    pub measurement: String,
    /// Indexed dimensions, kept sorted by key.
    pub tags: BTreeMap<String, String>,
    /// Payload, kept sorted by field name.
    pub fields: BTreeMap<String, FieldValue>,
    /// Point time.
    pub timestamp: DateTime<Utc>,
}

/// Returns true if `s` is an optionally negative decimal number: ASCII
/// digits with at most one `.` and at least one digit.
#[must_use]
pub fn is_decimal(s: &str) -> bool {
    let digits = s.strip_prefix('-').unwrap_or(s);
    let mut seen_digit = false;
    let mut seen_dot = false;
    for c in digits.chars() {
        match c {
            '0'..='9' => seen_digit = true,
            '.' if !seen_dot => seen_dot = true,
            _ => return false,
        }
    }
    seen_digit
}

/// Classifies a text value.
#[must_use]
pub fn classify_str(s: &str) -> FieldValue {
    if is_decimal(s) {
        if let Ok(f) = s.parse::<f64>() {
            if f.is_finite() {
                return FieldValue::Float(f);
            }
        }
    }
    FieldValue::Text(s.to_string())
}

/// Classifies a JSON attribute value. `null` has no field value.
///
/// Booleans, arrays and objects are opaque and become their JSON text.
#[must_use]
pub fn classify(value: &Value) -> Option<FieldValue> {
    match value {
        Value::Null => None,
        Value::Number(n) => Some(match n.as_f64() {
            Some(f) if f.is_finite() => FieldValue::Float(f),
            _ => FieldValue::Text(n.to_string()),
        }),
        Value::String(s) => Some(classify_str(s)),
        other => Some(FieldValue::Text(other.to_string())),
    }
}
