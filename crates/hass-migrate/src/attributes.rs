//! Recorder attribute blob parsing.

use serde_json::{Map, Value};
use tracing::{debug, warn};

/// Attribute name to raw JSON value. Nested values stay opaque.
pub type AttributeSet = Map<String, Value>;

/// Outcome of parsing one blob.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedAttributes {
    /// Parsed attributes (empty on any failure).
    pub set: AttributeSet,
    /// True when a blob was present but was not a JSON object.
    pub malformed: bool,
}

impl ParsedAttributes {
    /// String-ish attribute lookup. Scalars are rendered as text, empty
    /// strings count as missing.
    #[must_use]
    pub fn text(&self, key: &str) -> Option<String> {
        match self.set.get(key)? {
            Value::String(s) if s.is_empty() => None,
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }
}

/// Parses a `shared_attrs` blob.
///
/// Never fails: missing, blank or malformed input yields an empty set.
/// `entity_id` is only used for log context.
#[must_use]
pub fn parse(blob: Option<&str>, entity_id: &str) -> ParsedAttributes {
    let Some(raw) = blob else {
        debug!(entity_id, "no attributes");
        return ParsedAttributes::default();
    };
    if raw.trim().is_empty() {
        debug!(entity_id, "empty attributes blob");
        return ParsedAttributes::default();
    }

    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(set)) => ParsedAttributes {
            set,
            malformed: false,
        },
        Ok(other) => {
            warn!(
                entity_id,
                kind = json_kind(&other),
                "attributes blob is not a JSON object, ignoring"
            );
            ParsedAttributes {
                set: AttributeSet::new(),
                malformed: true,
            }
        }
        Err(e) => {
            warn!(entity_id, error = %e, "failed to parse attributes");
            ParsedAttributes {
                set: AttributeSet::new(),
                malformed: true,
            }
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::String(_) => "string",
        Value::Number(_) => "number",
        Value::Bool(_) => "boolean",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
        Value::Null => "null",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_object() {
        let parsed = parse(
            Some(r#"{"friendly_name":"Temp 1","unit_of_measurement":"°C","attribution":null}"#),
            "sensor.temp1",
        );
        assert!(!parsed.malformed);
        assert_eq!(parsed.set.len(), 3);
        assert_eq!(parsed.text("friendly_name").as_deref(), Some("Temp 1"));
        assert_eq!(parsed.text("unit_of_measurement").as_deref(), Some("°C"));
        assert_eq!(parsed.text("attribution"), None);
    }

    #[test]
    fn test_parse_none_is_not_malformed() {
        let parsed = parse(None, "sensor.x");
        assert!(parsed.set.is_empty());
        assert!(!parsed.malformed);
    }

    #[test]
    fn test_parse_not_json() {
        let parsed = parse(Some("not json"), "sensor.x");
        assert!(parsed.set.is_empty());
        assert!(parsed.malformed);
    }

    #[test]
    fn test_parse_non_object_json() {
        for blob in ["[1,2,3]", "\"text\"", "42", "null"] {
            let parsed = parse(Some(blob), "sensor.x");
            assert!(parsed.set.is_empty(), "{blob}");
            assert!(parsed.malformed, "{blob}");
        }
    }

    #[test]
    fn test_parse_blank() {
        let parsed = parse(Some("   "), "sensor.x");
        assert!(parsed.set.is_empty());
        assert!(!parsed.malformed);
    }

    #[test]
    fn test_nested_values_kept_opaque() {
        let parsed = parse(
            Some(r#"{"options":["a","b"],"color":{"r":1}}"#),
            "select.mode",
        );
        assert_eq!(parsed.set.get("options"), Some(&json!(["a", "b"])));
        assert_eq!(parsed.text("options"), None);
        assert_eq!(parsed.set.get("color"), Some(&json!({"r": 1})));
    }

    #[test]
    fn test_text_renders_scalars_and_skips_empty() {
        let parsed = parse(Some(r#"{"a":12,"b":true,"c":""}"#), "sensor.x");
        assert_eq!(parsed.text("a").as_deref(), Some("12"));
        assert_eq!(parsed.text("b").as_deref(), Some("true"));
        assert_eq!(parsed.text("c"), None);
        assert_eq!(parsed.text("missing"), None);
    }
}
