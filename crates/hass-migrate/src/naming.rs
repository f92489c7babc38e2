//! Field naming policy.
//!
//! InfluxDB fixes the type of a field the first time it is written to a
//! shard; writing the other type afterwards fails the whole batch. The policy
//! here makes every field name map to exactly one type:
//!
//! | name                    | type  |
//! |-------------------------|-------|
//! | `numeric_state_field`   | float |
//! | `text_state_field`      | text  |
//! | ends with `text_suffix` | text  |
//! | any other attribute     | float |
//!
//! Attributes that would land on either state field name are dropped.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::point::FieldValue;

/// Version of the naming rules below. Bump when the mapping changes, since
/// points written under different versions do not line up.
pub const POLICY_VERSION: u32 = 1;

/// Literal names used by the policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldNaming {
    /// Field holding a numeric state.
    pub numeric_state_field: String,
    /// Field holding a non-numeric state.
    pub text_state_field: String,
    /// Suffix marking text attribute fields.
    pub text_suffix: String,
}

impl Default for FieldNaming {
    fn default() -> Self {
        Self {
            numeric_state_field: "value".to_string(),
            text_state_field: "state".to_string(),
            text_suffix: "_str".to_string(),
        }
    }
}

impl FieldNaming {
    /// Checks that the literals keep names and types one-to-one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when two rules could produce the same name.
    pub fn validate(&self) -> Result<()> {
        if self.text_suffix.is_empty() {
            return Err(Error::Config("naming.text_suffix cannot be empty".to_string()));
        }
        if self.numeric_state_field.is_empty() || self.text_state_field.is_empty() {
            return Err(Error::Config(
                "naming state field names cannot be empty".to_string(),
            ));
        }
        if self.numeric_state_field == self.text_state_field {
            return Err(Error::Config(format!(
                "naming.numeric_state_field and naming.text_state_field are both '{}'",
                self.numeric_state_field
            )));
        }
        if self.numeric_state_field.ends_with(&self.text_suffix) {
            return Err(Error::Config(format!(
                "naming.numeric_state_field '{}' ends with the text suffix '{}'",
                self.numeric_state_field, self.text_suffix
            )));
        }
        Ok(())
    }

    /// Field name for a classified state.
    #[must_use]
    pub fn state_field(&self, value: &FieldValue) -> &str {
        match value {
            FieldValue::Float(_) => &self.numeric_state_field,
            FieldValue::Text(_) => &self.text_state_field,
        }
    }

    /// Field name and final value for an attribute, or `None` when the name
    /// is reserved for the state.
    #[must_use]
    pub fn attribute_field(&self, key: &str, value: FieldValue) -> Option<(String, FieldValue)> {
        let (name, value) = match value {
            FieldValue::Float(_) if key.ends_with(&self.text_suffix) => {
                (key.to_string(), value.into_text())
            }
            FieldValue::Float(_) => (key.to_string(), value),
            FieldValue::Text(_) if key.ends_with(&self.text_suffix) => (key.to_string(), value),
            FieldValue::Text(_) => (format!("{}{}", key, self.text_suffix), value),
        };

        if name == self.numeric_state_field || name == self.text_state_field {
            None
        } else {
            Some((name, value))
        }
    }
}
