use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Per-field validation failure surfaced next to the field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>, code: &str) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            code: Some(code.to_string()),
        }
    }
}

/// Outcome of validating a set of fields.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ValidationError>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_required: Vec<String>,
}

impl ValidationResult {
    /// First message per field, keyed by field name.
    pub fn messages(&self) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        for error in &self.errors {
            out.entry(error.field.clone())
                .or_insert_with(|| error.message.clone());
        }
        out
    }
}
