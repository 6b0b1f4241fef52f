use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Supported field data types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    #[default]
    String,
    Boolean,
    Integer,
    Number,
    Enum,
    List,
}

impl FieldKind {
    /// Value a field of this kind holds before anything writes to it.
    pub fn empty_value(self) -> Value {
        match self {
            FieldKind::List => Value::Array(Vec::new()),
            _ => Value::Null,
        }
    }
}

/// What the submission payload carries for a field that is currently hidden.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum HiddenPolicy {
    #[default]
    Omit,
    Null,
}

/// Declarative checks run against a non-empty field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum FieldCheck {
    Pattern {
        pattern: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    MinLen {
        min: usize,
    },
    MaxLen {
        max: usize,
    },
    Min {
        min: f64,
    },
    Max {
        max: f64,
    },
    Email,
    NotDisposableEmail {
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        domains: Vec<String>,
    },
    PasswordStrength,
    MatchesField {
        field: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

/// Definition of a single form field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FieldSpec {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: FieldKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub choices: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub checks: Vec<FieldCheck>,
    /// Submit the value even while the field is hidden.
    #[serde(default)]
    pub always_submit: bool,
    #[serde(default)]
    pub when_hidden: HiddenPolicy,
    /// Name of the working list that engine writes to this field feed into.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_list: Option<String>,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            title: None,
            required: false,
            default: None,
            choices: None,
            checks: Vec::new(),
            always_submit: false,
            when_hidden: HiddenPolicy::Omit,
            working_list: None,
        }
    }

    /// Initial value on mount and after a reset with no suggestion to fall back to.
    pub fn initial_value(&self) -> Value {
        self.default
            .clone()
            .unwrap_or_else(|| self.kind.empty_value())
    }
}
