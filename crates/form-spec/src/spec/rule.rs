use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Comparison applied to the source field's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
}

/// What a matching rule does to its dependent field. The inverse applies when it does not match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Effect {
    Show,
    Hide,
    Require,
    Optional,
}

impl Effect {
    pub fn is_visibility(self) -> bool {
        matches!(self, Effect::Show | Effect::Hide)
    }
}

/// Conditional visibility/requiredness rule linking two fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Rule {
    pub dependent: String,
    pub source: String,
    pub operator: Operator,
    #[serde(default)]
    pub value: Value,
    pub effect: Effect,
}

impl Rule {
    pub fn new(
        dependent: impl Into<String>,
        source: impl Into<String>,
        operator: Operator,
        value: Value,
        effect: Effect,
    ) -> Self {
        Self {
            dependent: dependent.into(),
            source: source.into(),
            operator,
            value,
            effect,
        }
    }
}
