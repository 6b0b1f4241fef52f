use std::collections::BTreeMap;

use serde_json::Value;
use thiserror::Error;

use crate::spec::rule::{Operator, Rule};

/// Raised when a rule cannot be registered. Fatal for form construction.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RuleRegistrationError {
    #[error("rule for '{dependent}' references unknown field '{field}'")]
    UnknownField { dependent: String, field: String },
    #[error(
        "rule for '{dependent}' (#{dependent_index}) references '{source_field}' (#{source_index}); only earlier fields may be referenced"
    )]
    ForwardReference {
        dependent: String,
        dependent_index: usize,
        source_field: String,
        source_index: usize,
    },
}

/// Immutable-after-construction set of conditional rules keyed by dependent field.
///
/// Every registered rule references a field declared strictly before its dependent, so the set
/// is acyclic and evaluation in declaration order always sees resolved sources.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    index: BTreeMap<String, usize>,
    by_dependent: BTreeMap<String, Vec<Rule>>,
}

impl RuleSet {
    /// Creates an empty set over fields in declaration order.
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let index = fields
            .into_iter()
            .enumerate()
            .map(|(idx, name)| (name.into(), idx))
            .collect();
        Self {
            index,
            by_dependent: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, rule: Rule) -> Result<(), RuleRegistrationError> {
        let dependent_index = self.position(&rule.dependent, &rule.dependent)?;
        let source_index = self.position(&rule.dependent, &rule.source)?;
        if source_index >= dependent_index {
            return Err(RuleRegistrationError::ForwardReference {
                dependent: rule.dependent,
                dependent_index,
                source_field: rule.source,
                source_index,
            });
        }
        self.by_dependent
            .entry(rule.dependent.clone())
            .or_default()
            .push(rule);
        Ok(())
    }

    pub fn rules_for(&self, field: &str) -> &[Rule] {
        self.by_dependent
            .get(field)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.by_dependent.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_dependent.is_empty()
    }

    fn position(&self, dependent: &str, field: &str) -> Result<usize, RuleRegistrationError> {
        self.index
            .get(field)
            .copied()
            .ok_or_else(|| RuleRegistrationError::UnknownField {
                dependent: dependent.to_string(),
                field: field.to_string(),
            })
    }
}

impl Operator {
    /// Applies the operator to the source field value and the rule's comparison value.
    pub fn matches(self, source: &Value, expected: &Value) -> bool {
        match self {
            Operator::Equals => source == expected,
            Operator::NotEquals => source != expected,
            Operator::Contains => contains(source, expected),
            Operator::NotContains => !contains(source, expected),
        }
    }
}

fn contains(haystack: &Value, needle: &Value) -> bool {
    match haystack {
        Value::Array(items) => items.iter().any(|item| {
            item == needle
                || matches!((scalar_text(item), scalar_text(needle)), (Some(a), Some(b)) if a == b)
        }),
        Value::String(_) | Value::Number(_) | Value::Bool(_) => {
            match (scalar_text(haystack), scalar_text(needle)) {
                (Some(text), Some(fragment)) => text.contains(fragment.as_str()),
                _ => false,
            }
        }
        Value::Null | Value::Object(_) => false,
    }
}

/// Scalar values coerced to text for substring comparison.
fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}
