use std::collections::BTreeMap;

use regex::Regex;
use thiserror::Error;

use crate::rules::{RuleRegistrationError, RuleSet};
use crate::spec::field::{FieldCheck, FieldSpec};
use crate::spec::form::{FormSpec, StepSpec};
use crate::store::FieldStore;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FormDefinitionError {
    #[error("duplicate field '{0}'")]
    DuplicateField(String),
    #[error("step #{step} references unknown field '{field}'")]
    UnknownStepField { step: usize, field: String },
    #[error("check on '{field}' references unknown field '{other}'")]
    UnknownCheckField { field: String, other: String },
    #[error("pattern check on '{field}' does not compile: {reason}")]
    InvalidPattern { field: String, reason: String },
    #[error(transparent)]
    Rule(#[from] RuleRegistrationError),
}

/// A form spec whose rules and references have been checked at construction time.
#[derive(Debug, Clone)]
pub struct FormDefinition {
    spec: FormSpec,
    rules: RuleSet,
    index: BTreeMap<String, usize>,
    patterns: BTreeMap<String, Regex>,
}

impl FormDefinition {
    pub fn new(spec: FormSpec) -> Result<Self, FormDefinitionError> {
        let mut index = BTreeMap::new();
        for (idx, field) in spec.fields.iter().enumerate() {
            if index.insert(field.name.clone(), idx).is_some() {
                return Err(FormDefinitionError::DuplicateField(field.name.clone()));
            }
        }

        let mut patterns = BTreeMap::new();
        for field in &spec.fields {
            for check in &field.checks {
                match check {
                    FieldCheck::MatchesField { field: other, .. } if !index.contains_key(other) => {
                        return Err(FormDefinitionError::UnknownCheckField {
                            field: field.name.clone(),
                            other: other.clone(),
                        });
                    }
                    FieldCheck::Pattern { pattern, .. } if !patterns.contains_key(pattern) => {
                        let regex = Regex::new(pattern).map_err(|err| {
                            FormDefinitionError::InvalidPattern {
                                field: field.name.clone(),
                                reason: err.to_string(),
                            }
                        })?;
                        patterns.insert(pattern.clone(), regex);
                    }
                    _ => {}
                }
            }
        }

        for (step, spec_step) in spec.steps.iter().enumerate() {
            if let Some(field) = spec_step
                .fields
                .iter()
                .find(|field| !index.contains_key(*field))
            {
                return Err(FormDefinitionError::UnknownStepField {
                    step,
                    field: field.clone(),
                });
            }
        }

        let mut rules = RuleSet::new(spec.fields.iter().map(|field| field.name.clone()));
        for rule in &spec.rules {
            rules.register(rule.clone())?;
        }

        Ok(Self {
            spec,
            rules,
            index,
            patterns,
        })
    }

    pub fn id(&self) -> &str {
        &self.spec.id
    }

    pub fn spec(&self) -> &FormSpec {
        &self.spec
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Fields in declaration order.
    pub fn fields(&self) -> &[FieldSpec] {
        &self.spec.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.index_of(name).map(|idx| &self.spec.fields[idx])
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Compiled regex of a declared pattern check.
    pub fn pattern(&self, pattern: &str) -> Option<&Regex> {
        self.patterns.get(pattern)
    }

    pub fn steps(&self) -> &[StepSpec] {
        &self.spec.steps
    }

    /// Fresh store holding every declared field at its initial value.
    pub fn new_store(&self) -> FieldStore {
        FieldStore::from_spec(&self.spec)
    }
}
