use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::answers::{ValidationError, ValidationResult};
use crate::definition::FormDefinition;
use crate::spec::field::{FieldCheck, FieldKind, FieldSpec};
use crate::store::FieldStore;
use crate::visibility::{VisibilityMap, is_visible};

static EMAIL: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").ok());

const DISPOSABLE_EMAIL_DOMAINS: &[&str] = &[
    "mailinator.com",
    "10minutemail.com",
    "tempmail.com",
    "yopmail.com",
    "guerrillamail.com",
    "trashmail.com",
    "dispostable.com",
    "fakeinbox.com",
    "getnada.com",
    "maildrop.cc",
];

/// Caller-supplied check. Returns an error message, or `None` when the value is acceptable.
pub trait Validator: Send + Sync {
    fn validate(&self, value: &Value, store: &FieldStore) -> Option<String>;
}

impl<F> Validator for F
where
    F: Fn(&Value, &FieldStore) -> Option<String> + Send + Sync,
{
    fn validate(&self, value: &Value, store: &FieldStore) -> Option<String> {
        self(value, store)
    }
}

/// Caller-supplied validators keyed by field name.
#[derive(Clone, Default)]
pub struct ValidatorRegistry {
    validators: BTreeMap<String, Vec<Arc<dyn Validator>>>,
}

impl ValidatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<V>(&mut self, field: impl Into<String>, validator: V)
    where
        V: Validator + 'static,
    {
        self.validators
            .entry(field.into())
            .or_default()
            .push(Arc::new(validator));
    }

    pub fn for_field(&self, field: &str) -> &[Arc<dyn Validator>] {
        self.validators
            .get(field)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

impl fmt::Debug for ValidatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: BTreeMap<&str, usize> = self
            .validators
            .iter()
            .map(|(field, list)| (field.as_str(), list.len()))
            .collect();
        f.debug_struct("ValidatorRegistry")
            .field("validators", &counts)
            .finish()
    }
}

/// Null, blank strings, and empty arrays/objects count as empty.
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(text) => text.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

/// Validates the named fields against the live store. Hidden fields are skipped entirely.
pub fn validate_fields(
    definition: &FormDefinition,
    names: &[String],
    store: &FieldStore,
    visibility: &VisibilityMap,
    registry: &ValidatorRegistry,
) -> ValidationResult {
    let mut errors = Vec::new();
    let mut missing_required = Vec::new();

    for name in names {
        if !is_visible(visibility, name) {
            continue;
        }
        let Some(field) = definition.field(name) else {
            continue;
        };
        let value = store.get(name).unwrap_or(&Value::Null);
        let required = visibility
            .get(name)
            .map_or(field.required, |state| state.required);

        if is_empty_value(value) {
            if required {
                missing_required.push(name.clone());
                errors.push(ValidationError::new(
                    name.as_str(),
                    "this field is required",
                    "required",
                ));
            }
            continue;
        }

        if let Some(error) = validate_value(definition, field, value, store, registry) {
            errors.push(error);
        }
    }

    ValidationResult {
        valid: errors.is_empty(),
        errors,
        missing_required,
    }
}

/// Type, choice, declarative and caller-supplied checks for a non-empty value.
pub fn validate_value(
    definition: &FormDefinition,
    field: &FieldSpec,
    value: &Value,
    store: &FieldStore,
    registry: &ValidatorRegistry,
) -> Option<ValidationError> {
    if !matches_kind(field.kind, value) {
        return Some(ValidationError::new(
            field.name.as_str(),
            "type mismatch",
            "type_mismatch",
        ));
    }

    if matches!(field.kind, FieldKind::Enum)
        && let Some(choices) = &field.choices
        && let Some(text) = value.as_str()
        && !choices.iter().any(|choice| choice == text)
    {
        return Some(ValidationError::new(
            field.name.as_str(),
            "invalid option",
            "enum_mismatch",
        ));
    }

    for check in &field.checks {
        if let Some(error) = run_check(definition, field, check, value, store) {
            return Some(error);
        }
    }

    registry
        .for_field(&field.name)
        .iter()
        .find_map(|validator| validator.validate(value, store))
        .map(|message| ValidationError {
            field: field.name.clone(),
            message,
            code: None,
        })
}

fn matches_kind(kind: FieldKind, value: &Value) -> bool {
    match kind {
        FieldKind::String | FieldKind::Enum => value.is_string(),
        FieldKind::Boolean => value.is_boolean(),
        FieldKind::Integer => value.is_i64() || value.is_u64(),
        FieldKind::Number => value.is_number(),
        FieldKind::List => value.is_array(),
    }
}

fn run_check(
    definition: &FormDefinition,
    field: &FieldSpec,
    check: &FieldCheck,
    value: &Value,
    store: &FieldStore,
) -> Option<ValidationError> {
    let fail = |message: &str, code: &str| Some(ValidationError::new(field.name.as_str(), message, code));

    match check {
        FieldCheck::Pattern { pattern, message } => {
            let text = value.as_str()?;
            let regex = definition.pattern(pattern)?;
            if regex.is_match(text) {
                None
            } else {
                fail(
                    message.as_deref().unwrap_or("value does not match pattern"),
                    "pattern_mismatch",
                )
            }
        }
        FieldCheck::MinLen { min } => {
            let len = text_len(value)?;
            if len < *min {
                fail(format!("must be at least {min} characters").as_str(), "min_length")
            } else {
                None
            }
        }
        FieldCheck::MaxLen { max } => {
            let len = text_len(value)?;
            if len > *max {
                fail(format!("must be at most {max} characters").as_str(), "max_length")
            } else {
                None
            }
        }
        FieldCheck::Min { min } => {
            let number = value.as_f64()?;
            if number < *min {
                fail("value below minimum", "min")
            } else {
                None
            }
        }
        FieldCheck::Max { max } => {
            let number = value.as_f64()?;
            if number > *max {
                fail("value above maximum", "max")
            } else {
                None
            }
        }
        FieldCheck::Email => {
            let text = value.as_str()?;
            let valid = EMAIL
                .as_ref()
                .is_some_and(|regex| regex.is_match(text.trim()));
            if valid {
                None
            } else {
                fail("invalid email address", "email")
            }
        }
        FieldCheck::NotDisposableEmail { domains } => {
            let text = value.as_str()?;
            let domain = text.rsplit_once('@')?.1.trim().to_lowercase();
            let blocked = if domains.is_empty() {
                DISPOSABLE_EMAIL_DOMAINS.contains(&domain.as_str())
            } else {
                domains.iter().any(|blocked| blocked.eq_ignore_ascii_case(&domain))
            };
            if blocked {
                fail("disposable email addresses are not allowed", "disposable_email")
            } else {
                None
            }
        }
        FieldCheck::PasswordStrength => {
            let text = value.as_str()?;
            if is_strong_password(text) {
                None
            } else {
                fail(
                    "password needs 8+ characters with upper and lower case letters, a digit and a symbol",
                    "weak_password",
                )
            }
        }
        FieldCheck::MatchesField { field: other, message } => {
            let other_value = store.get(other).unwrap_or(&Value::Null);
            if other_value == value {
                None
            } else {
                fail(
                    message.as_deref().unwrap_or("values do not match"),
                    "mismatch",
                )
            }
        }
    }
}

fn text_len(value: &Value) -> Option<usize> {
    match value {
        Value::String(text) => Some(text.chars().count()),
        Value::Array(items) => Some(items.len()),
        _ => None,
    }
}

fn is_strong_password(text: &str) -> bool {
    text.chars().count() >= 8
        && text.chars().any(|c| c.is_lowercase())
        && text.chars().any(|c| c.is_uppercase())
        && text.chars().any(|c| c.is_ascii_digit())
        && text.chars().any(|c| !c.is_alphanumeric() && !c.is_whitespace())
}
