use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::definition::FormDefinition;
use crate::spec::field::HiddenPolicy;
use crate::store::FieldStore;
use crate::validate::is_empty_value;
use crate::visibility::VisibilityMap;

/// Where a field lands in the submission payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct OutputMapping {
    pub field: String,
    /// Dotted path (`company.name`) or JSON pointer (`/company/name`). Defaults to the field name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Never submitted, e.g. a password confirmation.
    #[serde(default)]
    pub omit: bool,
}

/// Where a merged working list lands in the submission payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ListOutput {
    pub list: String,
    pub key: String,
}

/// Caller-defined payload shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AssemblySpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mappings: Vec<OutputMapping>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub lists: Vec<ListOutput>,
    /// Emit fields without a mapping under their own name.
    #[serde(default = "default_true")]
    pub include_unmapped: bool,
}

impl Default for AssemblySpec {
    fn default() -> Self {
        Self {
            mappings: Vec::new(),
            lists: Vec::new(),
            include_unmapped: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Submission aborted; nothing was assembled.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize)]
pub enum SubmissionAssemblyError {
    #[error("mandatory fields are empty: {}", .missing.join(", "))]
    MissingMandatory { missing: Vec<String> },
    #[error("invalid payload key '{key}' for '{field}'")]
    InvalidKey { field: String, key: String },
    #[error("payload key '{key}' for '{field}' collides with another output")]
    KeyConflict { field: String, key: String },
}

/// Builds the submission payload from the store at submit time.
///
/// Re-checks every mandatory-and-visible field regardless of earlier step validation. The output
/// is a pure function of store state and `spec`, so unchanged input yields identical bytes.
pub fn assemble(
    definition: &FormDefinition,
    spec: &AssemblySpec,
    store: &FieldStore,
    visibility: &VisibilityMap,
) -> Result<Value, SubmissionAssemblyError> {
    let missing: Vec<String> = definition
        .fields()
        .iter()
        .filter(|field| {
            visibility
                .get(&field.name)
                .is_some_and(|state| state.is_mandatory())
                && store.get(&field.name).is_none_or(is_empty_value)
        })
        .map(|field| field.name.clone())
        .collect();
    if !missing.is_empty() {
        return Err(SubmissionAssemblyError::MissingMandatory { missing });
    }

    let mappings: BTreeMap<&str, &OutputMapping> = spec
        .mappings
        .iter()
        .map(|mapping| (mapping.field.as_str(), mapping))
        .collect();

    let mut payload = Value::Object(Map::new());
    for field in definition.fields() {
        let mapping = mappings.get(field.name.as_str());
        if mapping.is_some_and(|mapping| mapping.omit) {
            continue;
        }
        let key = match mapping.and_then(|mapping| mapping.key.as_deref()) {
            Some(key) => key,
            None if mapping.is_some() || spec.include_unmapped => field.name.as_str(),
            None => continue,
        };

        let visible = visibility
            .get(&field.name)
            .is_none_or(|state| state.visible);
        let value = if visible || field.always_submit {
            store.get(&field.name).cloned().unwrap_or(Value::Null)
        } else {
            match field.when_hidden {
                HiddenPolicy::Omit => continue,
                HiddenPolicy::Null => Value::Null,
            }
        };

        set_path(&mut payload, &normalize_pointer(key), value)
            .map_err(|err| err.into_error(&field.name, key))?;
    }

    for output in &spec.lists {
        let merged = store
            .working_list(&output.list)
            .map(|list| list.to_value())
            .unwrap_or_else(|| Value::Array(Vec::new()));
        set_path(&mut payload, &normalize_pointer(&output.key), merged)
            .map_err(|err| err.into_error(&output.list, &output.key))?;
    }

    Ok(payload)
}

#[derive(Debug)]
enum PathError {
    Invalid,
    Conflict,
}

impl PathError {
    fn into_error(self, field: &str, key: &str) -> SubmissionAssemblyError {
        let (field, key) = (field.to_string(), key.to_string());
        match self {
            PathError::Invalid => SubmissionAssemblyError::InvalidKey { field, key },
            PathError::Conflict => SubmissionAssemblyError::KeyConflict { field, key },
        }
    }
}

/// Writes `value` at `pointer`, creating intermediate objects. Never overwrites an earlier output.
fn set_path(root: &mut Value, pointer: &str, value: Value) -> Result<(), PathError> {
    let segments = pointer
        .trim_start_matches('/')
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(decode_segment)
        .collect::<Vec<_>>();
    let Some((last, parents)) = segments.split_last() else {
        return Err(PathError::Invalid);
    };

    let mut current = root;
    for segment in parents {
        current = as_object(current)?
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    let parent = as_object(current)?;
    if parent.contains_key(last) {
        return Err(PathError::Conflict);
    }
    parent.insert(last.clone(), value);
    Ok(())
}

fn as_object(value: &mut Value) -> Result<&mut Map<String, Value>, PathError> {
    value.as_object_mut().ok_or(PathError::Conflict)
}

fn decode_segment(segment: &str) -> String {
    segment.replace("~1", "/").replace("~0", "~")
}

/// Turns a dotted path (`company.name`) into a JSON pointer; pointers pass through unchanged.
pub fn normalize_pointer(path: &str) -> String {
    let trimmed = path.trim();
    if trimmed.starts_with('/') {
        return trimmed.to_string();
    }
    let cleaned = trimmed
        .split('.')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>();
    format!("/{}", cleaned.join("/"))
}
