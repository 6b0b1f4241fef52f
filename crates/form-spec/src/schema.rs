use serde_json::Value;

use crate::assemble::AssemblySpec;
use crate::spec::form::FormSpec;

/// JSON Schema describing a form declaration.
pub fn form_schema() -> Value {
    serde_json::to_value(schemars::schema_for!(FormSpec)).unwrap_or_default()
}

/// JSON Schema describing a submission payload mapping.
pub fn assembly_schema() -> Value {
    serde_json::to_value(schemars::schema_for!(AssemblySpec)).unwrap_or_default()
}
