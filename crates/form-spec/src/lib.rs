#![allow(missing_docs)]

pub mod answers;
pub mod assemble;
pub mod definition;
pub mod gate;
pub mod list;
pub mod rules;
pub mod schema;
pub mod spec;
pub mod store;
pub mod validate;
pub mod visibility;

pub use answers::{ValidationError, ValidationResult};
pub use assemble::{
    AssemblySpec, ListOutput, OutputMapping, SubmissionAssemblyError, assemble, normalize_pointer,
};
pub use definition::{FormDefinition, FormDefinitionError};
pub use gate::{GateResult, WizardProgress, can_advance};
pub use list::{ListEntry, WorkingList, dedup_ordered, entries_from_value, normalize_entry};
pub use rules::{RuleRegistrationError, RuleSet};
pub use schema::{assembly_schema, form_schema};
pub use spec::{
    Effect, FieldCheck, FieldKind, FieldSpec, FormSpec, HiddenPolicy, Operator, Rule, StepSpec,
};
pub use store::{
    DiscardReason, Field, FieldEvent, FieldStore, Origin, StoreError, SubscriptionId, WriteOutcome,
    WriteStamp,
};
pub use validate::{
    Validator, ValidatorRegistry, is_empty_value, validate_fields, validate_value,
};
pub use visibility::{
    FieldVisibility, VisibilityCache, VisibilityMap, is_visible, resolve_visibility,
};
