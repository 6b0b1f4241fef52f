pub mod field;
pub mod form;
pub mod rule;

pub use field::{FieldCheck, FieldKind, FieldSpec, HiddenPolicy};
pub use form::{FormSpec, StepSpec};
pub use rule::{Effect, Operator, Rule};
