use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;

use crate::definition::FormDefinition;
use crate::store::FieldStore;
use crate::validate::{ValidatorRegistry, validate_fields};
use crate::visibility::VisibilityMap;

/// Verdict of a forward-navigation attempt.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct GateResult {
    pub ok: bool,
    pub errors: BTreeMap<String, String>,
}

/// Validates `step_fields` against the live store. Hidden fields are exempt, even when empty.
///
/// Nothing is memoized: every call reflects the store at the moment of the attempt.
pub fn can_advance(
    definition: &FormDefinition,
    step_fields: &[String],
    store: &FieldStore,
    visibility: &VisibilityMap,
    registry: &ValidatorRegistry,
) -> GateResult {
    let result = validate_fields(definition, step_fields, store, visibility, registry);
    GateResult {
        ok: result.valid,
        errors: result.messages(),
    }
}

/// Current-step pointer of a multi-step wizard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WizardProgress {
    current: usize,
    step_count: usize,
}

impl WizardProgress {
    pub fn new(definition: &FormDefinition) -> Self {
        Self {
            current: 0,
            step_count: definition.steps().len(),
        }
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn step_count(&self) -> usize {
        self.step_count
    }

    pub fn is_last_step(&self) -> bool {
        self.current + 1 >= self.step_count
    }

    /// Validates the current step and moves forward when it passes. The pointer never moves past
    /// the last step.
    pub fn next(
        &mut self,
        definition: &FormDefinition,
        store: &FieldStore,
        visibility: &VisibilityMap,
        registry: &ValidatorRegistry,
    ) -> GateResult {
        let fields = definition
            .steps()
            .get(self.current)
            .map(|step| step.fields.as_slice())
            .unwrap_or_default();
        let result = can_advance(definition, fields, store, visibility, registry);
        if result.ok && !self.is_last_step() {
            self.current += 1;
        } else if !result.ok {
            debug!(
                step = self.current,
                errors = result.errors.len(),
                "step validation blocked navigation"
            );
        }
        result
    }

    /// Moves one step back. Never validated.
    pub fn back(&mut self) -> bool {
        if self.current == 0 {
            return false;
        }
        self.current -= 1;
        true
    }

    /// Jumps to an earlier (or the current) step.
    pub fn jump_to(&mut self, index: usize) -> bool {
        if index > self.current {
            return false;
        }
        self.current = index;
        true
    }
}
