use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::definition::FormDefinition;
use crate::spec::rule::Effect;
use crate::store::FieldStore;

/// Derived visible/required state of one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FieldVisibility {
    pub visible: bool,
    pub required: bool,
}

impl FieldVisibility {
    /// Required and currently shown.
    pub fn is_mandatory(&self) -> bool {
        self.visible && self.required
    }
}

pub type VisibilityMap = BTreeMap<String, FieldVisibility>;

/// Visibility of `field` in `map`; fields without an entry count as visible.
pub fn is_visible(map: &VisibilityMap, field: &str) -> bool {
    map.get(field).is_none_or(|state| state.visible)
}

/// Computes visibility and requiredness for every declared field.
///
/// Fields are resolved in declaration order, so a rule's source is always settled before its
/// dependent. A hidden source contributes no value: its rules see `null`. Multiple rules combine
/// with logical AND per concern (visibility, requiredness).
pub fn resolve_visibility(definition: &FormDefinition, store: &FieldStore) -> VisibilityMap {
    let mut map = VisibilityMap::new();

    for field in definition.fields() {
        let mut visible = true;
        let mut required_by_rules: Option<bool> = None;

        for rule in definition.rules().rules_for(&field.name) {
            let source_value = if is_visible(&map, &rule.source) {
                store.get(&rule.source).unwrap_or(&Value::Null)
            } else {
                &Value::Null
            };
            let matched = rule.operator.matches(source_value, &rule.value);
            let outcome = match rule.effect {
                Effect::Show | Effect::Require => matched,
                Effect::Hide | Effect::Optional => !matched,
            };
            if rule.effect.is_visibility() {
                visible &= outcome;
            } else {
                required_by_rules = Some(required_by_rules.unwrap_or(true) && outcome);
            }
        }

        map.insert(
            field.name.clone(),
            FieldVisibility {
                visible,
                required: required_by_rules.unwrap_or(field.required),
            },
        );
    }

    map
}

/// Memoized visibility, invalidated whenever the store revision moves.
#[derive(Debug, Clone, Default)]
pub struct VisibilityCache {
    revision: Option<u64>,
    map: VisibilityMap,
}

impl VisibilityCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&mut self, definition: &FormDefinition, store: &FieldStore) -> &VisibilityMap {
        if self.revision != Some(store.revision()) {
            self.map = resolve_visibility(definition, store);
            self.revision = Some(store.revision());
        }
        &self.map
    }

    pub fn invalidate(&mut self) {
        self.revision = None;
    }
}
