use std::time::Duration;

use form_spec::normalize_pointer;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_DEBOUNCE_MS: u64 = 500;

/// Field fed by a category, and where its value sits in the fetched payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuggestionTarget {
    pub field: String,
    /// Dotted path or JSON pointer into the payload. Defaults to the field name; an empty string
    /// selects the whole payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pointer: Option<String>,
}

impl SuggestionTarget {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            pointer: None,
        }
    }

    pub fn at(field: impl Into<String>, pointer: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            pointer: Some(pointer.into()),
        }
    }

    /// Value for this target in `payload`, if present.
    pub fn extract(&self, payload: &Value) -> Option<Value> {
        match self.pointer.as_deref().map(str::trim) {
            Some("") => Some(payload.clone()),
            Some(pointer) => payload.pointer(&normalize_pointer(pointer)).cloned(),
            None => payload.get(&self.field).cloned(),
        }
    }
}

/// A driver set: the fields that trigger a fetch and the fields the fetch fills.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategorySpec {
    pub name: String,
    pub drivers: Vec<String>,
    pub targets: Vec<SuggestionTarget>,
    /// Breaks ties between categories writing the same field. Defaults to the driver count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u32>,
    /// Overrides the synchronizer-wide debounce window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debounce_ms: Option<u64>,
}

impl CategorySpec {
    pub fn new<D, T>(name: impl Into<String>, drivers: D, targets: T) -> Self
    where
        D: IntoIterator,
        D::Item: Into<String>,
        T: IntoIterator<Item = SuggestionTarget>,
    {
        Self {
            name: name.into(),
            drivers: drivers.into_iter().map(Into::into).collect(),
            targets: targets.into_iter().collect(),
            priority: None,
            debounce_ms: None,
        }
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_debounce_ms(mut self, debounce_ms: u64) -> Self {
        self.debounce_ms = Some(debounce_ms);
        self
    }

    pub fn priority(&self) -> u32 {
        self.priority
            .unwrap_or_else(|| u32::try_from(self.drivers.len()).unwrap_or(u32::MAX))
    }

    pub fn is_driven_by(&self, field: &str) -> bool {
        self.drivers.iter().any(|driver| driver == field)
    }
}

/// Synchronizer-wide settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl SyncConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            event_capacity: default_event_capacity(),
        }
    }
}

fn default_debounce_ms() -> u64 {
    DEFAULT_DEBOUNCE_MS
}

fn default_event_capacity() -> usize {
    256
}
