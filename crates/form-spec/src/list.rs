use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::store::Origin;

/// Single entry of a working list, tagged with who added it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListEntry {
    pub value: String,
    pub origin: Origin,
    /// Field whose write produced the entry. `None` for entries added to the list directly.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Ordered list mixing user-added and suggestion-derived entries, e.g. departments.
///
/// Entries keep the order they were added in regardless of origin; duplicates are allowed in the
/// working state and removed by [`WorkingList::merged`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingList {
    entries: Vec<ListEntry>,
}

impl WorkingList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[ListEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Appends a user-added entry. Blank entries are ignored.
    pub fn push_manual(&mut self, value: &str) -> bool {
        let Some(value) = normalize_entry(value) else {
            return false;
        };
        self.entries.push(ListEntry {
            value: value.to_string(),
            origin: Origin::User,
            source: None,
        });
        true
    }

    /// Replaces the entries previously suggested through `source`.
    ///
    /// Suggested entries that are still present keep their position, stale ones are dropped and
    /// new ones are appended in the order given.
    pub fn replace_suggested(&mut self, source: &str, items: &[String]) {
        self.replace_from(Origin::Engine, source, items);
    }

    /// Replaces the entries the user wrote through the field `source`. Entries added to the list
    /// directly are kept.
    pub fn replace_manual(&mut self, source: &str, items: &[String]) {
        self.replace_from(Origin::User, source, items);
    }

    fn replace_from(&mut self, origin: Origin, source: &str, items: &[String]) {
        let wanted: Vec<&str> = items.iter().filter_map(|item| normalize_entry(item)).collect();
        self.entries.retain(|entry| {
            !is_from(entry, origin, source) || wanted.contains(&entry.value.as_str())
        });
        for item in wanted {
            let present = self
                .entries
                .iter()
                .any(|entry| is_from(entry, origin, source) && entry.value == item);
            if !present {
                self.entries.push(ListEntry {
                    value: item.to_string(),
                    origin,
                    source: Some(source.to_string()),
                });
            }
        }
    }

    /// Removes every entry equal to `value` after normalization, whatever its origin.
    pub fn remove(&mut self, value: &str) -> bool {
        let Some(value) = normalize_entry(value) else {
            return false;
        };
        let before = self.entries.len();
        self.entries.retain(|entry| entry.value != value);
        before != self.entries.len()
    }

    /// Deduplicated entries in insertion order, first occurrence kept.
    pub fn merged(&self) -> Vec<String> {
        dedup_ordered(self.entries.iter().map(|entry| entry.value.as_str()))
    }

    pub fn to_value(&self) -> Value {
        Value::Array(self.merged().into_iter().map(Value::String).collect())
    }
}

fn is_from(entry: &ListEntry, origin: Origin, source: &str) -> bool {
    entry.origin == origin && entry.source.as_deref() == Some(source)
}

/// Trims surrounding whitespace; blank entries normalize to `None`.
pub fn normalize_entry(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

/// Exact-match dedup over trimmed entries, preserving the first occurrence and its casing.
pub fn dedup_ordered<'a, I>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut out: Vec<String> = Vec::new();
    for item in items {
        if let Some(item) = normalize_entry(item)
            && !out.iter().any(|existing| existing == item)
        {
            out.push(item.to_string());
        }
    }
    out
}

/// Extracts list entries from a suggestion payload: strings, or objects carrying `name`/`label`.
pub fn entries_from_value(value: &Value) -> Vec<String> {
    let Some(items) = value.as_array() else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match item {
            Value::String(text) => Some(text.clone()),
            Value::Object(map) => map
                .get("name")
                .or_else(|| map.get("label"))
                .and_then(Value::as_str)
                .map(str::to_string),
            _ => None,
        })
        .collect()
}
