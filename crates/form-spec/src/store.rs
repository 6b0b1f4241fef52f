use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use crate::list::{WorkingList, entries_from_value};
use crate::spec::form::FormSpec;

/// Who is writing a field value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    User,
    Engine,
}

/// Logical issue-order timestamp carried by a suggestion write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteStamp {
    /// Position in the global issue order of suggestion requests.
    pub issued: u64,
    /// Declared priority of the category that produced the write.
    pub priority: u32,
}

impl WriteStamp {
    pub fn new(issued: u64, priority: u32) -> Self {
        Self { issued, priority }
    }

    /// Whether a write carrying `self` may replace the write that carried `applied`.
    ///
    /// Later issue wins, except that an earlier-issued write from a higher-priority category also
    /// wins. Equal issue numbers are decided by priority; a full tie lets the newer arrival through.
    pub fn supersedes(&self, applied: &WriteStamp) -> bool {
        if self.issued == applied.issued {
            return self.priority >= applied.priority;
        }
        self.issued > applied.issued || self.priority > applied.priority
    }
}

/// Why an engine write did not reach the stored value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DiscardReason {
    ManualOverride,
    Superseded {
        applied: WriteStamp,
        attempted: WriteStamp,
    },
}

/// Result of a write attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Applied,
    Discarded(DiscardReason),
}

impl WriteOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, WriteOutcome::Applied)
    }
}

/// Notification delivered to store subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldEvent {
    Changed {
        field: String,
        value: Value,
        origin: Origin,
    },
    WriteDiscarded {
        field: String,
        reason: DiscardReason,
    },
    Reset {
        field: String,
    },
    ListChanged {
        list: String,
    },
}

impl FieldEvent {
    /// Field (or working list) the event is about.
    pub fn field(&self) -> &str {
        match self {
            FieldEvent::Changed { field, .. }
            | FieldEvent::WriteDiscarded { field, .. }
            | FieldEvent::Reset { field } => field,
            FieldEvent::ListChanged { list } => list,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

type Callback = Box<dyn FnMut(&FieldEvent) + Send>;

struct Subscription {
    id: SubscriptionId,
    field: Option<String>,
    callback: Callback,
}

/// Errors raised by field store operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("unknown field '{0}'")]
    UnknownField(String),
}

/// Stored state of one field.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    value: Value,
    initial: Value,
    manually_edited: bool,
    last_suggested_value: Option<Value>,
    last_applied: Option<WriteStamp>,
    working_list: Option<String>,
}

impl Field {
    fn new(initial: Value, working_list: Option<String>) -> Self {
        Self {
            value: initial.clone(),
            initial,
            manually_edited: false,
            last_suggested_value: None,
            last_applied: None,
            working_list,
        }
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn manually_edited(&self) -> bool {
        self.manually_edited
    }

    pub fn last_suggested_value(&self) -> Option<&Value> {
        self.last_suggested_value.as_ref()
    }

    pub fn last_applied(&self) -> Option<WriteStamp> {
        self.last_applied
    }

    pub fn working_list(&self) -> Option<&str> {
        self.working_list.as_deref()
    }
}

/// Canonical record of field values and their manual-edit flags for one mounted form.
#[derive(Default)]
pub struct FieldStore {
    fields: BTreeMap<String, Field>,
    lists: BTreeMap<String, WorkingList>,
    revision: u64,
    discarded_writes: u64,
    subscribers: Vec<Subscription>,
    next_subscription: u64,
}

impl FieldStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares every field of `spec` with its initial value.
    pub fn from_spec(spec: &FormSpec) -> Self {
        let mut store = Self::new();
        for field in &spec.fields {
            store.declare_bound(&field.name, field.initial_value(), field.working_list.clone());
        }
        store
    }

    pub fn declare(&mut self, name: impl Into<String>, initial: Value) {
        let name = name.into();
        self.declare_bound(&name, initial, None);
    }

    fn declare_bound(&mut self, name: &str, initial: Value, working_list: Option<String>) {
        if let Some(list) = &working_list {
            self.lists.entry(list.clone()).or_default();
        }
        self.fields
            .insert(name.to_string(), Field::new(initial, working_list));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name).map(Field::value)
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.get(name)
    }

    pub fn is_manual(&self, name: &str) -> bool {
        self.fields
            .get(name)
            .is_some_and(|field| field.manually_edited)
    }

    /// Incremented on every accepted write, reset or list change.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Engine writes dropped because of a manual edit or a superseding suggestion.
    pub fn discarded_writes(&self) -> u64 {
        self.discarded_writes
    }

    /// Writes a value. User writes always land and mark the field as manually edited; engine
    /// writes are dropped while the field carries a manual edit.
    pub fn set(
        &mut self,
        name: &str,
        value: Value,
        origin: Origin,
    ) -> Result<WriteOutcome, StoreError> {
        match origin {
            Origin::User => self.write_user(name, value),
            Origin::Engine => self.write_engine(name, value, None),
        }
    }

    /// Engine write that also has to beat the field's last applied suggestion in issue order.
    pub fn set_suggested(
        &mut self,
        name: &str,
        value: Value,
        stamp: WriteStamp,
    ) -> Result<WriteOutcome, StoreError> {
        self.write_engine(name, value, Some(stamp))
    }

    /// Records a value reported by an external surface that cannot tell who produced it.
    ///
    /// A value equal to the engine's last suggestion on a field the user never touched is the
    /// engine's own write echoed back and leaves the manual flag alone.
    pub fn observe(&mut self, name: &str, value: Value) -> Result<Origin, StoreError> {
        let field = self
            .fields
            .get(name)
            .ok_or_else(|| StoreError::UnknownField(name.to_string()))?;
        let echo = !field.manually_edited
            && field.value == value
            && field.last_suggested_value.as_ref() == Some(&value);
        if echo {
            return Ok(Origin::Engine);
        }
        self.write_user(name, value)?;
        Ok(Origin::User)
    }

    /// Clears the manual flag and restores the last suggestion, or the initial value.
    pub fn reset(&mut self, name: &str) -> Result<(), StoreError> {
        let field = self
            .fields
            .get_mut(name)
            .ok_or_else(|| StoreError::UnknownField(name.to_string()))?;
        field.manually_edited = false;
        match field.last_suggested_value.clone() {
            Some(value) => field.value = value,
            None => {
                field.value = field.initial.clone();
                field.last_applied = None;
            }
        }
        let restored = field.value.clone();
        let binding = field.working_list.clone();
        self.revision += 1;
        self.emit(FieldEvent::Reset {
            field: name.to_string(),
        });
        if let Some(list) = binding {
            let working = self.lists.entry(list.clone()).or_default();
            working.replace_manual(name, &[]);
            working.replace_suggested(name, &entries_from_value(&restored));
            self.emit(FieldEvent::ListChanged { list });
        }
        Ok(())
    }

    /// Resets every field and empties every working list.
    pub fn reset_all(&mut self) {
        for field in self.fields.values_mut() {
            let working_list = field.working_list.take();
            *field = Field::new(field.initial.clone(), working_list);
        }
        for list in self.lists.values_mut() {
            *list = WorkingList::new();
        }
        self.revision += 1;
    }

    pub fn working_list(&self, list: &str) -> Option<&WorkingList> {
        self.lists.get(list)
    }

    /// Adds a user entry to a working list, creating the list on first use.
    pub fn add_list_entry(&mut self, list: &str, entry: &str) -> bool {
        let added = self
            .lists
            .entry(list.to_string())
            .or_default()
            .push_manual(entry);
        if added {
            self.revision += 1;
            self.emit(FieldEvent::ListChanged {
                list: list.to_string(),
            });
        }
        added
    }

    pub fn remove_list_entry(&mut self, list: &str, entry: &str) -> bool {
        let removed = self
            .lists
            .get_mut(list)
            .is_some_and(|working| working.remove(entry));
        if removed {
            self.revision += 1;
            self.emit(FieldEvent::ListChanged {
                list: list.to_string(),
            });
        }
        removed
    }

    pub fn subscribe<F>(&mut self, name: &str, callback: F) -> SubscriptionId
    where
        F: FnMut(&FieldEvent) + Send + 'static,
    {
        self.add_subscription(Some(name.to_string()), Box::new(callback))
    }

    pub fn subscribe_all<F>(&mut self, callback: F) -> SubscriptionId
    where
        F: FnMut(&FieldEvent) + Send + 'static,
    {
        self.add_subscription(None, Box::new(callback))
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|subscription| subscription.id != id);
        before != self.subscribers.len()
    }

    /// Current values as a JSON object keyed by field name.
    pub fn snapshot(&self) -> Value {
        let map: Map<String, Value> = self
            .fields
            .iter()
            .map(|(name, field)| (name.clone(), field.value.clone()))
            .collect();
        Value::Object(map)
    }

    fn add_subscription(&mut self, field: Option<String>, callback: Callback) -> SubscriptionId {
        self.next_subscription += 1;
        let id = SubscriptionId(self.next_subscription);
        self.subscribers.push(Subscription {
            id,
            field,
            callback,
        });
        id
    }

    fn write_user(&mut self, name: &str, value: Value) -> Result<WriteOutcome, StoreError> {
        let field = self
            .fields
            .get_mut(name)
            .ok_or_else(|| StoreError::UnknownField(name.to_string()))?;
        field.value = value.clone();
        field.manually_edited = true;
        let binding = field.working_list.clone();
        self.revision += 1;
        if let Some(list) = binding {
            let working = self.lists.entry(list.clone()).or_default();
            working.replace_suggested(name, &[]);
            working.replace_manual(name, &entries_from_value(&value));
            self.emit(FieldEvent::ListChanged { list });
        }
        self.emit(FieldEvent::Changed {
            field: name.to_string(),
            value,
            origin: Origin::User,
        });
        Ok(WriteOutcome::Applied)
    }

    fn write_engine(
        &mut self,
        name: &str,
        value: Value,
        stamp: Option<WriteStamp>,
    ) -> Result<WriteOutcome, StoreError> {
        let field = self
            .fields
            .get_mut(name)
            .ok_or_else(|| StoreError::UnknownField(name.to_string()))?;

        let discard = if field.manually_edited {
            Some(DiscardReason::ManualOverride)
        } else if let (Some(attempted), Some(applied)) = (stamp, field.last_applied)
            && !attempted.supersedes(&applied)
        {
            Some(DiscardReason::Superseded { applied, attempted })
        } else {
            None
        };

        if let Some(reason) = discard {
            self.discarded_writes += 1;
            debug!(field = name, ?reason, "engine write discarded");
            self.emit(FieldEvent::WriteDiscarded {
                field: name.to_string(),
                reason,
            });
            return Ok(WriteOutcome::Discarded(reason));
        }

        field.value = value.clone();
        field.last_suggested_value = Some(value.clone());
        if let Some(stamp) = stamp {
            field.last_applied = Some(stamp);
        }
        let binding = field.working_list.clone();
        self.revision += 1;
        if let Some(list) = binding {
            self.lists
                .entry(list.clone())
                .or_default()
                .replace_suggested(name, &entries_from_value(&value));
            self.emit(FieldEvent::ListChanged { list });
        }
        self.emit(FieldEvent::Changed {
            field: name.to_string(),
            value,
            origin: Origin::Engine,
        });
        Ok(WriteOutcome::Applied)
    }

    fn emit(&mut self, event: FieldEvent) {
        for subscription in &mut self.subscribers {
            if subscription
                .field
                .as_deref()
                .is_none_or(|field| field == event.field())
            {
                (subscription.callback)(&event);
            }
        }
    }
}

impl fmt::Debug for FieldStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldStore")
            .field("fields", &self.fields)
            .field("lists", &self.lists)
            .field("revision", &self.revision)
            .field("discarded_writes", &self.discarded_writes)
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}
