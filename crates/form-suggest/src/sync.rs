use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use form_spec::{DiscardReason, FieldStore, WriteOutcome, WriteStamp};
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::category::{CategorySpec, SyncConfig};
use crate::source::{SuggestionFetchError, SuggestionRequest, SuggestionSource};

/// Field store shared between the form owner and the synchronizer's tasks.
pub type SharedStore = Arc<Mutex<FieldStore>>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("no tokio runtime available to drive suggestion requests")]
    NoRuntime,
    #[error("category '{0}' is already registered")]
    DuplicateCategory(String),
    #[error("unknown category '{0}'")]
    UnknownCategory(String),
    #[error("category '{category}' references unknown field '{field}'")]
    UnknownField { category: String, field: String },
    #[error("suggestion session has been shut down")]
    ShutDown,
}

/// Running counters, mainly for diagnostics and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    pub issued: u64,
    /// Field writes that reached the store.
    pub applied: u64,
    pub stale_discarded: u64,
    pub fetch_failures: u64,
    /// In-flight requests signalled to stop because a newer one was issued.
    pub cancelled: u64,
    pub manual_override_drops: u64,
    pub superseded_drops: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SyncEvent {
    Issued {
        category: String,
        generation: u64,
        issued: u64,
    },
    Applied {
        category: String,
        generation: u64,
        fields: Vec<String>,
    },
    WriteDropped {
        category: String,
        generation: u64,
        field: String,
        reason: DiscardReason,
    },
    StaleDiscarded {
        category: String,
        generation: u64,
        current: u64,
    },
    FetchFailed {
        category: String,
        generation: u64,
        message: String,
    },
    Cancelled {
        category: String,
        generation: u64,
    },
}

struct Category {
    spec: CategorySpec,
    source: Arc<dyn SuggestionSource>,
    generation: u64,
    /// Bumped on every debounce (re)start; a woken debounce task only issues if still current.
    debounce_epoch: u64,
    pending: Option<JoinHandle<()>>,
    in_flight: Option<CancellationToken>,
}

struct Shared {
    store: SharedStore,
    config: SyncConfig,
    runtime: Handle,
    session: CancellationToken,
    issue_clock: AtomicU64,
    categories: Mutex<BTreeMap<String, Category>>,
    stats: Mutex<SyncStats>,
    events: broadcast::Sender<SyncEvent>,
}

/// Keeps suggested fields fresh without applying stale or superseded responses.
///
/// Each category debounces changes to its driver fields, numbers its requests with a generation
/// and only applies the response carrying the current one. Writes go through
/// [`FieldStore::set_suggested`] with an issue-order stamp, so manual edits and newer suggestions
/// from other categories are never overwritten.
pub struct SuggestionSynchronizer {
    shared: Arc<Shared>,
}

impl SuggestionSynchronizer {
    /// Binds a synchronizer to `store` and to the tokio runtime of the calling context.
    pub fn new(store: SharedStore, config: SyncConfig) -> Result<Self, SyncError> {
        let runtime = Handle::try_current().map_err(|_| SyncError::NoRuntime)?;
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Ok(Self {
            shared: Arc::new(Shared {
                store,
                config,
                runtime,
                session: CancellationToken::new(),
                issue_clock: AtomicU64::new(0),
                categories: Mutex::new(BTreeMap::new()),
                stats: Mutex::new(SyncStats::default()),
                events,
            }),
        })
    }

    pub fn store(&self) -> &SharedStore {
        &self.shared.store
    }

    pub fn register(
        &self,
        spec: CategorySpec,
        source: Arc<dyn SuggestionSource>,
    ) -> Result<(), SyncError> {
        if !self.is_alive() {
            return Err(SyncError::ShutDown);
        }
        {
            let store = lock(&self.shared.store);
            let fields = spec
                .drivers
                .iter()
                .chain(spec.targets.iter().map(|target| &target.field));
            for field in fields {
                if !store.contains(field) {
                    return Err(SyncError::UnknownField {
                        category: spec.name.clone(),
                        field: field.clone(),
                    });
                }
            }
        }

        let mut categories = lock(&self.shared.categories);
        if categories.contains_key(&spec.name) {
            return Err(SyncError::DuplicateCategory(spec.name));
        }
        debug!(
            category = %spec.name,
            drivers = ?spec.drivers,
            priority = spec.priority(),
            "suggestion category registered"
        );
        categories.insert(
            spec.name.clone(),
            Category {
                spec,
                source,
                generation: 0,
                debounce_epoch: 0,
                pending: None,
                in_flight: None,
            },
        );
        Ok(())
    }

    /// Restarts the trailing debounce of every category driven by `field`.
    ///
    /// Returns how many categories were scheduled. Suggestions applied by the synchronizer itself
    /// are forwarded the same way, so chained categories follow without a call here.
    pub fn notify_change(&self, field: &str) -> usize {
        Shared::schedule(&self.shared, field, None)
    }

    /// Issues a request for `category` right away, dropping any pending debounce.
    pub fn refresh(&self, category: &str) -> Result<u64, SyncError> {
        {
            let mut categories = lock(&self.shared.categories);
            let entry = categories
                .get_mut(category)
                .ok_or_else(|| SyncError::UnknownCategory(category.to_string()))?;
            entry.debounce_epoch += 1;
            if let Some(pending) = entry.pending.take() {
                pending.abort();
            }
        }
        Shared::issue(&self.shared, category)
    }

    /// Refreshes every registered category. Returns the issued generation per category.
    pub fn refresh_all(&self) -> Result<BTreeMap<String, u64>, SyncError> {
        self.categories()
            .into_iter()
            .map(|name| {
                let generation = self.refresh(&name)?;
                Ok((name, generation))
            })
            .collect()
    }

    /// Refreshes the categories that write `field`, e.g. after its manual edit was reset.
    pub fn refresh_targeting(&self, field: &str) -> Result<BTreeMap<String, u64>, SyncError> {
        let names: Vec<String> = lock(&self.shared.categories)
            .iter()
            .filter(|(_, category)| {
                category
                    .spec
                    .targets
                    .iter()
                    .any(|target| target.field == field)
            })
            .map(|(name, _)| name.clone())
            .collect();
        names
            .into_iter()
            .map(|name| {
                let generation = self.refresh(&name)?;
                Ok((name, generation))
            })
            .collect()
    }

    /// Cancels every pending debounce and in-flight request. No engine write lands afterwards.
    pub fn shutdown(&self) {
        let mut categories = lock(&self.shared.categories);
        if self.shared.session.is_cancelled() {
            return;
        }
        self.shared.session.cancel();
        for category in categories.values_mut() {
            if let Some(pending) = category.pending.take() {
                pending.abort();
            }
            category.in_flight = None;
        }
        debug!(categories = categories.len(), "suggestion session shut down");
    }

    pub fn is_alive(&self) -> bool {
        !self.shared.session.is_cancelled()
    }

    pub fn categories(&self) -> Vec<String> {
        lock(&self.shared.categories).keys().cloned().collect()
    }

    /// Current generation of `category`; zero until its first request.
    pub fn generation(&self, category: &str) -> Option<u64> {
        lock(&self.shared.categories)
            .get(category)
            .map(|entry| entry.generation)
    }

    pub fn stats(&self) -> SyncStats {
        *lock(&self.shared.stats)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.shared.events.subscribe()
    }
}

impl Drop for SuggestionSynchronizer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for SuggestionSynchronizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SuggestionSynchronizer")
            .field("categories", &self.categories())
            .field("alive", &self.is_alive())
            .field("stats", &self.stats())
            .finish()
    }
}

impl Shared {
    /// Restarts the debounce of the categories driven by `field`, except `origin`, the category
    /// whose own write changed it.
    fn schedule(shared: &Arc<Shared>, field: &str, origin: Option<&str>) -> usize {
        let mut categories = lock(&shared.categories);
        if shared.session.is_cancelled() {
            return 0;
        }

        let mut scheduled = 0;
        for (name, category) in categories.iter_mut().filter(|(name, category)| {
            category.spec.is_driven_by(field) && origin != Some(name.as_str())
        }) {
            if let Some(pending) = category.pending.take() {
                pending.abort();
                debug!(category = %name, field, "debounce restarted");
            }
            category.debounce_epoch += 1;
            let epoch = category.debounce_epoch;
            let delay = category
                .spec
                .debounce_ms
                .map(Duration::from_millis)
                .unwrap_or_else(|| shared.config.debounce());
            let task = Arc::clone(shared);
            let name = name.clone();
            category.pending = Some(shared.runtime.spawn(async move {
                tokio::select! {
                    _ = task.session.cancelled() => {}
                    _ = tokio::time::sleep(delay) => {
                        if let Err(err) = Shared::issue_debounced(&task, &name, epoch) {
                            debug!(category = %name, error = %err, "debounced request not issued");
                        }
                    }
                }
            }));
            scheduled += 1;
        }
        scheduled
    }

    /// Issues for a debounce that fired, unless a newer change or a refresh replaced it meanwhile.
    fn issue_debounced(
        shared: &Arc<Shared>,
        name: &str,
        epoch: u64,
    ) -> Result<Option<u64>, SyncError> {
        let categories = lock(&shared.categories);
        let current = categories.get(name).map(|category| category.debounce_epoch);
        if current != Some(epoch) {
            debug!(category = name, epoch, "replaced debounce skipped");
            return Ok(None);
        }
        Shared::issue_locked(shared, categories, name).map(Some)
    }

    fn issue(shared: &Arc<Shared>, name: &str) -> Result<u64, SyncError> {
        let categories = lock(&shared.categories);
        Shared::issue_locked(shared, categories, name)
    }

    fn issue_locked(
        shared: &Arc<Shared>,
        mut categories: MutexGuard<'_, BTreeMap<String, Category>>,
        name: &str,
    ) -> Result<u64, SyncError> {
        if shared.session.is_cancelled() {
            return Err(SyncError::ShutDown);
        }
        let category = categories
            .get_mut(name)
            .ok_or_else(|| SyncError::UnknownCategory(name.to_string()))?;

        category.generation += 1;
        let generation = category.generation;
        let issued = shared.issue_clock.fetch_add(1, Ordering::SeqCst) + 1;
        let stamp = WriteStamp::new(issued, category.spec.priority());

        let cancel = shared.session.child_token();
        let superseded = category.in_flight.replace(cancel.clone());
        if let Some(previous) = &superseded {
            previous.cancel();
        }

        let drivers: Map<String, Value> = {
            let store = lock(&shared.store);
            category
                .spec
                .drivers
                .iter()
                .map(|driver| {
                    let value = store.get(driver).cloned().unwrap_or(Value::Null);
                    (driver.clone(), value)
                })
                .collect()
        };
        let source = Arc::clone(&category.source);
        drop(categories);

        shared.record(|stats| {
            stats.issued += 1;
            if superseded.is_some() {
                stats.cancelled += 1;
            }
        });
        if superseded.is_some() {
            shared.emit(SyncEvent::Cancelled {
                category: name.to_string(),
                generation: generation - 1,
            });
        }
        shared.emit(SyncEvent::Issued {
            category: name.to_string(),
            generation,
            issued,
        });
        debug!(category = name, generation, issued, "suggestion request issued");

        let request = SuggestionRequest {
            category: name.to_string(),
            generation,
            drivers,
            cancel,
        };
        let task = Arc::clone(shared);
        let category = name.to_string();
        shared.runtime.spawn(async move {
            let outcome = tokio::select! {
                _ = task.session.cancelled() => None,
                result = source.fetch(request) => Some(result),
            };
            match outcome {
                Some(result) => task.resolve(&category, generation, stamp, result),
                None => debug!(%category, generation, "suggestion request dropped at shutdown"),
            }
        });

        Ok(generation)
    }

    fn resolve(
        self: &Arc<Self>,
        name: &str,
        generation: u64,
        stamp: WriteStamp,
        result: Result<Value, SuggestionFetchError>,
    ) {
        let mut categories = lock(&self.categories);
        if self.session.is_cancelled() {
            return;
        }
        let Some(category) = categories.get_mut(name) else {
            return;
        };

        if category.generation != generation {
            let current = category.generation;
            drop(categories);
            self.record(|stats| stats.stale_discarded += 1);
            debug!(category = name, generation, current, "stale suggestion discarded");
            self.emit(SyncEvent::StaleDiscarded {
                category: name.to_string(),
                generation,
                current,
            });
            return;
        }
        category.in_flight = None;

        let payload = match result {
            Ok(payload) => payload,
            Err(err) => {
                drop(categories);
                warn!(category = name, generation, error = %err, "suggestion fetch failed");
                self.record(|stats| stats.fetch_failures += 1);
                self.emit(SyncEvent::FetchFailed {
                    category: name.to_string(),
                    generation,
                    message: err.to_string(),
                });
                return;
            }
        };

        let mut applied = Vec::new();
        let mut changed = Vec::new();
        let mut dropped = Vec::new();
        {
            let mut store = lock(&self.store);
            for target in &category.spec.targets {
                let Some(value) = target.extract(&payload) else {
                    debug!(category = name, field = %target.field, "no suggestion for target");
                    continue;
                };
                let differs = store.get(&target.field) != Some(&value);
                match store.set_suggested(&target.field, value, stamp) {
                    Ok(WriteOutcome::Applied) => {
                        if differs {
                            changed.push(target.field.clone());
                        }
                        applied.push(target.field.clone());
                    }
                    Ok(WriteOutcome::Discarded(reason)) => {
                        dropped.push((target.field.clone(), reason))
                    }
                    Err(err) => {
                        warn!(category = name, error = %err, "suggestion target rejected")
                    }
                }
            }
        }
        drop(categories);

        self.record(|stats| {
            stats.applied += applied.len() as u64;
            for (_, reason) in &dropped {
                match reason {
                    DiscardReason::ManualOverride => stats.manual_override_drops += 1,
                    DiscardReason::Superseded { .. } => stats.superseded_drops += 1,
                }
            }
        });
        for (field, reason) in dropped {
            self.emit(SyncEvent::WriteDropped {
                category: name.to_string(),
                generation,
                field,
                reason,
            });
        }
        self.emit(SyncEvent::Applied {
            category: name.to_string(),
            generation,
            fields: applied,
        });

        for field in changed {
            let scheduled = Shared::schedule(self, &field, Some(name));
            if scheduled > 0 {
                debug!(
                    category = name,
                    %field,
                    scheduled,
                    "suggestion forwarded to dependent categories"
                );
            }
        }
    }

    fn record(&self, update: impl FnOnce(&mut SyncStats)) {
        update(&mut lock(&self.stats));
    }

    fn emit(&self, event: SyncEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
