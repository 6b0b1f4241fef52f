use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use form_spec::{
    AssemblySpec, FieldStore, FormDefinition, FormDefinitionError, GateResult, Origin, StoreError,
    SubmissionAssemblyError, Validator, ValidatorRegistry, VisibilityCache, VisibilityMap,
    WizardProgress, assemble, can_advance,
};
use form_suggest::{
    CategorySpec, SharedStore, SuggestionSource, SuggestionSynchronizer, SyncConfig, SyncError,
    SyncEvent, SyncStats,
};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::config::{EngineConfig, FormBundle};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Definition(#[from] FormDefinitionError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error(transparent)]
    Assembly(#[from] SubmissionAssemblyError),
    #[error("no suggestion source provided for category '{0}'")]
    MissingSource(String),
    #[error("unknown step #{0}")]
    UnknownStep(usize),
    #[error("form session '{0}' is closed")]
    Closed(String),
}

/// Suggestion sources keyed by category name.
pub type SourceMap = BTreeMap<String, Arc<dyn SuggestionSource>>;

/// One mounted form: its store, suggestion synchronizer, wizard position and submission mapping.
///
/// Field writes go through the session so driver changes reach the synchronizer. Dropping the
/// session unmounts the form and cancels outstanding suggestion work.
pub struct FormSession {
    definition: Arc<FormDefinition>,
    store: SharedStore,
    sync: SuggestionSynchronizer,
    assembly: AssemblySpec,
    validators: ValidatorRegistry,
    progress: WizardProgress,
    visibility: VisibilityCache,
    closed: bool,
}

impl FormSession {
    /// Mounts `definition` with every field at its initial value. Must run inside a tokio runtime.
    pub fn mount(
        definition: FormDefinition,
        assembly: AssemblySpec,
        sync_config: SyncConfig,
    ) -> Result<Self, SessionError> {
        let store = Arc::new(Mutex::new(definition.new_store()));
        let sync = SuggestionSynchronizer::new(Arc::clone(&store), sync_config)?;
        let progress = WizardProgress::new(&definition);
        info!(
            form = definition.id(),
            fields = definition.fields().len(),
            steps = progress.step_count(),
            "form mounted"
        );
        Ok(Self {
            definition: Arc::new(definition),
            store,
            sync,
            assembly,
            validators: ValidatorRegistry::new(),
            progress,
            visibility: VisibilityCache::new(),
            closed: false,
        })
    }

    /// Mounts a bundle and registers the categories of `config` and of the bundle, each backed by
    /// the source of the same name in `sources`.
    pub fn from_bundle(
        bundle: FormBundle,
        config: &EngineConfig,
        mut sources: SourceMap,
    ) -> Result<Self, SessionError> {
        let definition = FormDefinition::new(bundle.form)?;
        let session = Self::mount(
            definition,
            bundle.assembly,
            config.suggestions.sync_config(),
        )?;
        let categories = config
            .suggestions
            .categories
            .iter()
            .cloned()
            .chain(bundle.categories);
        for category in categories {
            let source = sources
                .remove(&category.name)
                .ok_or_else(|| SessionError::MissingSource(category.name.clone()))?;
            session.register_category(category, source)?;
        }
        Ok(session)
    }

    pub fn register_category(
        &self,
        category: CategorySpec,
        source: Arc<dyn SuggestionSource>,
    ) -> Result<(), SessionError> {
        self.ensure_open()?;
        self.sync.register(category, source)?;
        Ok(())
    }

    pub fn register_validator<V>(&mut self, field: impl Into<String>, validator: V)
    where
        V: Validator + 'static,
    {
        self.validators.register(field, validator);
    }

    pub fn id(&self) -> &str {
        self.definition.id()
    }

    pub fn definition(&self) -> &FormDefinition {
        &self.definition
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn get(&self, field: &str) -> Option<Value> {
        self.lock_store().get(field).cloned()
    }

    pub fn is_manual(&self, field: &str) -> bool {
        self.lock_store().is_manual(field)
    }

    /// User input. Marks the field as manually edited and schedules dependent suggestions.
    pub fn set_user(&mut self, field: &str, value: Value) -> Result<(), SessionError> {
        self.ensure_open()?;
        self.lock_store().set(field, value, Origin::User)?;
        self.sync.notify_change(field);
        Ok(())
    }

    /// A value reported by a surface that cannot tell user input from the engine's own echo.
    pub fn observe(&mut self, field: &str, value: Value) -> Result<Origin, SessionError> {
        self.ensure_open()?;
        let origin = self.lock_store().observe(field, value)?;
        if origin == Origin::User {
            self.sync.notify_change(field);
        }
        Ok(origin)
    }

    /// Drops the manual edit on `field` and asks the categories feeding it for a fresh suggestion.
    pub fn reset_field(&mut self, field: &str) -> Result<(), SessionError> {
        self.ensure_open()?;
        self.lock_store().reset(field)?;
        let refreshed = self.sync.refresh_targeting(field)?;
        debug!(
            form = self.definition.id(),
            field,
            refreshed = refreshed.len(),
            "field reset"
        );
        self.sync.notify_change(field);
        Ok(())
    }

    pub fn add_list_entry(&mut self, list: &str, entry: &str) -> Result<bool, SessionError> {
        self.ensure_open()?;
        Ok(self.lock_store().add_list_entry(list, entry))
    }

    pub fn remove_list_entry(&mut self, list: &str, entry: &str) -> Result<bool, SessionError> {
        self.ensure_open()?;
        Ok(self.lock_store().remove_list_entry(list, entry))
    }

    /// Deduplicated entries of a working list, in insertion order.
    pub fn merged_list(&self, list: &str) -> Vec<String> {
        self.lock_store()
            .working_list(list)
            .map(|working| working.merged())
            .unwrap_or_default()
    }

    pub fn visibility(&mut self) -> VisibilityMap {
        let store = lock(&self.store);
        self.visibility.get(&self.definition, &store).clone()
    }

    /// Validates one step against the live store without moving the wizard.
    pub fn validate_step(&mut self, index: usize) -> Result<GateResult, SessionError> {
        let fields = self
            .definition
            .steps()
            .get(index)
            .map(|step| step.fields.clone())
            .ok_or(SessionError::UnknownStep(index))?;
        let store = lock(&self.store);
        let visibility = self.visibility.get(&self.definition, &store);
        Ok(can_advance(
            &self.definition,
            &fields,
            &store,
            visibility,
            &self.validators,
        ))
    }

    /// Validates the current step and advances when it passes.
    pub fn next(&mut self) -> GateResult {
        let store = lock(&self.store);
        let visibility = self.visibility.get(&self.definition, &store);
        self.progress
            .next(&self.definition, &store, visibility, &self.validators)
    }

    pub fn back(&mut self) -> bool {
        self.progress.back()
    }

    pub fn jump_to(&mut self, index: usize) -> bool {
        self.progress.jump_to(index)
    }

    pub fn current_step(&self) -> usize {
        self.progress.current()
    }

    pub fn is_last_step(&self) -> bool {
        self.progress.is_last_step()
    }

    /// Issues every suggestion category immediately, e.g. to prefill on mount.
    pub fn refresh_suggestions(&self) -> Result<BTreeMap<String, u64>, SessionError> {
        self.ensure_open()?;
        Ok(self.sync.refresh_all()?)
    }

    /// Builds the submission payload. Mandatory visible fields are re-checked first.
    pub fn submit(&mut self) -> Result<Value, SessionError> {
        self.ensure_open()?;
        let store = lock(&self.store);
        let visibility = self.visibility.get(&self.definition, &store);
        let payload = assemble(&self.definition, &self.assembly, &store, visibility)?;
        info!(
            form = self.definition.id(),
            discarded_writes = store.discarded_writes(),
            "submission assembled"
        );
        Ok(payload)
    }

    pub fn sync_stats(&self) -> SyncStats {
        self.sync.stats()
    }

    pub fn subscribe_sync(&self) -> broadcast::Receiver<SyncEvent> {
        self.sync.subscribe()
    }

    pub fn discarded_writes(&self) -> u64 {
        self.lock_store().discarded_writes()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Unmounts the form. Pending debounces and in-flight fetches are cancelled.
    pub fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.sync.shutdown();
        let stats = self.sync.stats();
        info!(
            form = self.definition.id(),
            issued = stats.issued,
            applied = stats.applied,
            stale = stats.stale_discarded,
            "form unmounted"
        );
    }

    fn ensure_open(&self) -> Result<(), SessionError> {
        if self.closed {
            return Err(SessionError::Closed(self.definition.id().to_string()));
        }
        Ok(())
    }

    fn lock_store(&self) -> MutexGuard<'_, FieldStore> {
        lock(&self.store)
    }
}

impl Drop for FormSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
