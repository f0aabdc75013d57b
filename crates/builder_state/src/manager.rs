//! The state manager facade: owns the document and runs every dispatch through
//! middleware, the reducer, history, and subscriber notification.
//!
//! # Re-entrancy
//!
//! Listeners never see the manager. They receive a [`DeferredDispatch`] handle; actions queued
//! on it are dispatched in order after every listener has seen the current state. A chain of
//! listener-queued actions is cut off after [`MAX_DEFERRED_ACTIONS`] dispatches.

use std::{collections::VecDeque, mem};

use builder_host::DocumentStore;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::{
    actions::{Action, ActionGroup, BuilderAction, ComponentDraft, MoveTarget, SectionDraft},
    config::StoreConfig,
    events::{DeferredDispatch, Listeners, StateChangeEvent, SubscriptionId},
    history::{HistoryManager, HistoryState},
    ids,
    ingest::{ingest_source, IngestError},
    middleware::{default_chain, Middleware, MiddlewareContext, MiddlewareOutcome},
    model::{
        Component, ComponentId, DocumentSnapshot, DocumentState, Section, SectionId,
    },
    normalize::RepairReport,
    patch::{ComponentPatch, FieldPatch, SectionPatch},
    persistence::{load_document_with, save_document_with, storage_key_for, PersistenceError},
    reducer::{reduce_document, ReduceContext, ReducerError, StoreEffect},
};

/// Upper bound on listener-queued actions flushed after one notification.
pub const MAX_DEFERRED_ACTIONS: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
/// Result of a dispatch. Failures are logged; none of them are panics.
pub enum DispatchOutcome {
    /// The state changed and subscribers were notified.
    Committed,
    /// The action applied cleanly but produced an identical document.
    Unchanged,
    /// A middleware stage refused the action.
    Vetoed,
    /// The reducer refused the action; the state is untouched.
    Rejected(ReducerError),
    /// A batch is open; the action will run when it ends.
    Queued,
}

impl DispatchOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed)
    }

    /// Committed now or queued to run when the open batch ends.
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Committed | Self::Queued)
    }
}

type Clock = Box<dyn FnMut() -> u64>;

pub struct StateManager {
    state: DocumentState,
    config: StoreConfig,
    history: HistoryManager,
    middleware: Vec<Box<dyn Middleware>>,
    listeners: Listeners,
    effects: Vec<StoreEffect>,
    batch: Option<Vec<Action>>,
    recording: bool,
    clock: Clock,
    pending: VecDeque<Action>,
    flushing: bool,
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

impl StateManager {
    pub fn new(config: StoreConfig) -> Self {
        Self::with_clock(config, builder_host::unix_time_ms_now)
    }

    /// Builds a manager whose transitions are stamped by `clock`.
    pub fn with_clock(config: StoreConfig, clock: impl FnMut() -> u64 + 'static) -> Self {
        let middleware = default_chain(&config);
        Self {
            state: DocumentState::default(),
            history: HistoryManager::new(config.effective_history_size()),
            config,
            middleware,
            listeners: Listeners::default(),
            effects: Vec::new(),
            batch: None,
            recording: true,
            clock: Box::new(clock),
            pending: VecDeque::new(),
            flushing: false,
        }
    }

    /// Replaces the middleware chain installed from the config.
    pub fn with_middleware(mut self, chain: Vec<Box<dyn Middleware>>) -> Self {
        self.middleware = chain;
        self
    }

    /// Appends a stage to the end of the middleware chain.
    pub fn use_middleware(&mut self, middleware: impl Middleware + 'static) {
        self.middleware.push(Box::new(middleware));
    }

    fn now(&mut self) -> u64 {
        (self.clock)()
    }

    fn reduce_context(&self, now: u64) -> ReduceContext {
        ReduceContext {
            now,
            auto_create_sections: self.config.auto_create_sections,
        }
    }

    pub fn dispatch(&mut self, body: BuilderAction) -> DispatchOutcome {
        let now = self.now();
        self.dispatch_action(Action::stamped(body, now))
    }

    pub fn dispatch_action(&mut self, action: Action) -> DispatchOutcome {
        if action.body.group() == Some(ActionGroup::History) {
            return self.dispatch_history(&action.body);
        }
        if let Some(batch) = self.batch.as_mut() {
            batch.push(action);
            return DispatchOutcome::Queued;
        }
        self.apply(action)
    }

    fn dispatch_history(&mut self, body: &BuilderAction) -> DispatchOutcome {
        let applied = match body {
            BuilderAction::Undo => self.undo(),
            BuilderAction::Redo => self.redo(),
            _ => {
                if self.history.is_empty() && !self.history.can_redo() {
                    return DispatchOutcome::Unchanged;
                }
                self.clear_history();
                true
            }
        };
        if applied {
            DispatchOutcome::Committed
        } else {
            DispatchOutcome::Unchanged
        }
    }

    fn apply(&mut self, action: Action) -> DispatchOutcome {
        let now = self.now();
        let action_type = action.body.type_name().to_string();
        let mut middleware_effects = Vec::new();
        let mut action = action;
        for middleware in &mut self.middleware {
            let mut cx = MiddlewareContext {
                now,
                config: &self.config,
                effects: &mut middleware_effects,
            };
            match middleware.handle(&self.state, action, &mut cx) {
                MiddlewareOutcome::Continue(next) => action = next,
                MiddlewareOutcome::Veto => {
                    warn!(action_type = %action_type, middleware = middleware.name(), "action vetoed");
                    return DispatchOutcome::Vetoed;
                }
            }
        }

        let ctx = self.reduce_context(now);
        let mut working = self.state.clone();
        let mut effects = match reduce_document(&mut working, &action.body, &ctx) {
            Ok(effects) => effects,
            Err(err) => {
                warn!(action_type = %action_type, action_id = %action.meta.id, error = %err, "action rejected");
                return DispatchOutcome::Rejected(err);
            }
        };

        let stamped = working.meta.last_modified;
        working.meta.last_modified = self.state.meta.last_modified;
        if working == self.state {
            debug!(action_type = %action_type, "action left the document unchanged");
            return DispatchOutcome::Unchanged;
        }
        working.meta.last_modified = stamped;

        if self.recording {
            self.history.record(&action, &self.state, &working, &ctx);
        }
        self.state = working;
        effects.append(&mut middleware_effects);
        self.effects.append(&mut effects);
        self.notify(now);
        DispatchOutcome::Committed
    }

    fn notify(&mut self, now: u64) {
        let mut deferred = DeferredDispatch::default();
        self.listeners.notify(&self.state, now, &mut deferred);
        self.pending.extend(deferred.drain());
        if self.recording {
            self.flush_pending();
        }
    }

    fn flush_pending(&mut self) {
        if self.flushing {
            return;
        }
        self.flushing = true;
        let mut flushed = 0usize;
        while let Some(action) = self.pending.pop_front() {
            if flushed == MAX_DEFERRED_ACTIONS {
                warn!(
                    dropped = self.pending.len() + 1,
                    limit = MAX_DEFERRED_ACTIONS,
                    "listener dispatch chain cut off"
                );
                self.pending.clear();
                break;
            }
            flushed += 1;
            self.dispatch_action(action);
        }
        self.flushing = false;
    }

    fn unrecorded<R>(&mut self, run: impl FnOnce(&mut Self) -> R) -> R {
        let previous = mem::replace(&mut self.recording, false);
        let result = run(self);
        self.recording = previous;
        if self.recording {
            self.flush_pending();
        }
        result
    }

    /// Reverts the newest history entry. Returns `false` when there is nothing to undo, a batch is
    /// open, or the inverse no longer applies.
    pub fn undo(&mut self) -> bool {
        if self.batch.is_some() {
            warn!("undo refused while a batch is open");
            return false;
        }
        let Some(inverse) = self.history.undo() else {
            debug!("nothing to undo");
            return false;
        };
        let inverse_type = inverse.type_name().to_string();
        let outcome = self.unrecorded(|manager| manager.dispatch(inverse));
        match outcome {
            DispatchOutcome::Committed | DispatchOutcome::Unchanged => {
                info!(inverse_type = %inverse_type, remaining = self.history.len(), "undo applied");
                true
            }
            outcome => {
                warn!(inverse_type = %inverse_type, ?outcome, "undo failed; history entry kept");
                self.history.revert_undo();
                false
            }
        }
    }

    /// Replays the newest undone entry.
    pub fn redo(&mut self) -> bool {
        if self.batch.is_some() {
            warn!("redo refused while a batch is open");
            return false;
        }
        let Some(action) = self.history.redo() else {
            debug!("nothing to redo");
            return false;
        };
        let action_type = action.type_name().to_string();
        let outcome = self.unrecorded(|manager| manager.dispatch(action));
        match outcome {
            DispatchOutcome::Committed | DispatchOutcome::Unchanged => {
                info!(action_type = %action_type, "redo applied");
                true
            }
            outcome => {
                warn!(action_type = %action_type, ?outcome, "redo failed; history entry kept");
                self.history.revert_redo();
                false
            }
        }
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    pub fn history(&self) -> HistoryState {
        self.history.snapshot()
    }

    /// Opens a batch: dispatches are queued until [`Self::end_batch`]. Nested calls are ignored.
    pub fn start_batch(&mut self) {
        if self.batch.is_none() {
            self.batch = Some(Vec::new());
        }
    }

    /// Closes the batch and dispatches the queued actions in order.
    pub fn end_batch(&mut self) -> Vec<DispatchOutcome> {
        let Some(queued) = self.batch.take() else {
            return Vec::new();
        };
        debug!(actions = queued.len(), "replaying batch");
        queued
            .into_iter()
            .map(|action| self.dispatch_action(action))
            .collect()
    }

    pub fn is_batching(&self) -> bool {
        self.batch.is_some()
    }

    /// Registers `listener` and calls it immediately with the current state.
    pub fn subscribe(
        &mut self,
        listener: impl FnMut(&DocumentState, &mut DeferredDispatch) + 'static,
    ) -> SubscriptionId {
        let id = self.listeners.subscribe(Box::new(listener));
        let mut deferred = DeferredDispatch::default();
        self.listeners.notify_one(id, &self.state, &mut deferred);
        self.pending.extend(deferred.drain());
        self.flush_pending();
        id
    }

    /// Registers an observer of [`StateChangeEvent`]s for future commits.
    pub fn on_change(&mut self, observer: impl FnMut(&StateChangeEvent) + 'static) -> SubscriptionId {
        self.listeners.observe(Box::new(observer))
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.listeners.unsubscribe(id)
    }

    /// Drains side-effect intents from committed dispatches, oldest first.
    pub fn take_effects(&mut self) -> Vec<StoreEffect> {
        mem::take(&mut self.effects)
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn state(&self) -> &DocumentState {
        &self.state
    }

    /// Owned copy of the current state.
    pub fn get_state(&self) -> DocumentState {
        self.state.clone()
    }

    pub fn get_component(&self, id: &str) -> Option<&Component> {
        self.state.components.get(id)
    }

    /// Every component in the document, placed or not, in id order.
    pub fn components(&self) -> Vec<&Component> {
        self.state.components.values().collect()
    }

    /// Placed components in display order: section by section, or the flat layout.
    pub fn components_in_display_order(&self) -> Vec<&Component> {
        let lookup = |id: &ComponentId| self.state.components.get(id.as_str());
        if self.state.has_sections() {
            self.state
                .sections
                .iter()
                .flat_map(Section::member_ids)
                .filter_map(lookup)
                .collect()
        } else {
            self.state.layout.iter().filter_map(lookup).collect()
        }
    }

    pub fn layout(&self) -> &[ComponentId] {
        &self.state.layout
    }

    pub fn sections(&self) -> &[Section] {
        &self.state.sections
    }

    pub fn theme(&self) -> &str {
        &self.state.theme
    }

    pub fn global_settings(&self) -> &serde_json::Map<String, Value> {
        &self.state.global_settings
    }

    /// Counts for diagnostics panels and logs.
    pub fn debug_summary(&self) -> Value {
        let members = self
            .state
            .sections
            .iter()
            .map(|section| section.components.len())
            .sum::<usize>();
        json!({
            "components": self.state.components.len(),
            "layout": self.state.layout.len(),
            "sections": self.state.sections.len(),
            "sectionMembers": members,
            "theme": self.state.theme,
            "historyPast": self.history.len(),
            "historyFuture": self.history.snapshot().future.len(),
            "historyMaxSize": self.history.max_size(),
            "batching": self.is_batching(),
            "subscribers": self.listeners.len(),
            "pendingEffects": self.effects.len(),
            "errors": self.state.errors.len(),
            "lastModified": self.state.meta.last_modified,
            "documentId": self.state.meta.document_id,
        })
    }

    pub fn add_component(&mut self, draft: ComponentDraft) -> DispatchOutcome {
        self.dispatch(BuilderAction::AddComponent(draft))
    }

    /// Applies `updates` with the overwritten values captured for undo.
    pub fn update_component(&mut self, id: impl Into<ComponentId>, updates: ComponentPatch) -> DispatchOutcome {
        let id = id.into();
        let previous = self
            .state
            .components
            .get(id.as_str())
            .map(|component| updates.previous_of(component));
        self.dispatch(BuilderAction::UpdateComponent {
            id,
            updates,
            previous,
        })
    }

    pub fn remove_component(&mut self, id: impl Into<ComponentId>) -> DispatchOutcome {
        self.dispatch(BuilderAction::RemoveComponent { id: id.into() })
    }

    pub fn delete_component(&mut self, id: impl Into<ComponentId>) -> DispatchOutcome {
        self.dispatch(BuilderAction::DeleteComponent { id: id.into() })
    }

    pub fn move_component(&mut self, id: impl Into<ComponentId>, target: MoveTarget) -> DispatchOutcome {
        self.dispatch(BuilderAction::MoveComponent {
            component_id: id.into(),
            target,
        })
    }

    /// Duplicates a component and returns the copy's id when accepted.
    pub fn duplicate_component(&mut self, id: impl Into<ComponentId>) -> Option<ComponentId> {
        let component_id = id.into();
        let now = self.now();
        let new_id = ids::duplicate_component_id(&component_id, &self.state.components, now);
        self.dispatch(BuilderAction::DuplicateComponent {
            component_id,
            new_id: Some(new_id.clone()),
        })
        .is_accepted()
        .then_some(new_id)
    }

    pub fn batch_update_components(
        &mut self,
        updates: impl IntoIterator<Item = (ComponentId, ComponentPatch)>,
    ) -> DispatchOutcome {
        self.dispatch(BuilderAction::BatchUpdateComponents {
            updates: updates.into_iter().collect(),
        })
    }

    pub fn clear_all_components(&mut self) -> DispatchOutcome {
        self.dispatch(BuilderAction::ClearAllComponents)
    }

    pub fn set_layout(&mut self, layout: Vec<ComponentId>) -> DispatchOutcome {
        self.dispatch(BuilderAction::SetLayout { layout })
    }

    /// Adds a section and returns its id when accepted.
    pub fn add_section(&mut self, mut draft: SectionDraft) -> Option<SectionId> {
        let section_id = match draft.section_id.clone().filter(|id| !id.is_blank()) {
            Some(id) => id,
            None => {
                let now = self.now();
                ids::generate_section_id(&self.state.sections, now)
            }
        };
        draft.section_id = Some(section_id.clone());
        self.dispatch(BuilderAction::AddSection(draft))
            .is_accepted()
            .then_some(section_id)
    }

    pub fn update_section(&mut self, section_id: impl Into<SectionId>, updates: SectionPatch) -> DispatchOutcome {
        let section_id = section_id.into();
        let previous = self
            .state
            .section(section_id.as_str())
            .map(|section| updates.previous_of(section));
        self.dispatch(BuilderAction::UpdateSection {
            section_id,
            updates,
            previous,
        })
    }

    pub fn delete_section(&mut self, section_id: impl Into<SectionId>) -> DispatchOutcome {
        self.dispatch(BuilderAction::DeleteSection {
            section_id: section_id.into(),
        })
    }

    pub fn assign_component_to_section(
        &mut self,
        component_id: impl Into<ComponentId>,
        section_id: impl Into<SectionId>,
        column: Option<u32>,
    ) -> DispatchOutcome {
        self.dispatch(BuilderAction::AssignComponentToSection {
            component_id: component_id.into(),
            section_id: section_id.into(),
            column,
            index: None,
        })
    }

    pub fn remove_component_from_section(&mut self, component_id: impl Into<ComponentId>) -> DispatchOutcome {
        self.dispatch(BuilderAction::RemoveComponentFromSection {
            component_id: component_id.into(),
        })
    }

    pub fn set_theme(&mut self, theme: impl Into<String>) -> DispatchOutcome {
        self.dispatch(BuilderAction::SetTheme { theme: theme.into() })
    }

    pub fn update_theme_settings(&mut self, settings: FieldPatch) -> DispatchOutcome {
        self.dispatch(BuilderAction::UpdateThemeSettings { settings })
    }

    pub fn update_global_settings(&mut self, settings: FieldPatch) -> DispatchOutcome {
        self.dispatch(BuilderAction::UpdateGlobalSettings { settings })
    }

    pub fn set_state(&mut self, document: DocumentSnapshot) -> DispatchOutcome {
        self.dispatch(BuilderAction::SetState {
            document: Box::new(document),
        })
    }

    pub fn merge_state(&mut self, patch: Value) -> DispatchOutcome {
        self.dispatch(BuilderAction::MergeState { patch })
    }

    pub fn reset_state(&mut self) -> DispatchOutcome {
        self.dispatch(BuilderAction::ResetState)
    }

    pub fn apply_transaction(&mut self, actions: Vec<BuilderAction>) -> DispatchOutcome {
        self.dispatch(BuilderAction::ApplyTransaction { actions })
    }

    pub fn select_component(&mut self, id: impl Into<ComponentId>) -> DispatchOutcome {
        self.dispatch(BuilderAction::SelectComponent { id: id.into() })
    }

    pub fn deselect_component(&mut self) -> DispatchOutcome {
        self.dispatch(BuilderAction::DeselectComponent)
    }

    pub fn hover_component(&mut self, id: Option<ComponentId>) -> DispatchOutcome {
        self.dispatch(BuilderAction::HoverComponent { id })
    }

    pub fn toggle_preview_mode(&mut self) -> DispatchOutcome {
        self.dispatch(BuilderAction::TogglePreviewMode)
    }

    pub fn clear_errors(&mut self) -> DispatchOutcome {
        self.dispatch(BuilderAction::ClearErrors)
    }

    fn record_error(&mut self, error_type: &str, message: String) {
        self.dispatch(BuilderAction::AddError {
            error_type: error_type.to_string(),
            message,
        });
    }

    /// Replaces the document with a repaired copy of a host source. Not undoable.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError`] for structurally unusable sources; the failure is also recorded in
    /// the state's error list.
    pub fn load_from_source(&mut self, source: &Value) -> Result<RepairReport, IngestError> {
        let now = self.now();
        let ingested = match ingest_source(source, now) {
            Ok(ingested) => ingested,
            Err(err) => {
                warn!(error = %err, "host source rejected");
                self.record_error("LOAD_ERROR", err.to_string());
                return Err(err);
            }
        };
        info!(
            format = ?ingested.format,
            components = ingested.document.components.len(),
            sections = ingested.document.sections.len(),
            repaired = !ingested.report.is_clean(),
            "loaded host source"
        );
        let document = ingested.document;
        self.unrecorded(|manager| manager.set_state(document));
        Ok(ingested.report)
    }

    /// Saves the document under its storage key, tracking the attempt in `ui.is_saving`.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError`] when the store fails; the failure is also recorded as a
    /// `SAVE_ERROR` and editing continues.
    pub async fn save_to_storage(&mut self, store: &dyn DocumentStore) -> Result<(), PersistenceError> {
        let key = storage_key_for(self.state.meta.document_id.as_deref());
        self.save_under_key(store, &key).await
    }

    pub(crate) async fn save_under_key(
        &mut self,
        store: &dyn DocumentStore,
        key: &str,
    ) -> Result<(), PersistenceError> {
        self.dispatch(BuilderAction::SaveStateRequest);
        let document = self.state.snapshot();
        match save_document_with(store, key, &document).await {
            Ok(()) => {
                let saved_at = self.now();
                self.dispatch(BuilderAction::SaveStateSuccess { saved_at });
                debug!(key, components = document.components.len(), "document saved");
                Ok(())
            }
            Err(err) => {
                warn!(key, error = %err, "document save failed");
                self.dispatch(BuilderAction::SaveStateFailure {
                    message: err.to_string(),
                });
                Err(err)
            }
        }
    }

    /// Loads, repairs, and installs the stored document for the current identity. Not undoable.
    ///
    /// Returns `Ok(None)` when nothing is stored.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError`] when the store fails or the stored value is unusable; the
    /// failure is also recorded as a `LOAD_ERROR`.
    pub async fn load_from_storage(
        &mut self,
        store: &dyn DocumentStore,
    ) -> Result<Option<RepairReport>, PersistenceError> {
        let now = self.now();
        let document_id = self.state.meta.document_id.clone();
        let loaded = match load_document_with(store, document_id.as_deref(), now).await {
            Ok(Some(loaded)) => loaded,
            Ok(None) => {
                debug!(document_id = ?document_id, "no stored document");
                return Ok(None);
            }
            Err(err) => {
                warn!(error = %err, "stored document could not be loaded");
                self.record_error("LOAD_ERROR", err.to_string());
                return Err(err);
            }
        };
        info!(
            key = %loaded.key,
            migrated_from_legacy = loaded.migrated_from_legacy,
            components = loaded.document.components.len(),
            "loaded stored document"
        );
        let document = loaded.document;
        self.unrecorded(|manager| manager.set_state(document));
        Ok(Some(loaded.report))
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use builder_host::MemoryDocumentStore;
    use futures::executor::block_on;
    use pretty_assertions::assert_eq;
    use serde_json::Map;

    use super::*;
    use crate::{
        middleware::middleware_fn,
        model::DEFAULT_THEME,
        persistence::{SaveRequest, SaveTarget, DRAFT_STORAGE_KEY},
    };

    fn test_manager() -> StateManager {
        let mut now = 1_000u64;
        StateManager::with_clock(StoreConfig::default(), move || {
            now += 1;
            now
        })
    }

    fn props(title: &str) -> Map<String, Value> {
        let mut props = Map::new();
        props.insert("title".to_string(), json!(title));
        props
    }

    #[test]
    fn add_then_undo_then_redo() {
        let mut manager = test_manager();
        assert!(manager.add_component(ComponentDraft::new("hero-1", "hero")).is_committed());
        assert_eq!(manager.sections().len(), 1);
        assert!(manager.can_undo());

        assert!(manager.undo());
        assert!(manager.get_state().components.is_empty());
        assert!(manager.sections().is_empty());
        assert!(manager.can_redo());

        assert!(manager.redo());
        assert!(manager.get_component("hero-1").is_some());
        assert_eq!(manager.sections().len(), 1);
        assert!(!manager.can_redo());
    }

    #[test]
    fn update_captures_previous_values_for_undo() {
        let mut manager = test_manager();
        manager.add_component(ComponentDraft::new("hero-1", "hero").with_props(props("Old")));
        manager.update_component("hero-1", ComponentPatch::props(props("New")));
        assert_eq!(manager.get_component("hero-1").map(|c| c.props["title"].clone()), Some(json!("New")));

        assert!(manager.undo());
        assert_eq!(manager.get_component("hero-1").map(|c| c.props["title"].clone()), Some(json!("Old")));
    }

    #[test]
    fn rejected_and_unchanged_dispatches_do_not_touch_history_or_effects() {
        let mut manager = test_manager();
        manager.take_effects();
        assert_eq!(
            manager.remove_component("ghost"),
            DispatchOutcome::Rejected(ReducerError::ComponentNotFound("ghost".into()))
        );
        assert_eq!(manager.set_theme(DEFAULT_THEME), DispatchOutcome::Unchanged);
        assert!(!manager.can_undo());
        assert!(manager.take_effects().is_empty());
    }

    #[test]
    fn vetoing_middleware_stops_the_action() {
        let mut manager = test_manager();
        manager.use_middleware(middleware_fn("no-dark", |_, action: Action, _| {
            let dark = matches!(&action.body, BuilderAction::SetTheme { theme } if theme == "dark");
            if dark {
                MiddlewareOutcome::Veto
            } else {
                MiddlewareOutcome::Continue(action)
            }
        }));
        assert_eq!(manager.set_theme("dark"), DispatchOutcome::Vetoed);
        assert_eq!(manager.theme(), DEFAULT_THEME);
        assert!(manager.set_theme("light").is_committed());
    }

    #[test]
    fn committed_actions_schedule_saves_but_ui_actions_do_not() {
        let mut manager = test_manager();
        manager.add_component(ComponentDraft::new("hero-1", "hero"));
        let effects = manager.take_effects();
        assert!(effects.contains(&StoreEffect::ComponentAdded("hero-1".into())));
        assert!(effects.contains(&StoreEffect::ScheduleSave(SaveRequest {
            target: SaveTarget::Draft,
            delay_ms: manager.config().persist_debounce_ms,
        })));

        manager.select_component("hero-1");
        assert!(manager.take_effects().is_empty());
        assert_eq!(manager.history().past.len(), 1);
    }

    #[test]
    fn batches_queue_until_ended_and_refuse_undo() {
        let mut manager = test_manager();
        manager.start_batch();
        assert_eq!(manager.set_theme("dark"), DispatchOutcome::Queued);
        assert_eq!(manager.theme(), DEFAULT_THEME);
        assert!(!manager.undo());

        let outcomes = manager.end_batch();
        assert_eq!(outcomes, vec![DispatchOutcome::Committed]);
        assert_eq!(manager.theme(), "dark");
        assert!(manager.end_batch().is_empty());
    }

    #[test]
    fn subscribers_get_the_current_state_immediately_and_after_commits() {
        let mut manager = test_manager();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let id = manager.subscribe(move |state, _| sink.borrow_mut().push(state.theme.clone()));
        manager.set_theme("dark");
        assert!(manager.unsubscribe(id));
        manager.set_theme("light");
        assert_eq!(*seen.borrow(), vec![DEFAULT_THEME.to_string(), "dark".to_string()]);
    }

    #[test]
    fn listener_dispatches_run_after_notification() {
        let mut manager = test_manager();
        let events = Rc::new(RefCell::new(Vec::new()));
        manager.subscribe(|state, deferred| {
            if state.theme == "dark" && !state.ui.is_preview_mode {
                deferred.dispatch(BuilderAction::TogglePreviewMode);
            }
        });
        let sink = Rc::clone(&events);
        manager.on_change(move |event| sink.borrow_mut().push(event.state.ui.is_preview_mode));

        manager.set_theme("dark");
        assert!(manager.state().ui.is_preview_mode);
        assert_eq!(*events.borrow(), vec![false, true]);
    }

    #[test]
    fn runaway_listener_chains_are_cut_off() {
        let mut manager = test_manager();
        let commits = Rc::new(RefCell::new(0usize));
        let counter = Rc::clone(&commits);
        manager.on_change(move |_| *counter.borrow_mut() += 1);
        manager.subscribe(|_, deferred| deferred.dispatch(BuilderAction::TogglePreviewMode));
        assert_eq!(*commits.borrow(), MAX_DEFERRED_ACTIONS);
        assert!(!manager.can_undo());
    }

    #[test]
    fn loading_a_source_repairs_and_is_not_undoable() {
        let mut manager = test_manager();
        let report = manager
            .load_from_source(&json!({
                "components": {"hero-1": {"type": "hero"}},
                "sections": [{"section_id": "s1", "components": [{"component_id": "hero-1"}, {"component_id": "bio-2"}]}],
            }))
            .expect("load");
        assert_eq!(report.stub_components, vec![ComponentId::from("bio-2")]);
        assert_eq!(manager.get_component("bio-2").map(|c| c.component_type.as_str()), Some("biography"));
        assert!(!manager.can_undo());

        assert_eq!(manager.load_from_source(&json!([])), Err(IngestError::NotAnObject));
        assert_eq!(manager.state().errors.last().map(|e| e.error_type.as_str()), Some("LOAD_ERROR"));
    }

    #[test]
    fn save_and_load_round_trip_through_a_store() {
        let store = MemoryDocumentStore::default();
        let mut manager = test_manager();
        manager.add_component(ComponentDraft::new("hero-1", "hero"));
        block_on(manager.save_to_storage(&store)).expect("save");
        assert!(store.contains_key(DRAFT_STORAGE_KEY));
        assert!(!manager.state().ui.is_saving);
        assert!(manager.state().ui.last_saved.is_some());

        let mut restored = test_manager();
        let report = block_on(restored.load_from_storage(&store)).expect("load");
        assert!(report.is_some());
        assert_eq!(restored.state().snapshot().components, manager.state().snapshot().components);
        assert_eq!(restored.sections(), manager.sections());
    }

    #[test]
    fn debug_summary_counts_state() {
        let mut manager = test_manager();
        manager.add_component(ComponentDraft::new("hero-1", "hero"));
        let summary = manager.debug_summary();
        assert_eq!(summary["components"], json!(1));
        assert_eq!(summary["sections"], json!(1));
        assert_eq!(summary["historyPast"], json!(1));
        assert_eq!(summary["batching"], json!(false));
    }

    #[test]
    fn components_include_unplaced_ones() {
        let mut manager = test_manager();
        manager.add_component(ComponentDraft::new("hero-1", "hero"));
        manager.add_component(ComponentDraft::new("bio-1", "biography"));
        assert!(manager.remove_component_from_section("hero-1").is_committed());

        let all = manager.components().iter().map(|c| c.id.to_string()).collect::<Vec<_>>();
        assert_eq!(all, vec!["bio-1".to_string(), "hero-1".to_string()]);
        let shown = manager
            .components_in_display_order()
            .iter()
            .map(|c| c.id.to_string())
            .collect::<Vec<_>>();
        assert_eq!(shown, vec!["bio-1".to_string()]);
    }
}
