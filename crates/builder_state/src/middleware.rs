//! Pre-reducer middleware chain.
//!
//! Each stage sees the committed state and the pending action and either passes an action on
//! (possibly rewritten) or vetoes it. Stages may also queue effects, which are kept only if the
//! action commits.

use tracing::{debug, error, warn};

use crate::{
    actions::{Action, BuilderAction},
    config::StoreConfig,
    ids,
    model::DocumentState,
    persistence::{SaveRequest, SaveTarget},
    reducer::StoreEffect,
};

#[derive(Debug, Clone, PartialEq)]
pub enum MiddlewareOutcome {
    Continue(Action),
    Veto,
}

pub struct MiddlewareContext<'a> {
    pub now: u64,
    pub config: &'a StoreConfig,
    pub effects: &'a mut Vec<StoreEffect>,
}

pub trait Middleware {
    fn name(&self) -> &str;

    fn handle(
        &mut self,
        state: &DocumentState,
        action: Action,
        cx: &mut MiddlewareContext<'_>,
    ) -> MiddlewareOutcome;
}

/// Adapts a closure into a named [`Middleware`].
pub struct FnMiddleware<F> {
    name: String,
    handler: F,
}

pub fn middleware_fn<F>(name: impl Into<String>, handler: F) -> FnMiddleware<F>
where
    F: FnMut(&DocumentState, Action, &mut MiddlewareContext<'_>) -> MiddlewareOutcome,
{
    FnMiddleware {
        name: name.into(),
        handler,
    }
}

impl<F> Middleware for FnMiddleware<F>
where
    F: FnMut(&DocumentState, Action, &mut MiddlewareContext<'_>) -> MiddlewareOutcome,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn handle(
        &mut self,
        state: &DocumentState,
        action: Action,
        cx: &mut MiddlewareContext<'_>,
    ) -> MiddlewareOutcome {
        (self.handler)(state, action, cx)
    }
}

/// Rejects unusable payloads and fills in ids and previous values the reducer would otherwise
/// have to invent.
#[derive(Debug, Default)]
pub struct ValidationMiddleware;

impl Middleware for ValidationMiddleware {
    fn name(&self) -> &str {
        "validation"
    }

    fn handle(
        &mut self,
        state: &DocumentState,
        mut action: Action,
        cx: &mut MiddlewareContext<'_>,
    ) -> MiddlewareOutcome {
        match &mut action.body {
            BuilderAction::Unrecognized { action_type, .. } => {
                warn!(action_type = %action_type, "unknown action type");
            }
            BuilderAction::AddComponent(draft) => {
                if draft.id.is_blank() {
                    error!(action_id = %action.meta.id, "ADD_COMPONENT requires a component id");
                    return MiddlewareOutcome::Veto;
                }
                if draft.component_type.as_deref().map(str::trim).unwrap_or_default().is_empty() {
                    warn!(component_id = %draft.id, "ADD_COMPONENT without a type");
                }
            }
            BuilderAction::UpdateComponent {
                id,
                updates,
                previous,
            } => {
                if previous.is_none() {
                    if let Some(component) = state.components.get(id.as_str()) {
                        *previous = Some(updates.previous_of(component));
                    }
                }
            }
            BuilderAction::UpdateSection {
                section_id,
                updates,
                previous,
            } => {
                if previous.is_none() {
                    if let Some(section) = state.section(section_id.as_str()) {
                        *previous = Some(updates.previous_of(section));
                    }
                }
            }
            BuilderAction::DuplicateComponent {
                component_id,
                new_id,
            } => {
                if new_id.as_ref().map(|id| id.is_blank()).unwrap_or(true) {
                    *new_id = Some(ids::duplicate_component_id(component_id, &state.components, cx.now));
                }
            }
            BuilderAction::AddSection(draft) => {
                if draft.section_id.as_ref().map(|id| id.is_blank()).unwrap_or(true) {
                    draft.section_id = Some(ids::generate_section_id(&state.sections, cx.now));
                }
            }
            BuilderAction::ApplyTransaction { actions } if actions.is_empty() => {
                warn!(action_id = %action.meta.id, "empty transaction");
                return MiddlewareOutcome::Veto;
            }
            _ => {}
        }
        MiddlewareOutcome::Continue(action)
    }
}

/// Traces every action with a summary of the state it applies to.
#[derive(Debug, Default)]
pub struct LoggingMiddleware;

impl Middleware for LoggingMiddleware {
    fn name(&self) -> &str {
        "logging"
    }

    fn handle(
        &mut self,
        state: &DocumentState,
        action: Action,
        _cx: &mut MiddlewareContext<'_>,
    ) -> MiddlewareOutcome {
        let payload = action
            .to_value()
            .get("payload")
            .cloned()
            .unwrap_or_default();
        debug!(
            action_type = action.body.type_name(),
            action_id = %action.meta.id,
            timestamp = action.meta.timestamp,
            payload = %payload,
            components = state.components.len(),
            sections = state.sections.len(),
            "dispatching action"
        );
        MiddlewareOutcome::Continue(action)
    }
}

/// Schedules a debounced save after every action that changes the persisted document.
#[derive(Debug)]
pub struct PersistenceMiddleware {
    delay_ms: u64,
}

impl PersistenceMiddleware {
    pub fn new(delay_ms: u64) -> Self {
        Self { delay_ms }
    }
}

impl Middleware for PersistenceMiddleware {
    fn name(&self) -> &str {
        "persistence"
    }

    fn handle(
        &mut self,
        state: &DocumentState,
        action: Action,
        cx: &mut MiddlewareContext<'_>,
    ) -> MiddlewareOutcome {
        if action.body.skips_persistence() {
            return MiddlewareOutcome::Continue(action);
        }
        let target = match state.meta.document_id.as_deref().filter(|_| state.has_durable_identity()) {
            Some(document_id) => {
                debug!(document_id, "host autosave owns this document; scheduling recovery copy");
                SaveTarget::EmergencyBackup {
                    document_id: document_id.to_string(),
                }
            }
            None => SaveTarget::Draft,
        };
        cx.effects.push(StoreEffect::ScheduleSave(SaveRequest {
            target,
            delay_ms: self.delay_ms,
        }));
        MiddlewareOutcome::Continue(action)
    }
}

/// Default chain for `config`: logging (debug mode only), validation, persistence (when enabled).
pub fn default_chain(config: &StoreConfig) -> Vec<Box<dyn Middleware>> {
    let mut chain: Vec<Box<dyn Middleware>> = Vec::new();
    if config.debug_mode {
        chain.push(Box::new(LoggingMiddleware));
    }
    chain.push(Box::new(ValidationMiddleware));
    if config.persistence_enabled {
        chain.push(Box::new(PersistenceMiddleware::new(config.persist_debounce_ms)));
    }
    chain
}
