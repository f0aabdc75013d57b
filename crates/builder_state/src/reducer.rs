//! Reducer transitions and side-effect intents for the builder document.

mod components;
mod sections;

use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    actions::BuilderAction,
    helpers::merge_preserving_sections,
    ingest::parse_document_value,
    model::{ComponentId, DocumentMeta, DocumentSnapshot, DocumentState, SectionId},
    normalize::normalize_document,
    patch::apply_field_patch,
    persistence::SaveRequest,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Inputs a transition may depend on besides the state and the action.
pub struct ReduceContext {
    /// Timestamp applied to `updated_at`, `last_modified`, and generated ids.
    pub now: u64,
    /// See [`crate::StoreConfig::auto_create_sections`].
    pub auto_create_sections: bool,
}

impl ReduceContext {
    pub fn new(now: u64) -> Self {
        Self {
            now,
            auto_create_sections: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
/// Side-effect intents for the composition root to execute after a commit.
pub enum StoreEffect {
    /// The renderer should attach controls to a newly created component.
    ComponentAdded(ComponentId),
    /// The renderer should drop controls for a removed component.
    ComponentRemoved(ComponentId),
    /// A debounced save should be (re)scheduled.
    ScheduleSave(SaveRequest),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
/// Reasons an action leaves the state unchanged.
pub enum ReducerError {
    #[error("unknown action type `{0}`")]
    UnknownAction(String),
    #[error("component `{0}` not found")]
    ComponentNotFound(ComponentId),
    #[error("section `{0}` not found")]
    SectionNotFound(SectionId),
    #[error("component `{0}` already exists")]
    DuplicateComponent(ComponentId),
    #[error("section `{0}` already exists")]
    DuplicateSection(SectionId),
    #[error("invalid payload for {action}: {reason}")]
    InvalidPayload { action: &'static str, reason: String },
    #[error("index {index} out of range for {len} entries")]
    IndexOutOfRange { index: usize, len: usize },
    /// Flat layout edits are rejected while the document has sections.
    #[error("flat layout edits are not allowed while sections exist")]
    LayoutInSectionMode,
    #[error("component `{0}` is not placed in a section or the layout")]
    ComponentNotPlaced(ComponentId),
    #[error("{0} is handled by the state manager")]
    ManagerOnly(&'static str),
}

/// Applies `action` to `state` and collects resulting side effects.
///
/// On `Err` the state may be partially modified; callers reduce into a working copy and discard
/// it on failure, which also makes [`BuilderAction::ApplyTransaction`] all-or-nothing.
///
/// # Errors
///
/// Returns [`ReducerError`] for unknown actions, references to missing components or sections,
/// and structurally invalid requests.
pub fn reduce_document(
    state: &mut DocumentState,
    action: &BuilderAction,
    ctx: &ReduceContext,
) -> Result<Vec<StoreEffect>, ReducerError> {
    let mut effects = Vec::new();
    let handled = components::reduce_component_action(state, action, ctx, &mut effects)?
        || sections::reduce_section_action(state, action, ctx, &mut effects)?;
    if !handled {
        reduce_document_level_action(state, action, ctx, &mut effects)?;
    }
    state.meta.last_modified = Some(ctx.now);
    Ok(effects)
}

fn reduce_document_level_action(
    state: &mut DocumentState,
    action: &BuilderAction,
    ctx: &ReduceContext,
    effects: &mut Vec<StoreEffect>,
) -> Result<(), ReducerError> {
    match action {
        BuilderAction::SetTheme { theme } => {
            let theme = theme.trim();
            if theme.is_empty() {
                return Err(ReducerError::InvalidPayload {
                    action: "SET_THEME",
                    reason: "theme must not be empty".to_string(),
                });
            }
            state.theme = theme.to_string();
        }
        BuilderAction::UpdateThemeSettings { settings } => {
            apply_field_patch(&mut state.theme_settings, settings);
        }
        BuilderAction::UpdateGlobalSettings { settings } => {
            apply_field_patch(&mut state.global_settings, settings);
        }
        BuilderAction::SetState { document } => {
            replace_normalized(state, document.as_ref().clone(), ctx.now, "SET_STATE");
        }
        BuilderAction::ResetState => {
            let meta = DocumentMeta {
                created_at: Some(ctx.now),
                author: state.meta.author.clone(),
                document_id: state.meta.document_id.clone(),
                ..DocumentMeta::default()
            };
            for id in state.components.keys() {
                effects.push(StoreEffect::ComponentRemoved(id.clone()));
            }
            state.replace_document(DocumentSnapshot {
                meta,
                ..DocumentSnapshot::default()
            });
        }
        BuilderAction::MergeState { patch } => {
            let document = merged_document(state, patch)?;
            replace_normalized(state, document, ctx.now, "MERGE_STATE");
        }
        BuilderAction::ApplyTransaction { actions } => {
            for step in actions {
                effects.extend(reduce_document(state, step, ctx)?);
            }
        }
        BuilderAction::SaveStateRequest => {
            state.ui.is_saving = true;
        }
        BuilderAction::SaveStateSuccess { saved_at } => {
            state.ui.is_saving = false;
            state.ui.last_saved = Some(*saved_at);
        }
        BuilderAction::SaveStateFailure { message } => {
            state.ui.is_saving = false;
            let message = if message.trim().is_empty() {
                "Failed to save state"
            } else {
                message.as_str()
            };
            state.push_error("SAVE_ERROR", message, ctx.now);
        }
        BuilderAction::SelectComponent { id } => {
            if !state.components.contains_key(id.as_str()) {
                return Err(ReducerError::ComponentNotFound(id.clone()));
            }
            state.ui.selected_component = Some(id.clone());
        }
        BuilderAction::DeselectComponent => {
            state.ui.selected_component = None;
        }
        BuilderAction::HoverComponent { id } => {
            if let Some(id) = id {
                if !state.components.contains_key(id.as_str()) {
                    return Err(ReducerError::ComponentNotFound(id.clone()));
                }
            }
            state.ui.hovered_component = id.clone();
        }
        BuilderAction::TogglePreviewMode => {
            state.ui.is_preview_mode = !state.ui.is_preview_mode;
        }
        BuilderAction::AddError {
            error_type,
            message,
        } => {
            state.push_error(error_type.clone(), message.clone(), ctx.now);
        }
        BuilderAction::ClearErrors => {
            state.errors.clear();
        }
        BuilderAction::Undo => return Err(ReducerError::ManagerOnly("UNDO")),
        BuilderAction::Redo => return Err(ReducerError::ManagerOnly("REDO")),
        BuilderAction::ClearHistory => return Err(ReducerError::ManagerOnly("CLEAR_HISTORY")),
        BuilderAction::Unrecognized { action_type, .. } => {
            return Err(ReducerError::UnknownAction(action_type.clone()))
        }
        other => {
            // Component, section, and layout variants are consumed by the sub-reducers.
            return Err(ReducerError::UnknownAction(other.type_name().to_string()));
        }
    }
    Ok(())
}

fn replace_normalized(state: &mut DocumentState, document: DocumentSnapshot, now: u64, source: &str) {
    let (document, report) = normalize_document(document, now);
    if !report.is_clean() {
        info!(
            source,
            stubs = report.stub_components.len(),
            folded = report.layout_folded_into_sections.len(),
            default_section = ?report.default_section,
            "repaired incoming document"
        );
    }
    state.replace_document(document);
}

fn merged_document(state: &DocumentState, patch: &Value) -> Result<DocumentSnapshot, ReducerError> {
    if !patch.is_object() {
        return Err(ReducerError::InvalidPayload {
            action: "MERGE_STATE",
            reason: "patch must be a JSON object".to_string(),
        });
    }
    let current = serde_json::to_value(state.snapshot()).map_err(|err| ReducerError::InvalidPayload {
        action: "MERGE_STATE",
        reason: err.to_string(),
    })?;
    let merged = merge_preserving_sections(&current, patch);
    let (document, _) = parse_document_value(&merged).map_err(|err| {
        warn!(error = %err, "merged document is unusable");
        ReducerError::InvalidPayload {
            action: "MERGE_STATE",
            reason: err.to_string(),
        }
    })?;
    Ok(document)
}
