//! Closed action catalog, typed action payloads, and the stamped action envelope.

use std::{collections::BTreeMap, fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::{
    ids,
    model::{Component, ComponentId, DocumentSnapshot, Placement, Section, SectionId},
    patch::{ComponentPatch, FieldPatch, SectionPatch},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Concern an action type belongs to.
pub enum ActionGroup {
    Component,
    Layout,
    Section,
    Theme,
    Settings,
    State,
    Transaction,
    Persistence,
    Ui,
    History,
    Error,
}

macro_rules! action_catalog {
    ($($variant:ident => ($name:literal, $group:ident)),+ $(,)?) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        /// Every action type the store understands.
        pub enum ActionKind {
            $(
                #[doc = $name]
                $variant,
            )+
        }

        impl ActionKind {
            /// The full catalog, in declaration order.
            pub const ALL: &'static [ActionKind] = &[$(ActionKind::$variant),+];

            /// Wire name, e.g. `ADD_COMPONENT`.
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $name,)+
                }
            }

            pub const fn group(self) -> ActionGroup {
                match self {
                    $(Self::$variant => ActionGroup::$group,)+
                }
            }
        }
    };
}

action_catalog! {
    AddComponent => ("ADD_COMPONENT", Component),
    UpdateComponent => ("UPDATE_COMPONENT", Component),
    DeleteComponent => ("DELETE_COMPONENT", Component),
    RemoveComponent => ("REMOVE_COMPONENT", Component),
    MoveComponent => ("MOVE_COMPONENT", Component),
    DuplicateComponent => ("DUPLICATE_COMPONENT", Component),
    BatchUpdateComponents => ("BATCH_UPDATE_COMPONENTS", Component),
    ClearAllComponents => ("CLEAR_ALL_COMPONENTS", Component),
    SetLayout => ("SET_LAYOUT", Layout),
    UpdateLayoutOrder => ("UPDATE_LAYOUT_ORDER", Layout),
    ReorderComponents => ("REORDER_COMPONENTS", Layout),
    AddSection => ("ADD_SECTION", Section),
    UpdateSection => ("UPDATE_SECTION", Section),
    DeleteSection => ("DELETE_SECTION", Section),
    UpdateSections => ("UPDATE_SECTIONS", Section),
    AssignComponentToSection => ("ASSIGN_COMPONENT_TO_SECTION", Section),
    RemoveComponentFromSection => ("REMOVE_COMPONENT_FROM_SECTION", Section),
    RestoreSection => ("RESTORE_SECTION", Section),
    SetTheme => ("SET_THEME", Theme),
    UpdateThemeSettings => ("UPDATE_THEME_SETTINGS", Theme),
    UpdateGlobalSettings => ("UPDATE_GLOBAL_SETTINGS", Settings),
    SetState => ("SET_STATE", State),
    ResetState => ("RESET_STATE", State),
    MergeState => ("MERGE_STATE", State),
    ApplyTransaction => ("APPLY_TRANSACTION", Transaction),
    SaveStateRequest => ("SAVE_STATE_REQUEST", Persistence),
    SaveStateSuccess => ("SAVE_STATE_SUCCESS", Persistence),
    SaveStateFailure => ("SAVE_STATE_FAILURE", Persistence),
    SelectComponent => ("SELECT_COMPONENT", Ui),
    DeselectComponent => ("DESELECT_COMPONENT", Ui),
    HoverComponent => ("HOVER_COMPONENT", Ui),
    TogglePreviewMode => ("TOGGLE_PREVIEW_MODE", Ui),
    Undo => ("UNDO", History),
    Redo => ("REDO", History),
    ClearHistory => ("CLEAR_HISTORY", History),
    AddError => ("ADD_ERROR", Error),
    ClearErrors => ("CLEAR_ERRORS", Error),
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown action type `{0}`")]
pub struct UnknownActionType(pub String);

impl FromStr for ActionKind {
    type Err = UnknownActionType;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == value)
            .ok_or_else(|| UnknownActionType(value.to_string()))
    }
}

pub fn is_valid_action_type(action_type: &str) -> bool {
    action_type.parse::<ActionKind>().is_ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Target of a `MOVE_COMPONENT` inside the component's current container.
pub enum MoveTarget {
    /// Swap with the previous sibling (no-op at the top).
    Up,
    /// Swap with the next sibling (no-op at the bottom).
    Down,
    /// Remove and reinsert at the given index (clamped to the container length).
    Index(usize),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Payload of `ADD_COMPONENT`.
pub struct ComponentDraft {
    #[serde(default)]
    pub id: ComponentId,
    #[serde(default, rename = "type")]
    pub component_type: Option<String>,
    #[serde(default)]
    pub props: Map<String, Value>,
    #[serde(default)]
    pub content: Map<String, Value>,
    /// Shorthand for appending to a section; `placement` wins when both are set.
    #[serde(default)]
    pub section_id: Option<SectionId>,
    #[serde(default)]
    pub placement: Option<Placement>,
    #[serde(default)]
    pub order: Option<usize>,
    #[serde(default)]
    pub created_at: Option<u64>,
    #[serde(default)]
    pub updated_at: Option<u64>,
}

impl ComponentDraft {
    pub fn new(id: impl Into<ComponentId>, component_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            component_type: Some(component_type.into()),
            ..Self::default()
        }
    }

    pub fn with_props(mut self, props: Map<String, Value>) -> Self {
        self.props = props;
        self
    }

    pub fn in_section(mut self, section_id: impl Into<SectionId>) -> Self {
        self.section_id = Some(section_id.into());
        self
    }

    pub fn at(mut self, placement: Placement) -> Self {
        self.placement = Some(placement);
        self
    }

    /// Draft that recreates `component` exactly, at `placement`.
    pub fn from_component(component: &Component, placement: Placement) -> Self {
        Self {
            id: component.id.clone(),
            component_type: Some(component.component_type.clone()),
            props: component.props.clone(),
            content: component.content.clone(),
            section_id: None,
            placement: Some(placement),
            order: Some(component.order),
            created_at: Some(component.created_at),
            updated_at: Some(component.updated_at),
        }
    }

    pub fn requested_placement(&self) -> Option<Placement> {
        self.placement.clone().or_else(|| {
            self.section_id.clone().map(|section_id| Placement::Section {
                section_id,
                index: None,
                column: None,
            })
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Payload of `ADD_SECTION`.
pub struct SectionDraft {
    /// Generated by the validation middleware when absent.
    #[serde(default)]
    pub section_id: Option<SectionId>,
    #[serde(default)]
    pub section_type: Option<String>,
    #[serde(default)]
    pub layout: Map<String, Value>,
    #[serde(default)]
    pub section_options: Map<String, Value>,
    /// Components moved into the new section, in order.
    #[serde(default)]
    pub components: Vec<ComponentId>,
    /// Insert position among sections; appends when absent.
    #[serde(default)]
    pub index: Option<usize>,
}

impl SectionDraft {
    pub fn new(section_id: impl Into<SectionId>, section_type: impl Into<String>) -> Self {
        Self {
            section_id: Some(section_id.into()),
            section_type: Some(section_type.into()),
            ..Self::default()
        }
    }

    /// Draft recreating an empty copy of `section` at `index`.
    pub fn from_section(section: &Section, index: usize) -> Self {
        Self {
            section_id: Some(section.section_id.clone()),
            section_type: Some(section.section_type.clone()),
            layout: section.layout.clone(),
            section_options: section.section_options.clone(),
            components: Vec::new(),
            index: Some(index),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
/// Typed action bodies accepted by [`crate::reduce_document`] and the state manager.
pub enum BuilderAction {
    /// Create a component and place it in a section or the flat layout.
    AddComponent(ComponentDraft),
    /// Shallow-merge changes into a component.
    UpdateComponent {
        id: ComponentId,
        updates: ComponentPatch,
        /// Values the update overwrites; captured by the manager or middleware when absent.
        #[serde(default)]
        previous: Option<ComponentPatch>,
    },
    DeleteComponent {
        id: ComponentId,
    },
    RemoveComponent {
        id: ComponentId,
    },
    #[serde(rename_all = "camelCase")]
    MoveComponent {
        component_id: ComponentId,
        target: MoveTarget,
    },
    #[serde(rename_all = "camelCase")]
    DuplicateComponent {
        component_id: ComponentId,
        /// Generated by the validation middleware when absent.
        #[serde(default)]
        new_id: Option<ComponentId>,
    },
    BatchUpdateComponents {
        updates: BTreeMap<ComponentId, ComponentPatch>,
    },
    ClearAllComponents,
    /// Replace the flat layout. Rejected while sections exist.
    SetLayout {
        layout: Vec<ComponentId>,
    },
    #[serde(rename_all = "camelCase")]
    UpdateLayoutOrder {
        from_index: usize,
        to_index: usize,
    },
    #[serde(rename_all = "camelCase")]
    ReorderComponents {
        from_index: usize,
        to_index: usize,
    },
    AddSection(SectionDraft),
    #[serde(rename_all = "camelCase")]
    UpdateSection {
        section_id: SectionId,
        updates: SectionPatch,
        #[serde(default)]
        previous: Option<SectionPatch>,
    },
    /// Remove a section; its components move to a neighbouring section or the flat layout.
    #[serde(rename_all = "camelCase")]
    DeleteSection {
        section_id: SectionId,
    },
    /// Replace the section list; the result is normalized.
    UpdateSections {
        sections: Vec<Section>,
    },
    #[serde(rename_all = "camelCase")]
    AssignComponentToSection {
        component_id: ComponentId,
        section_id: SectionId,
        #[serde(default)]
        column: Option<u32>,
        #[serde(default)]
        index: Option<usize>,
    },
    #[serde(rename_all = "camelCase")]
    RemoveComponentFromSection {
        component_id: ComponentId,
    },
    /// Reinsert a previously deleted section with its exact membership.
    RestoreSection {
        section: Section,
        index: usize,
    },
    SetTheme {
        theme: String,
    },
    UpdateThemeSettings {
        settings: FieldPatch,
    },
    UpdateGlobalSettings {
        settings: FieldPatch,
    },
    /// Replace the document; the result is normalized.
    SetState {
        document: Box<DocumentSnapshot>,
    },
    /// Return to an empty document, keeping the durable identity and author.
    ResetState,
    /// Deep-merge a partial document; populated sections survive an empty incoming list.
    MergeState {
        patch: Value,
    },
    /// Apply sub-actions in order, all or nothing.
    ApplyTransaction {
        actions: Vec<BuilderAction>,
    },
    SaveStateRequest,
    #[serde(rename_all = "camelCase")]
    SaveStateSuccess {
        saved_at: u64,
    },
    SaveStateFailure {
        message: String,
    },
    SelectComponent {
        id: ComponentId,
    },
    DeselectComponent,
    HoverComponent {
        #[serde(default)]
        id: Option<ComponentId>,
    },
    TogglePreviewMode,
    Undo,
    Redo,
    ClearHistory,
    #[serde(rename_all = "camelCase")]
    AddError {
        error_type: String,
        message: String,
    },
    ClearErrors,
    /// A wire action whose type is not in the catalog.
    #[serde(skip)]
    Unrecognized {
        action_type: String,
        payload: Value,
    },
}

impl BuilderAction {
    /// Catalog entry, or `None` for [`BuilderAction::Unrecognized`].
    pub fn kind(&self) -> Option<ActionKind> {
        let kind = match self {
            Self::AddComponent(_) => ActionKind::AddComponent,
            Self::UpdateComponent { .. } => ActionKind::UpdateComponent,
            Self::DeleteComponent { .. } => ActionKind::DeleteComponent,
            Self::RemoveComponent { .. } => ActionKind::RemoveComponent,
            Self::MoveComponent { .. } => ActionKind::MoveComponent,
            Self::DuplicateComponent { .. } => ActionKind::DuplicateComponent,
            Self::BatchUpdateComponents { .. } => ActionKind::BatchUpdateComponents,
            Self::ClearAllComponents => ActionKind::ClearAllComponents,
            Self::SetLayout { .. } => ActionKind::SetLayout,
            Self::UpdateLayoutOrder { .. } => ActionKind::UpdateLayoutOrder,
            Self::ReorderComponents { .. } => ActionKind::ReorderComponents,
            Self::AddSection(_) => ActionKind::AddSection,
            Self::UpdateSection { .. } => ActionKind::UpdateSection,
            Self::DeleteSection { .. } => ActionKind::DeleteSection,
            Self::UpdateSections { .. } => ActionKind::UpdateSections,
            Self::AssignComponentToSection { .. } => ActionKind::AssignComponentToSection,
            Self::RemoveComponentFromSection { .. } => ActionKind::RemoveComponentFromSection,
            Self::RestoreSection { .. } => ActionKind::RestoreSection,
            Self::SetTheme { .. } => ActionKind::SetTheme,
            Self::UpdateThemeSettings { .. } => ActionKind::UpdateThemeSettings,
            Self::UpdateGlobalSettings { .. } => ActionKind::UpdateGlobalSettings,
            Self::SetState { .. } => ActionKind::SetState,
            Self::ResetState => ActionKind::ResetState,
            Self::MergeState { .. } => ActionKind::MergeState,
            Self::ApplyTransaction { .. } => ActionKind::ApplyTransaction,
            Self::SaveStateRequest => ActionKind::SaveStateRequest,
            Self::SaveStateSuccess { .. } => ActionKind::SaveStateSuccess,
            Self::SaveStateFailure { .. } => ActionKind::SaveStateFailure,
            Self::SelectComponent { .. } => ActionKind::SelectComponent,
            Self::DeselectComponent => ActionKind::DeselectComponent,
            Self::HoverComponent { .. } => ActionKind::HoverComponent,
            Self::TogglePreviewMode => ActionKind::TogglePreviewMode,
            Self::Undo => ActionKind::Undo,
            Self::Redo => ActionKind::Redo,
            Self::ClearHistory => ActionKind::ClearHistory,
            Self::AddError { .. } => ActionKind::AddError,
            Self::ClearErrors => ActionKind::ClearErrors,
            Self::Unrecognized { .. } => return None,
        };
        Some(kind)
    }

    /// Wire type name, including the raw name of unrecognized actions.
    pub fn type_name(&self) -> &str {
        match self {
            Self::Unrecognized { action_type, .. } => action_type,
            other => other.kind().map(ActionKind::as_str).unwrap_or_default(),
        }
    }

    pub fn group(&self) -> Option<ActionGroup> {
        self.kind().map(ActionKind::group)
    }

    /// Session-only actions that never enter undo history.
    pub fn is_history_exempt(&self) -> bool {
        match self.group() {
            Some(group) => matches!(
                group,
                ActionGroup::Persistence | ActionGroup::Ui | ActionGroup::History | ActionGroup::Error
            ),
            None => true,
        }
    }

    /// Actions that do not change the persisted document.
    pub fn skips_persistence(&self) -> bool {
        self.is_history_exempt()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionMeta {
    pub timestamp: u64,
    pub id: String,
}

impl ActionMeta {
    pub fn stamped(now: u64) -> Self {
        Self {
            timestamp: now,
            id: ids::next_action_id(now),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
/// An action body stamped with its creation time and unique id.
pub struct Action {
    pub body: BuilderAction,
    pub meta: ActionMeta,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionDecodeError {
    #[error("action must be a JSON object")]
    NotAnObject,
    #[error("action is missing a string `type`")]
    MissingType,
    #[error("invalid payload for {action_type}: {reason}")]
    InvalidPayload { action_type: String, reason: String },
}

impl Action {
    /// Stamps `body` with the current wall clock.
    pub fn new(body: BuilderAction) -> Self {
        Self::stamped(body, builder_host::unix_time_ms_now())
    }

    pub fn stamped(body: BuilderAction, now: u64) -> Self {
        Self {
            body,
            meta: ActionMeta::stamped(now),
        }
    }

    /// Decodes the wire shape `{type, payload, meta}`.
    ///
    /// Unknown types decode to [`BuilderAction::Unrecognized`]; a missing `meta` is stamped with
    /// `now`.
    ///
    /// # Errors
    ///
    /// Returns [`ActionDecodeError`] when the value is not an object, has no type, or carries a
    /// payload that does not match a known type.
    pub fn from_value(value: &Value, now: u64) -> Result<Self, ActionDecodeError> {
        let object = value.as_object().ok_or(ActionDecodeError::NotAnObject)?;
        let action_type = object
            .get("type")
            .and_then(Value::as_str)
            .ok_or(ActionDecodeError::MissingType)?;
        let payload = object.get("payload").filter(|payload| !payload.is_null());

        let body = if is_valid_action_type(action_type) {
            let mut wire = Map::new();
            wire.insert("type".to_string(), Value::String(action_type.to_string()));
            if let Some(payload) = payload {
                wire.insert("payload".to_string(), payload.clone());
            }
            serde_json::from_value(Value::Object(wire)).map_err(|err| {
                ActionDecodeError::InvalidPayload {
                    action_type: action_type.to_string(),
                    reason: err.to_string(),
                }
            })?
        } else {
            BuilderAction::Unrecognized {
                action_type: action_type.to_string(),
                payload: payload.cloned().unwrap_or(Value::Null),
            }
        };

        let meta = object
            .get("meta")
            .and_then(|meta| serde_json::from_value::<ActionMeta>(meta.clone()).ok())
            .unwrap_or_else(|| ActionMeta::stamped(now));
        Ok(Self { body, meta })
    }

    /// Encodes the wire shape `{type, payload, meta}`.
    pub fn to_value(&self) -> Value {
        let mut value = match &self.body {
            BuilderAction::Unrecognized {
                action_type,
                payload,
            } => json!({ "type": action_type, "payload": payload }),
            body => serde_json::to_value(body)
                .unwrap_or_else(|_| json!({ "type": body.type_name() })),
        };
        if let Some(object) = value.as_object_mut() {
            object.insert(
                "meta".to_string(),
                json!({ "timestamp": self.meta.timestamp, "id": self.meta.id }),
            );
        }
        value
    }
}

impl From<BuilderAction> for Action {
    fn from(body: BuilderAction) -> Self {
        Self::new(body)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn catalog_names_round_trip_and_are_unique() {
        let mut names = ActionKind::ALL
            .iter()
            .map(|kind| kind.as_str())
            .collect::<Vec<_>>();
        for kind in ActionKind::ALL {
            assert_eq!(kind.as_str().parse::<ActionKind>(), Ok(*kind));
        }
        let total = names.len();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), total);
        assert!(!is_valid_action_type("ADD_WIDGET"));
    }

    #[test]
    fn groups_follow_the_catalog() {
        assert_eq!(ActionKind::ReorderComponents.group(), ActionGroup::Layout);
        assert_eq!(ActionKind::RestoreSection.group(), ActionGroup::Section);
        assert_eq!(ActionKind::ApplyTransaction.group(), ActionGroup::Transaction);
        assert_eq!(ActionKind::ClearErrors.group(), ActionGroup::Error);
    }

    #[test]
    fn exemptions_cover_session_only_groups() {
        assert!(BuilderAction::TogglePreviewMode.is_history_exempt());
        assert!(BuilderAction::SaveStateRequest.skips_persistence());
        assert!(BuilderAction::Undo.is_history_exempt());
        assert!(!BuilderAction::ResetState.is_history_exempt());
        assert!(!BuilderAction::SetTheme {
            theme: "dark".to_string()
        }
        .skips_persistence());
    }

    #[test]
    fn decodes_wire_action_with_camel_case_payload() {
        let action = Action::from_value(
            &json!({
                "type": "MOVE_COMPONENT",
                "payload": {"componentId": "hero-1", "target": {"index": 2}},
                "meta": {"timestamp": 9, "id": "action_9_x"},
            }),
            100,
        )
        .expect("decode");
        assert_eq!(
            action.body,
            BuilderAction::MoveComponent {
                component_id: "hero-1".into(),
                target: MoveTarget::Index(2),
            }
        );
        assert_eq!(action.meta.timestamp, 9);
        assert_eq!(action.meta.id, "action_9_x");
    }

    #[test]
    fn decodes_unit_actions_without_payload_and_stamps_missing_meta() {
        let action = Action::from_value(&json!({"type": "RESET_STATE"}), 42).expect("decode");
        assert_eq!(action.body, BuilderAction::ResetState);
        assert_eq!(action.meta.timestamp, 42);
    }

    #[test]
    fn unknown_types_decode_to_unrecognized() {
        let action =
            Action::from_value(&json!({"type": "EXPLODE", "payload": {"x": 1}}), 1).expect("decode");
        assert_eq!(action.body.type_name(), "EXPLODE");
        assert_eq!(action.body.kind(), None);
        assert_eq!(action.to_value()["payload"], json!({"x": 1}));
    }

    #[test]
    fn malformed_payload_is_rejected() {
        let err = Action::from_value(&json!({"type": "SET_THEME", "payload": {"theme": 3}}), 1)
            .expect_err("bad payload");
        assert!(matches!(err, ActionDecodeError::InvalidPayload { .. }));
        assert_eq!(
            Action::from_value(&json!({"payload": {}}), 1),
            Err(ActionDecodeError::MissingType)
        );
    }

    #[test]
    fn encodes_type_payload_and_meta() {
        let action = Action::stamped(
            BuilderAction::AddComponent(ComponentDraft::new("hero-1", "hero")),
            5,
        );
        let value = action.to_value();
        assert_eq!(value["type"], json!("ADD_COMPONENT"));
        assert_eq!(value["payload"]["id"], json!("hero-1"));
        assert_eq!(value["payload"]["type"], json!("hero"));
        assert_eq!(value["meta"]["timestamp"], json!(5));

        let decoded = Action::from_value(&value, 0).expect("decode");
        assert_eq!(decoded, action);
    }

    #[test]
    fn draft_placement_prefers_explicit_placement() {
        let draft = ComponentDraft::new("a", "hero").in_section("s1");
        assert_eq!(
            draft.requested_placement(),
            Some(Placement::Section {
                section_id: "s1".into(),
                index: None,
                column: None,
            })
        );
        let draft = draft.at(Placement::Layout { index: Some(0) });
        assert_eq!(
            draft.requested_placement(),
            Some(Placement::Layout { index: Some(0) })
        );
    }
}
