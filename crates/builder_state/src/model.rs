use std::{borrow::Borrow, collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Schema version written into persisted document envelopes.
pub const DOCUMENT_SCHEMA_VERSION: u32 = 1;
/// Document format version recorded in [`DocumentMeta::version`].
pub const DOCUMENT_FORMAT_VERSION: &str = "2.2.0";
pub const DEFAULT_THEME: &str = "default";
pub const DEFAULT_SECTION_TYPE: &str = "full_width";
pub const DEFAULT_COLUMN: u32 = 1;
pub const UNKNOWN_COMPONENT_TYPE: &str = "unknown";
/// Upper bound on retained [`StateError`] entries.
pub const MAX_ERRORS: usize = 100;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Blank ids are treated as missing.
            pub fn is_blank(&self) -> bool {
                self.0.trim().is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Caller-assigned component identity.
    ComponentId
);
string_id!(
    /// Section identity, unique within a document.
    SectionId
);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Component {
    pub id: ComponentId,
    #[serde(rename = "type")]
    pub component_type: String,
    #[serde(default)]
    pub props: Map<String, Value>,
    #[serde(default)]
    pub content: Map<String, Value>,
    #[serde(default)]
    pub section_id: Option<SectionId>,
    #[serde(default)]
    pub order: usize,
    #[serde(default)]
    pub created_at: u64,
    #[serde(default)]
    pub updated_at: u64,
}

/// One placement entry in a section's ordered membership list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionMember {
    pub component_id: ComponentId,
    #[serde(default = "default_column")]
    pub column: u32,
    #[serde(default)]
    pub order: usize,
    #[serde(default)]
    pub assigned_at: u64,
}

fn default_column() -> u32 {
    DEFAULT_COLUMN
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub section_id: SectionId,
    #[serde(default = "default_section_type")]
    pub section_type: String,
    #[serde(default)]
    pub components: Vec<SectionMember>,
    #[serde(default)]
    pub layout: Map<String, Value>,
    #[serde(default)]
    pub section_options: Map<String, Value>,
    #[serde(default)]
    pub created_at: u64,
    #[serde(default)]
    pub updated_at: u64,
}

fn default_section_type() -> String {
    DEFAULT_SECTION_TYPE.to_string()
}

impl Section {
    pub fn new(section_id: SectionId, section_type: impl Into<String>, now: u64) -> Self {
        Self {
            section_id,
            section_type: section_type.into(),
            components: Vec::new(),
            layout: Map::new(),
            section_options: Map::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn position_of(&self, component_id: &str) -> Option<usize> {
        self.components
            .iter()
            .position(|member| member.component_id.as_str() == component_id)
    }

    pub fn contains(&self, component_id: &str) -> bool {
        self.position_of(component_id).is_some()
    }

    pub fn member_ids(&self) -> impl Iterator<Item = &ComponentId> {
        self.components.iter().map(|member| &member.component_id)
    }

    /// Rewrites each member's `order` to its list index.
    pub fn renumber(&mut self) {
        for (index, member) in self.components.iter_mut().enumerate() {
            member.order = index;
        }
    }
}

/// Where a component renders from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Placement {
    /// Member of a section; `None` index appends, `None` column uses the default column.
    Section {
        section_id: SectionId,
        #[serde(default)]
        index: Option<usize>,
        #[serde(default)]
        column: Option<u32>,
    },
    /// Entry in the flat layout (only valid while the document has no sections).
    Layout {
        #[serde(default)]
        index: Option<usize>,
    },
    /// Present in the component map but not rendered.
    Unplaced,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiState {
    pub selected_component: Option<ComponentId>,
    pub hovered_component: Option<ComponentId>,
    pub is_preview_mode: bool,
    pub is_saving: bool,
    pub last_saved: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMeta {
    #[serde(default = "default_format_version")]
    pub version: String,
    #[serde(default)]
    pub last_modified: Option<u64>,
    #[serde(default)]
    pub created_at: Option<u64>,
    #[serde(default)]
    pub author: Option<String>,
    /// Durable host-assigned identity; `None` for drafts.
    #[serde(default)]
    pub document_id: Option<String>,
}

fn default_format_version() -> String {
    DOCUMENT_FORMAT_VERSION.to_string()
}

impl Default for DocumentMeta {
    fn default() -> Self {
        Self {
            version: default_format_version(),
            last_modified: None,
            created_at: None,
            author: None,
            document_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateError {
    #[serde(rename = "type")]
    pub error_type: String,
    pub message: String,
    pub timestamp: u64,
}

pub fn default_global_settings() -> Map<String, Value> {
    let mut settings = Map::new();
    settings.insert("layout".to_string(), json!("vertical"));
    settings.insert("responsive".to_string(), json!(true));
    settings.insert("autoSave".to_string(), json!(true));
    settings.insert("autoSaveInterval".to_string(), json!(30000));
    settings
}

/// The full canonical state owned by the state manager.
///
/// Undo/redo stacks are owned by [`crate::history::HistoryManager`], not stored here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentState {
    pub components: BTreeMap<ComponentId, Component>,
    pub layout: Vec<ComponentId>,
    pub sections: Vec<Section>,
    pub theme: String,
    pub theme_settings: Map<String, Value>,
    pub global_settings: Map<String, Value>,
    pub ui: UiState,
    pub meta: DocumentMeta,
    pub errors: Vec<StateError>,
}

impl Default for DocumentState {
    fn default() -> Self {
        Self {
            components: BTreeMap::new(),
            layout: Vec::new(),
            sections: Vec::new(),
            theme: DEFAULT_THEME.to_string(),
            theme_settings: Map::new(),
            global_settings: default_global_settings(),
            ui: UiState::default(),
            meta: DocumentMeta::default(),
            errors: Vec::new(),
        }
    }
}

impl DocumentState {
    pub fn has_sections(&self) -> bool {
        !self.sections.is_empty()
    }

    pub fn has_durable_identity(&self) -> bool {
        self.meta
            .document_id
            .as_deref()
            .map(|id| !id.trim().is_empty())
            .unwrap_or(false)
    }

    pub fn section(&self, section_id: &str) -> Option<&Section> {
        self.sections
            .iter()
            .find(|section| section.section_id.as_str() == section_id)
    }

    pub fn section_index(&self, section_id: &str) -> Option<usize> {
        self.sections
            .iter()
            .position(|section| section.section_id.as_str() == section_id)
    }

    /// Returns `(section index, member index)` of the section holding `component_id`.
    pub fn locate_in_sections(&self, component_id: &str) -> Option<(usize, usize)> {
        self.sections
            .iter()
            .enumerate()
            .find_map(|(section_index, section)| {
                section
                    .position_of(component_id)
                    .map(|member_index| (section_index, member_index))
            })
    }

    /// Resolves the current placement of a component with concrete indices.
    pub fn placement_of(&self, component_id: &str) -> Placement {
        if let Some((section_index, member_index)) = self.locate_in_sections(component_id) {
            let section = &self.sections[section_index];
            return Placement::Section {
                section_id: section.section_id.clone(),
                index: Some(member_index),
                column: Some(section.components[member_index].column),
            };
        }
        match self
            .layout
            .iter()
            .position(|id| id.as_str() == component_id)
        {
            Some(index) => Placement::Layout { index: Some(index) },
            None => Placement::Unplaced,
        }
    }

    /// Index of a component inside whichever container renders it.
    pub fn container_position(&self, component_id: &str) -> Option<usize> {
        match self.placement_of(component_id) {
            Placement::Section { index, .. } | Placement::Layout { index } => index,
            Placement::Unplaced => None,
        }
    }

    /// Persistable subset of the state.
    pub fn snapshot(&self) -> DocumentSnapshot {
        DocumentSnapshot {
            components: self.components.clone(),
            layout: self.layout.clone(),
            sections: self.sections.clone(),
            theme: self.theme.clone(),
            theme_settings: self.theme_settings.clone(),
            global_settings: self.global_settings.clone(),
            meta: self.meta.clone(),
        }
    }

    /// Replaces the document portion while keeping session state (UI flags, errors).
    pub fn replace_document(&mut self, document: DocumentSnapshot) {
        self.components = document.components;
        self.layout = document.layout;
        self.sections = document.sections;
        self.theme = document.theme;
        self.theme_settings = document.theme_settings;
        self.global_settings = document.global_settings;
        self.meta = document.meta;
        self.drop_stale_ui_references();
    }

    /// Clears UI pointers that reference components no longer present.
    pub fn drop_stale_ui_references(&mut self) {
        if let Some(selected) = self.ui.selected_component.as_ref() {
            if !self.components.contains_key(selected.as_str()) {
                self.ui.selected_component = None;
            }
        }
        if let Some(hovered) = self.ui.hovered_component.as_ref() {
            if !self.components.contains_key(hovered.as_str()) {
                self.ui.hovered_component = None;
            }
        }
    }

    pub fn push_error(&mut self, error_type: impl Into<String>, message: impl Into<String>, now: u64) {
        self.errors.push(StateError {
            error_type: error_type.into(),
            message: message.into(),
            timestamp: now,
        });
        if self.errors.len() > MAX_ERRORS {
            let overflow = self.errors.len() - MAX_ERRORS;
            self.errors.drain(0..overflow);
        }
    }
}

/// The persisted document: everything except session UI state and errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSnapshot {
    #[serde(default)]
    pub components: BTreeMap<ComponentId, Component>,
    #[serde(default)]
    pub layout: Vec<ComponentId>,
    #[serde(default)]
    pub sections: Vec<Section>,
    #[serde(default = "default_theme")]
    pub theme: String,
    #[serde(default)]
    pub theme_settings: Map<String, Value>,
    #[serde(default = "default_global_settings")]
    pub global_settings: Map<String, Value>,
    #[serde(default)]
    pub meta: DocumentMeta,
}

fn default_theme() -> String {
    DEFAULT_THEME.to_string()
}

impl Default for DocumentSnapshot {
    fn default() -> Self {
        DocumentState::default().snapshot()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn component(id: &str) -> Component {
        Component {
            id: ComponentId::from(id),
            component_type: "hero".to_string(),
            props: Map::new(),
            content: Map::new(),
            section_id: None,
            order: 0,
            created_at: 1,
            updated_at: 1,
        }
    }

    #[test]
    fn component_serializes_with_camel_case_and_type_key() {
        let mut c = component("c1");
        c.section_id = Some(SectionId::from("s1"));
        let value = serde_json::to_value(&c).expect("serialize");
        assert_eq!(value["type"], json!("hero"));
        assert_eq!(value["sectionId"], json!("s1"));
        assert_eq!(value["createdAt"], json!(1));
        assert!(value.get("component_type").is_none());
    }

    #[test]
    fn section_member_defaults_column_when_missing() {
        let member: SectionMember =
            serde_json::from_value(json!({"component_id": "c1"})).expect("member");
        assert_eq!(member.column, DEFAULT_COLUMN);
        assert_eq!(member.order, 0);
    }

    #[test]
    fn placement_reports_section_then_layout_then_unplaced() {
        let mut state = DocumentState::default();
        state.components.insert("a".into(), component("a"));
        state.components.insert("b".into(), component("b"));
        state.components.insert("c".into(), component("c"));
        let mut section = Section::new("s1".into(), DEFAULT_SECTION_TYPE, 1);
        section.components.push(SectionMember {
            component_id: "a".into(),
            column: 2,
            order: 0,
            assigned_at: 1,
        });
        state.sections.push(section);
        state.layout.push("b".into());

        assert_eq!(
            state.placement_of("a"),
            Placement::Section {
                section_id: "s1".into(),
                index: Some(0),
                column: Some(2),
            }
        );
        assert_eq!(state.placement_of("b"), Placement::Layout { index: Some(0) });
        assert_eq!(state.placement_of("c"), Placement::Unplaced);
    }

    #[test]
    fn replace_document_keeps_ui_flags_but_drops_stale_selection() {
        let mut state = DocumentState::default();
        state.components.insert("a".into(), component("a"));
        state.ui.selected_component = Some("a".into());
        state.ui.is_preview_mode = true;

        state.replace_document(DocumentSnapshot::default());

        assert_eq!(state.ui.selected_component, None);
        assert!(state.ui.is_preview_mode);
    }

    #[test]
    fn error_list_is_bounded() {
        let mut state = DocumentState::default();
        for n in 0..(MAX_ERRORS + 5) {
            state.push_error("SAVE_ERROR", format!("failure {n}"), n as u64);
        }
        assert_eq!(state.errors.len(), MAX_ERRORS);
        assert_eq!(state.errors[0].message, "failure 5");
    }

    #[test]
    fn snapshot_defaults_fill_missing_fields() {
        let snapshot: DocumentSnapshot = serde_json::from_value(json!({})).expect("snapshot");
        assert_eq!(snapshot.theme, DEFAULT_THEME);
        assert_eq!(snapshot.global_settings["layout"], json!("vertical"));
        assert_eq!(snapshot.meta.version, DOCUMENT_FORMAT_VERSION);
    }
}
