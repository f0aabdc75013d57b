//! Typed partial updates for components, sections, and settings maps.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::model::{Component, Section};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Change applied to a single key of a JSON object.
pub enum FieldChange {
    /// Set the key to a value, inserting it when absent.
    Set(Value),
    /// Remove the key.
    Unset,
}

/// Per-key changes applied as a shallow merge.
pub type FieldPatch = BTreeMap<String, FieldChange>;

/// Builds a patch that sets every key in `values`.
pub fn field_patch_from(values: Map<String, Value>) -> FieldPatch {
    values
        .into_iter()
        .map(|(key, value)| (key, FieldChange::Set(value)))
        .collect()
}

pub fn apply_field_patch(target: &mut Map<String, Value>, patch: &FieldPatch) {
    for (key, change) in patch {
        match change {
            FieldChange::Set(value) => {
                target.insert(key.clone(), value.clone());
            }
            FieldChange::Unset => {
                target.remove(key);
            }
        }
    }
}

/// Captures the values `patch` is about to overwrite, so applying the result restores `target`.
pub fn previous_fields(target: &Map<String, Value>, patch: &FieldPatch) -> FieldPatch {
    patch
        .keys()
        .map(|key| {
            let change = match target.get(key) {
                Some(value) => FieldChange::Set(value.clone()),
                None => FieldChange::Unset,
            };
            (key.clone(), change)
        })
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Partial update for a [`Component`].
pub struct ComponentPatch {
    /// Replacement component type.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub component_type: Option<String>,
    /// Shallow changes to `props`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub props: FieldPatch,
    /// Shallow changes to `content`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub content: FieldPatch,
}

impl ComponentPatch {
    /// Patch that sets the given props.
    pub fn props(values: Map<String, Value>) -> Self {
        Self {
            props: field_patch_from(values),
            ..Self::default()
        }
    }

    /// Patch that sets the given content keys.
    pub fn content(values: Map<String, Value>) -> Self {
        Self {
            content: field_patch_from(values),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.component_type.is_none() && self.props.is_empty() && self.content.is_empty()
    }

    pub fn apply_to(&self, component: &mut Component) {
        if let Some(component_type) = self.component_type.as_ref() {
            component.component_type = component_type.clone();
        }
        apply_field_patch(&mut component.props, &self.props);
        apply_field_patch(&mut component.content, &self.content);
    }

    /// The patch that undoes `self` when applied after it.
    pub fn previous_of(&self, component: &Component) -> Self {
        Self {
            component_type: self
                .component_type
                .as_ref()
                .map(|_| component.component_type.clone()),
            props: previous_fields(&component.props, &self.props),
            content: previous_fields(&component.content, &self.content),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Partial update for a [`Section`]. `layout` and `section_options` are shallow-merged.
pub struct SectionPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_type: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub layout: FieldPatch,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub section_options: FieldPatch,
}

impl SectionPatch {
    pub fn is_empty(&self) -> bool {
        self.section_type.is_none() && self.layout.is_empty() && self.section_options.is_empty()
    }

    pub fn apply_to(&self, section: &mut Section) {
        if let Some(section_type) = self.section_type.as_ref() {
            section.section_type = section_type.clone();
        }
        apply_field_patch(&mut section.layout, &self.layout);
        apply_field_patch(&mut section.section_options, &self.section_options);
    }

    pub fn previous_of(&self, section: &Section) -> Self {
        Self {
            section_type: self
                .section_type
                .as_ref()
                .map(|_| section.section_type.clone()),
            layout: previous_fields(&section.layout, &self.layout),
            section_options: previous_fields(&section.section_options, &self.section_options),
        }
    }
}
