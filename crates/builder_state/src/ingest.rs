//! Lenient parsing of host-provided and stored documents.
//!
//! Accepts the canonical document shape (components as a map or an array) and the legacy
//! `{saved_components: [...]}` shape. Field-level problems are tolerated here and repaired by
//! [`crate::normalize`]; only structurally unusable input is rejected.

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

use crate::{
    model::{
        default_global_settings, Component, ComponentId, DocumentMeta, DocumentSnapshot, Section,
        SectionId, SectionMember, DEFAULT_COLUMN, DEFAULT_SECTION_TYPE, DEFAULT_THEME,
    },
    normalize::{normalize_loaded_document, RepairReport},
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IngestError {
    #[error("document source must be a JSON object")]
    NotAnObject,
    #[error("`{field}` must be {expected}")]
    WrongShape {
        field: &'static str,
        expected: &'static str,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Canonical,
    /// `{saved_components: [...]}` written by older clients.
    LegacySavedComponents,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IngestedDocument {
    pub document: DocumentSnapshot,
    pub format: SourceFormat,
    pub report: RepairReport,
}

/// Parses and normalizes a host source into a canonical document.
///
/// # Errors
///
/// Returns [`IngestError`] when the source is not an object or a top-level collection has the
/// wrong JSON type.
pub fn ingest_source(source: &Value, now: u64) -> Result<IngestedDocument, IngestError> {
    let mut reset_columns = Vec::new();
    let (document, format) = parse_document(source, &mut reset_columns)?;
    let (document, mut report) = normalize_loaded_document(document, now);
    report.reset_columns = reset_columns;
    Ok(IngestedDocument {
        document,
        format,
        report,
    })
}

/// Parses without normalizing.
///
/// # Errors
///
/// See [`ingest_source`].
pub fn parse_document_value(source: &Value) -> Result<(DocumentSnapshot, SourceFormat), IngestError> {
    parse_document(source, &mut Vec::new())
}

fn parse_document(
    source: &Value,
    reset_columns: &mut Vec<ComponentId>,
) -> Result<(DocumentSnapshot, SourceFormat), IngestError> {
    let object = source.as_object().ok_or(IngestError::NotAnObject)?;
    let legacy = object.contains_key("saved_components") && !object.contains_key("components");

    let mut document = DocumentSnapshot {
        theme: string_field(object, &["theme"]).unwrap_or_else(|| DEFAULT_THEME.to_string()),
        theme_settings: object_field(object, &["themeSettings", "theme_settings"]).unwrap_or_default(),
        global_settings: object_field(object, &["globalSettings", "global_settings"])
            .unwrap_or_else(default_global_settings),
        meta: parse_meta(object),
        ..DocumentSnapshot::default()
    };

    let format = if legacy {
        let (components, layout) = parse_component_list(object.get("saved_components"), "saved_components")?;
        document.components = components;
        document.layout = layout;
        SourceFormat::LegacySavedComponents
    } else {
        match object.get("components") {
            None | Some(Value::Null) => {}
            Some(Value::Object(map)) => {
                document.components = map
                    .iter()
                    .map(|(key, value)| {
                        let component = parse_component(Some(key), value);
                        (component.id.clone(), component)
                    })
                    .collect();
            }
            Some(list @ Value::Array(_)) => {
                let (components, _) = parse_component_list(Some(list), "components")?;
                document.components = components;
            }
            Some(_) => {
                return Err(IngestError::WrongShape {
                    field: "components",
                    expected: "an object or an array",
                })
            }
        }
        SourceFormat::Canonical
    };

    if let Some(layout) = object.get("layout") {
        document.layout = parse_id_list(layout, "layout")?;
    }
    match object.get("sections") {
        None | Some(Value::Null) => {}
        Some(Value::Array(sections)) => {
            document.sections = sections
                .iter()
                .filter_map(|section| parse_section(section, reset_columns))
                .collect();
        }
        Some(_) => {
            return Err(IngestError::WrongShape {
                field: "sections",
                expected: "an array",
            })
        }
    }
    Ok((document, format))
}

fn string_field(object: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| object.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}

fn object_field(object: &Map<String, Value>, keys: &[&str]) -> Option<Map<String, Value>> {
    keys.iter()
        .find_map(|key| object.get(*key).and_then(Value::as_object))
        .cloned()
}

fn u64_field(object: &Map<String, Value>, keys: &[&str]) -> Option<u64> {
    keys.iter()
        .find_map(|key| object.get(*key).and_then(Value::as_u64))
}

fn parse_meta(object: &Map<String, Value>) -> DocumentMeta {
    let mut meta = DocumentMeta::default();
    if let Some(version) = string_field(object, &["version"]) {
        meta.version = version;
    }
    let Some(raw) = object.get("meta").and_then(Value::as_object) else {
        return meta;
    };
    if let Some(version) = string_field(raw, &["version"]) {
        meta.version = version;
    }
    meta.last_modified = u64_field(raw, &["lastModified", "last_modified"]);
    meta.created_at = u64_field(raw, &["createdAt", "created_at"]);
    meta.author = string_field(raw, &["author"]);
    meta.document_id = string_field(raw, &["documentId", "document_id"])
        .or_else(|| u64_field(raw, &["documentId", "document_id"]).map(|id| id.to_string()));
    meta
}

fn parse_component(key: Option<&str>, value: &Value) -> Component {
    let empty = Map::new();
    let object = value.as_object().unwrap_or(&empty);
    let id = key
        .map(str::to_string)
        .or_else(|| string_field(object, &["id"]))
        .unwrap_or_default();
    Component {
        id: ComponentId(id),
        component_type: string_field(object, &["type", "component_type"]).unwrap_or_default(),
        props: object_field(object, &["props"]).unwrap_or_default(),
        content: object_field(object, &["content", "data"]).unwrap_or_default(),
        section_id: string_field(object, &["sectionId", "section_id"]).map(SectionId),
        order: u64_field(object, &["order"]).unwrap_or_default() as usize,
        created_at: u64_field(object, &["createdAt", "created_at"]).unwrap_or_default(),
        updated_at: u64_field(object, &["updatedAt", "updated_at"]).unwrap_or_default(),
    }
}

type ComponentList = (BTreeMap<ComponentId, Component>, Vec<ComponentId>);

fn parse_component_list(list: Option<&Value>, field: &'static str) -> Result<ComponentList, IngestError> {
    let entries = match list {
        None | Some(Value::Null) => return Ok((BTreeMap::new(), Vec::new())),
        Some(Value::Array(entries)) => entries,
        Some(_) => {
            return Err(IngestError::WrongShape {
                field,
                expected: "an array",
            })
        }
    };
    let mut components = BTreeMap::new();
    let mut order = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        let mut component = parse_component(None, entry);
        if component.id.is_blank() {
            warn!(field, index, "dropping component entry without an id");
            continue;
        }
        if components.contains_key(component.id.as_str()) {
            warn!(field, id = %component.id, "dropping repeated component entry");
            continue;
        }
        if u64_field(entry.as_object().unwrap_or(&Map::new()), &["order"]).is_none() {
            component.order = index;
        }
        order.push(component.id.clone());
        components.insert(component.id.clone(), component);
    }
    Ok((components, order))
}

fn parse_id_list(value: &Value, field: &'static str) -> Result<Vec<ComponentId>, IngestError> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(entries) => Ok(entries
            .iter()
            .filter_map(|entry| match entry {
                Value::String(id) => Some(ComponentId(id.clone())),
                Value::Object(object) => string_field(object, &["id", "component_id"]).map(ComponentId),
                _ => None,
            })
            .filter(|id| !id.is_blank())
            .collect()),
        _ => Err(IngestError::WrongShape {
            field,
            expected: "an array of ids",
        }),
    }
}

fn parse_section(value: &Value, reset_columns: &mut Vec<ComponentId>) -> Option<Section> {
    let Some(object) = value.as_object() else {
        warn!("dropping non-object section entry");
        return None;
    };
    let section_id = string_field(object, &["section_id", "sectionId", "id"]).unwrap_or_default();
    let members = object
        .get("components")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| parse_member(entry, reset_columns))
                .collect()
        })
        .unwrap_or_default();
    let created_at = u64_field(object, &["created_at", "createdAt"]).unwrap_or_default();
    Some(Section {
        section_id: SectionId(section_id),
        section_type: string_field(object, &["section_type", "sectionType", "type"])
            .unwrap_or_else(|| DEFAULT_SECTION_TYPE.to_string()),
        components: members,
        layout: object_field(object, &["layout"]).unwrap_or_default(),
        section_options: object_field(object, &["section_options", "sectionOptions"]).unwrap_or_default(),
        created_at,
        updated_at: u64_field(object, &["updated_at", "updatedAt"]).unwrap_or(created_at),
    })
}

fn parse_member(value: &Value, reset_columns: &mut Vec<ComponentId>) -> Option<SectionMember> {
    let (id, object) = match value {
        Value::String(id) => (id.clone(), None),
        Value::Object(object) => (string_field(object, &["component_id", "componentId", "id"])?, Some(object)),
        _ => return None,
    };
    if id.trim().is_empty() {
        return None;
    }
    let field = |keys: &[&str]| object.and_then(|object| u64_field(object, keys));
    let column = match field(&["column"]).map(u32::try_from) {
        None => DEFAULT_COLUMN,
        Some(Ok(column)) => column,
        Some(Err(_)) => {
            warn!(component_id = %id, "section member column out of range, using the default column");
            reset_columns.push(ComponentId(id.clone()));
            DEFAULT_COLUMN
        }
    };
    Some(SectionMember {
        component_id: ComponentId(id),
        column,
        order: field(&["order"])
            .and_then(|order| usize::try_from(order).ok())
            .unwrap_or_default(),
        assigned_at: field(&["assigned_at", "assignedAt"]).unwrap_or_default(),
    })
}
