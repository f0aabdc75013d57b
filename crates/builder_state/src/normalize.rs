//! Pure repair pass bringing an arbitrary document into canonical shape.
//!
//! After [`normalize_document`] every section member and layout id resolves to a component,
//! components are placed exclusively in sections or the flat layout, and each component's
//! `section_id` matches its membership. Running it on a canonical document changes nothing,
//! including documents that hold unplaced components.
//!
//! [`normalize_loaded_document`] additionally gathers unplaced components into a default section
//! when a loaded document has no sections and no layout. Only hydration uses it; documents
//! installed by the reducer (including history snapshots) keep their placement as captured.

use std::collections::{BTreeMap, HashSet};

use serde_json::Map;

use crate::{
    ids,
    model::{
        Component, ComponentId, DocumentSnapshot, Section, SectionId, SectionMember,
        DEFAULT_COLUMN, DEFAULT_SECTION_TYPE, UNKNOWN_COMPONENT_TYPE,
    },
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// What [`normalize_document`] had to change.
pub struct RepairReport {
    /// Components whose embedded id disagreed with their map key.
    pub rekeyed_components: Vec<ComponentId>,
    /// Components whose empty type was inferred from the id.
    pub recovered_types: Vec<ComponentId>,
    /// Stub components created for dangling references.
    pub stub_components: Vec<ComponentId>,
    /// Sections that had no id and received a generated one.
    pub generated_section_ids: Vec<SectionId>,
    /// Duplicate sections folded into their first occurrence.
    pub merged_sections: Vec<SectionId>,
    /// Repeated membership or layout references dropped.
    pub dropped_duplicate_references: usize,
    /// Flat-layout entries moved into the first section.
    pub layout_folded_into_sections: Vec<ComponentId>,
    /// Section created to adopt unplaced components.
    pub default_section: Option<SectionId>,
    /// Components whose `section_id` was resynchronized.
    pub section_links_fixed: usize,
    /// Members whose stored column did not fit and was reset to the default column.
    pub reset_columns: Vec<ComponentId>,
}

impl RepairReport {
    pub fn is_clean(&self) -> bool {
        self == &Self::default()
    }
}

/// Infers a component type from id conventions such as `hero-12` or `topics_3`.
pub fn infer_component_type(id: &str) -> String {
    let lower = id.trim().to_ascii_lowercase();
    if !lower.contains(['-', '_']) {
        return UNKNOWN_COMPONENT_TYPE.to_string();
    }
    let prefix = lower.split(['-', '_']).next().unwrap_or_default();
    match prefix {
        "topic" | "topics" => "topics".to_string(),
        "hero" | "header" => "hero".to_string(),
        "bio" | "biography" => "biography".to_string(),
        other if !other.is_empty() && other.chars().all(|c| c.is_ascii_alphabetic()) => {
            other.to_string()
        }
        _ => UNKNOWN_COMPONENT_TYPE.to_string(),
    }
}

/// Placeholder for a referenced component that is missing from the map.
pub fn stub_component(id: &ComponentId, now: u64) -> Component {
    Component {
        id: id.clone(),
        component_type: infer_component_type(id.as_str()),
        props: Map::new(),
        content: Map::new(),
        section_id: None,
        order: 0,
        created_at: now,
        updated_at: now,
    }
}

pub fn normalize_document(mut document: DocumentSnapshot, now: u64) -> (DocumentSnapshot, RepairReport) {
    let report = normalize_in_place(&mut document, now);
    (document, report)
}

/// [`normalize_document`] plus orphan adoption, for documents coming from a host or storage.
pub fn normalize_loaded_document(
    mut document: DocumentSnapshot,
    now: u64,
) -> (DocumentSnapshot, RepairReport) {
    let mut report = normalize_in_place(&mut document, now);
    if document.sections.is_empty() && document.layout.is_empty() && !document.components.is_empty() {
        let section_id = adopt_orphans(&mut document, now);
        report.section_links_fixed += sync_section_links(&mut document);
        report.default_section = Some(section_id);
    }
    (document, report)
}

pub fn normalize_in_place(document: &mut DocumentSnapshot, now: u64) -> RepairReport {
    let mut report = RepairReport::default();
    repair_component_identity(&mut document.components, &mut report);
    document.sections = merge_duplicate_sections(std::mem::take(&mut document.sections), now, &mut report);

    let mut seen = HashSet::new();
    for section in &mut document.sections {
        let before = section.components.len();
        section
            .components
            .retain(|member| seen.insert(member.component_id.clone()));
        report.dropped_duplicate_references += before - section.components.len();
    }
    let before = document.layout.len();
    document.layout.retain(|id| seen.insert(id.clone()));
    report.dropped_duplicate_references += before - document.layout.len();

    let referenced = document
        .sections
        .iter()
        .flat_map(Section::member_ids)
        .chain(document.layout.iter())
        .filter(|id| !document.components.contains_key(id.as_str()))
        .cloned()
        .collect::<Vec<_>>();
    for id in referenced {
        document.components.insert(id.clone(), stub_component(&id, now));
        report.stub_components.push(id);
    }

    if let Some(first) = document.sections.first_mut() {
        if !document.layout.is_empty() {
            for id in document.layout.drain(..) {
                first.components.push(SectionMember {
                    component_id: id.clone(),
                    column: DEFAULT_COLUMN,
                    order: 0,
                    assigned_at: now,
                });
                report.layout_folded_into_sections.push(id);
            }
            first.updated_at = now;
        }
    }

    for section in &mut document.sections {
        section.renumber();
    }
    report.section_links_fixed = sync_section_links(document);
    report
}

fn repair_component_identity(
    components: &mut BTreeMap<ComponentId, Component>,
    report: &mut RepairReport,
) {
    for (key, component) in components.iter_mut() {
        if &component.id != key {
            component.id = key.clone();
            report.rekeyed_components.push(key.clone());
        }
        if component.component_type.trim().is_empty() {
            component.component_type = infer_component_type(key.as_str());
            report.recovered_types.push(key.clone());
        }
    }
}

fn merge_duplicate_sections(
    sections: Vec<Section>,
    now: u64,
    report: &mut RepairReport,
) -> Vec<Section> {
    let mut merged: Vec<Section> = Vec::with_capacity(sections.len());
    for mut section in sections {
        if section.section_id.is_blank() {
            section.section_id = ids::generate_section_id(&merged, now);
            report.generated_section_ids.push(section.section_id.clone());
        }
        match merged
            .iter_mut()
            .find(|existing| existing.section_id == section.section_id)
        {
            Some(existing) => {
                existing.components.append(&mut section.components);
                report.merged_sections.push(section.section_id);
            }
            None => merged.push(section),
        }
    }
    merged
}

fn adopt_orphans(document: &mut DocumentSnapshot, now: u64) -> SectionId {
    let section_id = ids::generate_section_id(&document.sections, now);
    let mut section = Section::new(section_id.clone(), DEFAULT_SECTION_TYPE, now);
    let mut orphans = document.components.values().collect::<Vec<_>>();
    orphans.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.id.cmp(&b.id)));
    section.components = orphans
        .into_iter()
        .map(|component| SectionMember {
            component_id: component.id.clone(),
            column: DEFAULT_COLUMN,
            order: 0,
            assigned_at: now,
        })
        .collect();
    section.renumber();
    document.sections.push(section);
    section_id
}

fn sync_section_links(document: &mut DocumentSnapshot) -> usize {
    let owners = document
        .sections
        .iter()
        .flat_map(|section| {
            section
                .member_ids()
                .map(move |id| (id.clone(), section.section_id.clone()))
        })
        .collect::<BTreeMap<_, _>>();
    let mut fixed = 0;
    for (id, component) in document.components.iter_mut() {
        let expected = owners.get(id).cloned();
        if component.section_id != expected {
            component.section_id = expected;
            fixed += 1;
        }
    }
    fixed
}
