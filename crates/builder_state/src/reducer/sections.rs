//! Reducer helpers for section and flat-layout transitions.

use std::collections::HashSet;

use tracing::warn;

use crate::{
    actions::{BuilderAction, SectionDraft},
    helpers::{attach_to_section, detach_component},
    ids,
    model::{ComponentId, DocumentState, Section, SectionId, DEFAULT_SECTION_TYPE},
    normalize::normalize_document,
    reducer::{ReduceContext, ReducerError, StoreEffect},
};

pub(super) fn reduce_section_action(
    state: &mut DocumentState,
    action: &BuilderAction,
    ctx: &ReduceContext,
    _effects: &mut Vec<StoreEffect>,
) -> Result<bool, ReducerError> {
    match action {
        BuilderAction::SetLayout { layout } => {
            if state.has_sections() {
                return Err(ReducerError::LayoutInSectionMode);
            }
            let mut seen = HashSet::new();
            state.layout = layout
                .iter()
                .filter(|id| {
                    let known = state.components.contains_key(id.as_str());
                    if !known {
                        warn!(component_id = %id, "SET_LAYOUT dropped unknown component");
                    }
                    known && seen.insert((*id).clone())
                })
                .cloned()
                .collect();
        }
        BuilderAction::UpdateLayoutOrder {
            from_index,
            to_index,
        }
        | BuilderAction::ReorderComponents {
            from_index,
            to_index,
        } => {
            reorder_layout(state, *from_index, *to_index)?;
        }
        BuilderAction::AddSection(draft) => add_section(state, draft, ctx)?,
        BuilderAction::UpdateSection {
            section_id,
            updates,
            ..
        } => {
            let section = find_section_mut(state, section_id)?;
            updates.apply_to(section);
            section.updated_at = ctx.now;
        }
        BuilderAction::DeleteSection { section_id } => delete_section(state, section_id, ctx.now)?,
        BuilderAction::UpdateSections { sections } => {
            let mut document = state.snapshot();
            document.sections = sections.clone();
            let (document, report) = normalize_document(document, ctx.now);
            if !report.is_clean() {
                warn!(stubs = report.stub_components.len(), "UPDATE_SECTIONS required repair");
            }
            state.replace_document(document);
        }
        BuilderAction::AssignComponentToSection {
            component_id,
            section_id,
            column,
            index,
        } => {
            if !state.components.contains_key(component_id.as_str()) {
                return Err(ReducerError::ComponentNotFound(component_id.clone()));
            }
            if state.section(section_id.as_str()).is_none() {
                return Err(ReducerError::SectionNotFound(section_id.clone()));
            }
            detach_component(state, component_id.as_str(), ctx.now);
            attach_to_section(state, component_id, section_id, *index, *column, ctx.now)?;
        }
        BuilderAction::RemoveComponentFromSection { component_id } => {
            if state.locate_in_sections(component_id.as_str()).is_none() {
                return Err(ReducerError::ComponentNotPlaced(component_id.clone()));
            }
            detach_component(state, component_id.as_str(), ctx.now);
        }
        BuilderAction::RestoreSection { section, index } => {
            restore_section(state, section, *index, ctx.now)?;
        }
        _ => return Ok(false),
    }
    Ok(true)
}

fn find_section_mut<'a>(
    state: &'a mut DocumentState,
    section_id: &SectionId,
) -> Result<&'a mut Section, ReducerError> {
    state
        .sections
        .iter_mut()
        .find(|section| &section.section_id == section_id)
        .ok_or_else(|| ReducerError::SectionNotFound(section_id.clone()))
}

fn reorder_layout(state: &mut DocumentState, from: usize, to: usize) -> Result<(), ReducerError> {
    if state.has_sections() {
        return Err(ReducerError::LayoutInSectionMode);
    }
    let len = state.layout.len();
    for index in [from, to] {
        if index >= len {
            return Err(ReducerError::IndexOutOfRange { index, len });
        }
    }
    let id = state.layout.remove(from);
    state.layout.insert(to, id);
    Ok(())
}

fn add_section(
    state: &mut DocumentState,
    draft: &SectionDraft,
    ctx: &ReduceContext,
) -> Result<(), ReducerError> {
    let section_id = match draft.section_id.as_ref().filter(|id| !id.is_blank()) {
        Some(id) => id.clone(),
        None => ids::generate_section_id(&state.sections, ctx.now),
    };
    if state.section(section_id.as_str()).is_some() {
        return Err(ReducerError::DuplicateSection(section_id));
    }
    let mut section = Section::new(
        section_id.clone(),
        draft
            .section_type
            .clone()
            .unwrap_or_else(|| DEFAULT_SECTION_TYPE.to_string()),
        ctx.now,
    );
    section.layout = draft.layout.clone();
    section.section_options = draft.section_options.clone();
    let at = draft
        .index
        .unwrap_or(state.sections.len())
        .min(state.sections.len());
    state.sections.insert(at, section);

    // The first section adopts the flat layout.
    let migrated = std::mem::take(&mut state.layout);
    for id in migrated.iter().chain(draft.components.iter()) {
        if !state.components.contains_key(id.as_str()) {
            warn!(component_id = %id, section_id = %section_id, "ADD_SECTION skipped unknown component");
            continue;
        }
        detach_component(state, id.as_str(), ctx.now);
        attach_to_section(state, id, &section_id, None, None, ctx.now)?;
    }
    Ok(())
}

fn delete_section(state: &mut DocumentState, section_id: &SectionId, now: u64) -> Result<(), ReducerError> {
    let index = state
        .section_index(section_id.as_str())
        .ok_or_else(|| ReducerError::SectionNotFound(section_id.clone()))?;
    let removed = state.sections.remove(index);
    let members = removed.components;
    for member in &members {
        if let Some(component) = state.components.get_mut(member.component_id.as_str()) {
            component.section_id = None;
        }
    }

    if state.sections.is_empty() {
        state.layout.extend(
            members
                .into_iter()
                .map(|member| member.component_id)
                .filter(|id| state.components.contains_key(id.as_str())),
        );
        return Ok(());
    }
    let neighbour = state.sections[index.saturating_sub(1).min(state.sections.len() - 1)]
        .section_id
        .clone();
    for member in members {
        if state.components.contains_key(member.component_id.as_str()) {
            attach_to_section(state, &member.component_id, &neighbour, None, Some(member.column), now)?;
        }
    }
    Ok(())
}

fn restore_section(
    state: &mut DocumentState,
    section: &Section,
    index: usize,
    now: u64,
) -> Result<(), ReducerError> {
    if state.section(section.section_id.as_str()).is_some() {
        return Err(ReducerError::DuplicateSection(section.section_id.clone()));
    }
    let mut restored = section.clone();
    restored.components.retain(|member| {
        let known = state.components.contains_key(member.component_id.as_str());
        if !known {
            warn!(component_id = %member.component_id, "RESTORE_SECTION dropped unknown member");
        }
        known
    });
    for member in &restored.components {
        detach_component(state, member.component_id.as_str(), now);
    }
    let at = index.min(state.sections.len());
    state.sections.insert(at, restored);

    let stranded = std::mem::take(&mut state.layout);
    let restored_id = section.section_id.clone();
    for id in &stranded {
        attach_to_section(state, id, &restored_id, None, None, now)?;
    }
    let member_ids = state.sections[at]
        .member_ids()
        .cloned()
        .collect::<Vec<ComponentId>>();
    for id in member_ids {
        if let Some(component) = state.components.get_mut(id.as_str()) {
            component.section_id = Some(restored_id.clone());
        }
    }
    state.sections[at].renumber();
    Ok(())
}
