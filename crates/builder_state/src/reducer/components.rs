//! Reducer helpers for component-group transitions.

use tracing::warn;

use crate::{
    actions::{BuilderAction, ComponentDraft, MoveTarget},
    helpers::{attach, detach_component, move_item},
    ids,
    model::{Component, ComponentId, DocumentState, Placement, Section, DEFAULT_SECTION_TYPE, UNKNOWN_COMPONENT_TYPE},
    reducer::{ReduceContext, ReducerError, StoreEffect},
};

pub(super) fn reduce_component_action(
    state: &mut DocumentState,
    action: &BuilderAction,
    ctx: &ReduceContext,
    effects: &mut Vec<StoreEffect>,
) -> Result<bool, ReducerError> {
    match action {
        BuilderAction::AddComponent(draft) => {
            add_component(state, draft, ctx)?;
            effects.push(StoreEffect::ComponentAdded(draft.id.clone()));
        }
        BuilderAction::UpdateComponent { id, updates, .. } => {
            let component = find_component_mut(state, id)?;
            updates.apply_to(component);
            component.updated_at = ctx.now;
        }
        BuilderAction::DeleteComponent { id } | BuilderAction::RemoveComponent { id } => {
            if !state.components.contains_key(id.as_str()) {
                return Err(ReducerError::ComponentNotFound(id.clone()));
            }
            detach_component(state, id.as_str(), ctx.now);
            state.components.remove(id.as_str());
            state.drop_stale_ui_references();
            effects.push(StoreEffect::ComponentRemoved(id.clone()));
        }
        BuilderAction::MoveComponent {
            component_id,
            target,
        } => {
            move_component(state, component_id, *target, ctx.now)?;
        }
        BuilderAction::DuplicateComponent {
            component_id,
            new_id,
        } => {
            let new_id = new_id
                .clone()
                .unwrap_or_else(|| ids::duplicate_component_id(component_id, &state.components, ctx.now));
            duplicate_component(state, component_id, &new_id, ctx.now)?;
            effects.push(StoreEffect::ComponentAdded(new_id));
        }
        BuilderAction::BatchUpdateComponents { updates } => {
            for (id, patch) in updates {
                match state.components.get_mut(id.as_str()) {
                    Some(component) => {
                        patch.apply_to(component);
                        component.updated_at = ctx.now;
                    }
                    None => warn!(component_id = %id, "batch update skipped missing component"),
                }
            }
        }
        BuilderAction::ClearAllComponents => {
            for id in state.components.keys() {
                effects.push(StoreEffect::ComponentRemoved(id.clone()));
            }
            state.components.clear();
            state.layout.clear();
            for section in &mut state.sections {
                if !section.components.is_empty() {
                    section.components.clear();
                    section.updated_at = ctx.now;
                }
            }
            state.drop_stale_ui_references();
        }
        _ => return Ok(false),
    }
    Ok(true)
}

fn find_component_mut<'a>(
    state: &'a mut DocumentState,
    id: &ComponentId,
) -> Result<&'a mut Component, ReducerError> {
    state
        .components
        .get_mut(id.as_str())
        .ok_or_else(|| ReducerError::ComponentNotFound(id.clone()))
}

/// Resolves where a new component goes when the draft does not say.
fn default_placement(state: &mut DocumentState, ctx: &ReduceContext) -> Placement {
    if let Some(last) = state.sections.last() {
        return Placement::Section {
            section_id: last.section_id.clone(),
            index: None,
            column: None,
        };
    }
    if !state.layout.is_empty() || !ctx.auto_create_sections {
        return Placement::Layout { index: None };
    }
    let section_id = ids::generate_section_id(&state.sections, ctx.now);
    state
        .sections
        .push(Section::new(section_id.clone(), DEFAULT_SECTION_TYPE, ctx.now));
    Placement::Section {
        section_id,
        index: None,
        column: None,
    }
}

fn add_component(
    state: &mut DocumentState,
    draft: &ComponentDraft,
    ctx: &ReduceContext,
) -> Result<(), ReducerError> {
    if draft.id.is_blank() {
        return Err(ReducerError::InvalidPayload {
            action: "ADD_COMPONENT",
            reason: "component id is required".to_string(),
        });
    }
    if state.components.contains_key(draft.id.as_str()) {
        return Err(ReducerError::DuplicateComponent(draft.id.clone()));
    }
    let placement = match draft.requested_placement() {
        Some(Placement::Layout { .. }) if state.has_sections() => {
            return Err(ReducerError::LayoutInSectionMode)
        }
        Some(Placement::Section { section_id, .. }) if state.section(section_id.as_str()).is_none() => {
            return Err(ReducerError::SectionNotFound(section_id))
        }
        Some(placement) => placement,
        None => default_placement(state, ctx),
    };

    let component_type = draft
        .component_type
        .as_deref()
        .map(str::trim)
        .filter(|component_type| !component_type.is_empty())
        .unwrap_or(UNKNOWN_COMPONENT_TYPE);
    let component = Component {
        id: draft.id.clone(),
        component_type: component_type.to_string(),
        props: draft.props.clone(),
        content: draft.content.clone(),
        section_id: None,
        order: draft.order.unwrap_or(state.components.len()),
        created_at: draft.created_at.unwrap_or(ctx.now),
        updated_at: draft.updated_at.unwrap_or(ctx.now),
    };
    state.components.insert(draft.id.clone(), component);
    attach(state, &draft.id, &placement, ctx.now)
}

fn move_component(
    state: &mut DocumentState,
    component_id: &ComponentId,
    target: MoveTarget,
    now: u64,
) -> Result<(), ReducerError> {
    if !state.components.contains_key(component_id.as_str()) {
        return Err(ReducerError::ComponentNotFound(component_id.clone()));
    }
    if let Some((section_index, member_index)) = state.locate_in_sections(component_id.as_str()) {
        let section = &mut state.sections[section_index];
        let to = move_item(&mut section.components, member_index, target);
        if to != member_index {
            section.renumber();
            section.updated_at = now;
        }
        return Ok(());
    }
    match state
        .layout
        .iter()
        .position(|id| id == component_id)
    {
        Some(from) => {
            move_item(&mut state.layout, from, target);
            Ok(())
        }
        None => Err(ReducerError::ComponentNotPlaced(component_id.clone())),
    }
}

fn duplicate_component(
    state: &mut DocumentState,
    source_id: &ComponentId,
    new_id: &ComponentId,
    now: u64,
) -> Result<(), ReducerError> {
    let source = state
        .components
        .get(source_id.as_str())
        .ok_or_else(|| ReducerError::ComponentNotFound(source_id.clone()))?;
    if new_id.is_blank() || state.components.contains_key(new_id.as_str()) {
        return Err(ReducerError::DuplicateComponent(new_id.clone()));
    }
    let copy = Component {
        id: new_id.clone(),
        section_id: None,
        order: state.components.len(),
        created_at: now,
        updated_at: now,
        ..source.clone()
    };
    let placement = match state.placement_of(source_id.as_str()) {
        Placement::Section {
            section_id,
            index,
            column,
        } => Placement::Section {
            section_id,
            index: index.map(|index| index + 1),
            column,
        },
        Placement::Layout { index } => Placement::Layout {
            index: index.map(|index| index + 1),
        },
        Placement::Unplaced => Placement::Unplaced,
    };
    state.components.insert(new_id.clone(), copy);
    attach(state, new_id, &placement, now)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::{json, Map, Value};

    use super::*;
    use crate::{
        model::SectionId,
        patch::ComponentPatch,
        reducer::reduce_document,
    };

    fn ctx(now: u64) -> ReduceContext {
        ReduceContext::new(now)
    }

    fn flat_ctx(now: u64) -> ReduceContext {
        ReduceContext {
            now,
            auto_create_sections: false,
        }
    }

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    fn add(state: &mut DocumentState, id: &str, ctx: &ReduceContext) {
        reduce_document(
            state,
            &BuilderAction::AddComponent(ComponentDraft::new(id, "text")),
            ctx,
        )
        .expect("add");
    }

    fn section_members(state: &DocumentState, index: usize) -> Vec<ComponentId> {
        state.sections[index].member_ids().cloned().collect()
    }

    #[test]
    fn first_add_creates_a_default_section() {
        let mut state = DocumentState::default();
        let effects = reduce_document(
            &mut state,
            &BuilderAction::AddComponent(ComponentDraft::new("hero-1", "hero")),
            &ctx(10),
        )
        .expect("add");

        assert_eq!(effects, vec![StoreEffect::ComponentAdded("hero-1".into())]);
        assert_eq!(state.sections.len(), 1);
        assert_eq!(state.sections[0].section_type, DEFAULT_SECTION_TYPE);
        assert_eq!(section_members(&state, 0), vec![ComponentId::from("hero-1")]);
        assert_eq!(
            state.components["hero-1"].section_id,
            Some(state.sections[0].section_id.clone())
        );
        assert!(state.layout.is_empty());
    }

    #[test]
    fn flat_documents_append_to_layout() {
        let mut state = DocumentState::default();
        add(&mut state, "a", &flat_ctx(1));
        add(&mut state, "b", &ctx(2));
        assert!(state.sections.is_empty());
        assert_eq!(state.layout, vec![ComponentId::from("a"), ComponentId::from("b")]);
    }

    #[test]
    fn add_rejects_duplicates_and_bad_placements() {
        let mut state = DocumentState::default();
        add(&mut state, "a", &ctx(1));
        let duplicate = BuilderAction::AddComponent(ComponentDraft::new("a", "text"));
        assert_eq!(
            reduce_document(&mut state, &duplicate, &ctx(2)),
            Err(ReducerError::DuplicateComponent("a".into()))
        );
        let into_layout = BuilderAction::AddComponent(
            ComponentDraft::new("b", "text").at(Placement::Layout { index: None }),
        );
        assert_eq!(
            reduce_document(&mut state, &into_layout, &ctx(3)),
            Err(ReducerError::LayoutInSectionMode)
        );
        let into_missing = BuilderAction::AddComponent(ComponentDraft::new("c", "text").in_section("nope"));
        assert_eq!(
            reduce_document(&mut state, &into_missing, &ctx(4)),
            Err(ReducerError::SectionNotFound(SectionId::from("nope")))
        );
    }

    #[test]
    fn update_merges_props_and_stamps_updated_at() {
        let mut state = DocumentState::default();
        reduce_document(
            &mut state,
            &BuilderAction::AddComponent(
                ComponentDraft::new("hero-1", "hero").with_props(object(json!({"title": "Old", "align": "left"}))),
            ),
            &ctx(1),
        )
        .expect("add");
        reduce_document(
            &mut state,
            &BuilderAction::UpdateComponent {
                id: "hero-1".into(),
                updates: ComponentPatch::props(object(json!({"title": "New"}))),
                previous: None,
            },
            &ctx(5),
        )
        .expect("update");

        let component = &state.components["hero-1"];
        assert_eq!(component.props, object(json!({"title": "New", "align": "left"})));
        assert_eq!(component.updated_at, 5);
        assert_eq!(component.created_at, 1);
    }

    #[test]
    fn delete_prunes_component_membership_and_selection() {
        let mut state = DocumentState::default();
        add(&mut state, "a", &ctx(1));
        add(&mut state, "b", &ctx(2));
        state.ui.selected_component = Some("a".into());

        let effects = reduce_document(&mut state, &BuilderAction::DeleteComponent { id: "a".into() }, &ctx(3))
            .expect("delete");

        assert_eq!(effects, vec![StoreEffect::ComponentRemoved("a".into())]);
        assert!(!state.components.contains_key("a"));
        assert_eq!(section_members(&state, 0), vec![ComponentId::from("b")]);
        assert_eq!(state.sections[0].components[0].order, 0);
        assert_eq!(state.ui.selected_component, None);
        assert_eq!(
            reduce_document(&mut state, &BuilderAction::RemoveComponent { id: "a".into() }, &ctx(4)),
            Err(ReducerError::ComponentNotFound("a".into()))
        );
    }

    #[test]
    fn move_swaps_clamps_and_splices_within_the_container() {
        let mut state = DocumentState::default();
        for id in ["a", "b", "c"] {
            add(&mut state, id, &ctx(1));
        }
        let mv = |state: &mut DocumentState, id: &str, target| {
            reduce_document(
                state,
                &BuilderAction::MoveComponent {
                    component_id: id.into(),
                    target,
                },
                &ctx(2),
            )
            .expect("move");
        };

        mv(&mut state, "a", MoveTarget::Up);
        assert_eq!(section_members(&state, 0), ["a", "b", "c"].map(ComponentId::from).to_vec());
        mv(&mut state, "a", MoveTarget::Down);
        assert_eq!(section_members(&state, 0), ["b", "a", "c"].map(ComponentId::from).to_vec());
        mv(&mut state, "c", MoveTarget::Index(0));
        assert_eq!(section_members(&state, 0), ["c", "b", "a"].map(ComponentId::from).to_vec());
        assert_eq!(state.sections[0].components[2].order, 2);
    }

    #[test]
    fn duplicate_inserts_copy_after_source() {
        let mut state = DocumentState::default();
        add(&mut state, "a", &flat_ctx(1));
        add(&mut state, "b", &flat_ctx(1));
        reduce_document(
            &mut state,
            &BuilderAction::DuplicateComponent {
                component_id: "a".into(),
                new_id: Some("a2".into()),
            },
            &ctx(9),
        )
        .expect("duplicate");

        assert_eq!(state.layout, ["a", "a2", "b"].map(ComponentId::from).to_vec());
        let copy = &state.components["a2"];
        assert_eq!(copy.component_type, "text");
        assert_eq!(copy.created_at, 9);
    }

    #[test]
    fn clear_all_keeps_empty_sections() {
        let mut state = DocumentState::default();
        add(&mut state, "a", &ctx(1));
        reduce_document(&mut state, &BuilderAction::ClearAllComponents, &ctx(2)).expect("clear");
        assert!(state.components.is_empty());
        assert_eq!(state.sections.len(), 1);
        assert!(state.sections[0].components.is_empty());
    }
}
