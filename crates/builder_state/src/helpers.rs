//! Membership mutation and merge helpers shared by the reducer and normalizer.

use serde_json::{Map, Value};

use crate::{
    actions::MoveTarget,
    model::{ComponentId, DocumentState, Placement, SectionId, SectionMember, DEFAULT_COLUMN},
    reducer::ReducerError,
};

/// Removes `component_id` from the flat layout and every section, returning where it was.
pub fn detach_component(state: &mut DocumentState, component_id: &str, now: u64) -> Placement {
    let previous = state.placement_of(component_id);
    state.layout.retain(|id| id.as_str() != component_id);
    for section in &mut state.sections {
        let before = section.components.len();
        section
            .components
            .retain(|member| member.component_id.as_str() != component_id);
        if section.components.len() != before {
            section.renumber();
            section.updated_at = now;
        }
    }
    if let Some(component) = state.components.get_mut(component_id) {
        component.section_id = None;
    }
    previous
}

/// Inserts an already detached component into a section at `index` (clamped, appends when `None`).
pub fn attach_to_section(
    state: &mut DocumentState,
    component_id: &ComponentId,
    section_id: &SectionId,
    index: Option<usize>,
    column: Option<u32>,
    now: u64,
) -> Result<(), ReducerError> {
    let section = state
        .sections
        .iter_mut()
        .find(|section| &section.section_id == section_id)
        .ok_or_else(|| ReducerError::SectionNotFound(section_id.clone()))?;
    let at = index
        .unwrap_or(section.components.len())
        .min(section.components.len());
    section.components.insert(
        at,
        SectionMember {
            component_id: component_id.clone(),
            column: column.unwrap_or(DEFAULT_COLUMN),
            order: at,
            assigned_at: now,
        },
    );
    section.renumber();
    section.updated_at = now;
    if let Some(component) = state.components.get_mut(component_id.as_str()) {
        component.section_id = Some(section_id.clone());
    }
    Ok(())
}

/// Inserts an already detached component into the flat layout.
pub fn attach_to_layout(
    state: &mut DocumentState,
    component_id: &ComponentId,
    index: Option<usize>,
) -> Result<(), ReducerError> {
    if state.has_sections() {
        return Err(ReducerError::LayoutInSectionMode);
    }
    let at = index.unwrap_or(state.layout.len()).min(state.layout.len());
    state.layout.insert(at, component_id.clone());
    Ok(())
}

/// Places a detached component according to `placement`.
pub fn attach(
    state: &mut DocumentState,
    component_id: &ComponentId,
    placement: &Placement,
    now: u64,
) -> Result<(), ReducerError> {
    match placement {
        Placement::Section {
            section_id,
            index,
            column,
        } => attach_to_section(state, component_id, section_id, *index, *column, now),
        Placement::Layout { index } => attach_to_layout(state, component_id, *index),
        Placement::Unplaced => Ok(()),
    }
}

/// Moves the item at `from` according to `target`, returning its new index.
///
/// `Up`/`Down` swap with a neighbour and clamp at the ends; `Index` splices.
pub fn move_item<T>(items: &mut Vec<T>, from: usize, target: MoveTarget) -> usize {
    let last = items.len().saturating_sub(1);
    match target {
        MoveTarget::Up => {
            if from == 0 {
                return from;
            }
            items.swap(from, from - 1);
            from - 1
        }
        MoveTarget::Down => {
            if from >= last {
                return from;
            }
            items.swap(from, from + 1);
            from + 1
        }
        MoveTarget::Index(to) => {
            let to = to.min(last);
            if to != from {
                let item = items.remove(from);
                items.insert(to, item);
            }
            to
        }
    }
}

/// Recursively merges `source` into `target`: objects merge key by key, everything else replaces.
pub fn deep_merge(target: &mut Value, source: &Value) {
    match (target, source) {
        (Value::Object(target), Value::Object(source)) => deep_merge_maps(target, source),
        (target, source) => *target = source.clone(),
    }
}

pub fn deep_merge_maps(target: &mut Map<String, Value>, source: &Map<String, Value>) {
    for (key, value) in source {
        let nested = value.is_object() && target.get(key).is_some_and(Value::is_object);
        match target.get_mut(key) {
            Some(existing) if nested => deep_merge(existing, value),
            _ => {
                target.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Deep merge that keeps `current.sections` when it is populated and `incoming.sections` is empty.
pub fn merge_preserving_sections(current: &Value, incoming: &Value) -> Value {
    let mut merged = current.clone();
    deep_merge(&mut merged, incoming);

    let current_sections = current
        .get("sections")
        .and_then(Value::as_array)
        .filter(|sections| !sections.is_empty());
    let incoming_empty = incoming
        .get("sections")
        .and_then(Value::as_array)
        .map(|sections| sections.is_empty())
        .unwrap_or(false);
    if let (Some(sections), true) = (current_sections, incoming_empty) {
        if let Some(object) = merged.as_object_mut() {
            object.insert("sections".to_string(), Value::Array(sections.clone()));
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::model::{Component, Section, DEFAULT_SECTION_TYPE};

    fn state_with(ids: &[&str]) -> DocumentState {
        let mut state = DocumentState::default();
        for id in ids {
            state.components.insert(
                ComponentId::from(*id),
                Component {
                    id: ComponentId::from(*id),
                    component_type: "hero".to_string(),
                    props: Map::new(),
                    content: Map::new(),
                    section_id: None,
                    order: 0,
                    created_at: 0,
                    updated_at: 0,
                },
            );
        }
        state
    }

    #[test]
    fn attach_and_detach_keep_section_id_in_sync() {
        let mut state = state_with(&["a", "b"]);
        state
            .sections
            .push(Section::new("s1".into(), DEFAULT_SECTION_TYPE, 0));
        attach_to_section(&mut state, &"a".into(), &"s1".into(), None, None, 3).expect("a");
        attach_to_section(&mut state, &"b".into(), &"s1".into(), Some(0), Some(2), 4).expect("b");

        let section = &state.sections[0];
        assert_eq!(
            section.member_ids().cloned().collect::<Vec<_>>(),
            vec![ComponentId::from("b"), ComponentId::from("a")]
        );
        assert_eq!(section.components[1].order, 1);
        assert_eq!(state.components["a"].section_id, Some("s1".into()));

        let previous = detach_component(&mut state, "b", 5);
        assert_eq!(
            previous,
            Placement::Section {
                section_id: "s1".into(),
                index: Some(0),
                column: Some(2),
            }
        );
        assert_eq!(state.components["b"].section_id, None);
        assert_eq!(state.sections[0].components[0].order, 0);
    }

    #[test]
    fn layout_attach_is_rejected_in_section_mode() {
        let mut state = state_with(&["a"]);
        state
            .sections
            .push(Section::new("s1".into(), DEFAULT_SECTION_TYPE, 0));
        assert_eq!(
            attach_to_layout(&mut state, &"a".into(), None),
            Err(ReducerError::LayoutInSectionMode)
        );
    }

    #[test]
    fn move_item_swaps_clamps_and_splices() {
        let mut items = vec!['a', 'b', 'c', 'd'];
        assert_eq!(move_item(&mut items, 0, MoveTarget::Up), 0);
        assert_eq!(move_item(&mut items, 1, MoveTarget::Up), 0);
        assert_eq!(items, vec!['b', 'a', 'c', 'd']);
        assert_eq!(move_item(&mut items, 3, MoveTarget::Down), 3);
        assert_eq!(move_item(&mut items, 0, MoveTarget::Index(9)), 3);
        assert_eq!(items, vec!['a', 'c', 'd', 'b']);
    }

    #[test]
    fn deep_merge_recurses_into_objects_and_replaces_arrays() {
        let mut target = json!({"a": {"x": 1, "y": 2}, "list": [1, 2], "keep": true});
        deep_merge(&mut target, &json!({"a": {"y": 3}, "list": [9]}));
        assert_eq!(target, json!({"a": {"x": 1, "y": 3}, "list": [9], "keep": true}));
    }

    #[test]
    fn merge_keeps_populated_sections_over_empty_incoming_list() {
        let current = json!({"sections": [{"section_id": "s1"}], "theme": "default"});
        let merged = merge_preserving_sections(&current, &json!({"sections": [], "theme": "dark"}));
        assert_eq!(merged["sections"], json!([{"section_id": "s1"}]));
        assert_eq!(merged["theme"], json!("dark"));

        let replaced =
            merge_preserving_sections(&current, &json!({"sections": [{"section_id": "s2"}]}));
        assert_eq!(replaced["sections"], json!([{"section_id": "s2"}]));
    }
}
