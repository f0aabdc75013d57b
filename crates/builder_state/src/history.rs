//! Bounded undo/redo history built from inverse actions.
//!
//! Each entry stores the action as it resolved against the pre-dispatch state (generated ids and
//! default placements made explicit) and the action that reverts it. Entries hold minimal payloads
//! where an inverse can be expressed that way; whole-document replacements fall back to a
//! `SET_STATE` with the prior document.

use std::collections::{BTreeMap, VecDeque};

use serde::Serialize;

use crate::{
    actions::{Action, BuilderAction, ComponentDraft, MoveTarget, SectionDraft},
    model::{ComponentId, DocumentState, Placement},
    patch::previous_fields,
    reducer::{reduce_document, ReduceContext},
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub action_id: String,
    pub recorded_at: u64,
    #[serde(skip)]
    pub action: BuilderAction,
    #[serde(skip)]
    pub inverse: BuilderAction,
    pub action_type: String,
    pub inverse_type: String,
}

impl HistoryEntry {
    fn new(action_id: String, recorded_at: u64, action: BuilderAction, inverse: BuilderAction) -> Self {
        Self {
            action_id,
            recorded_at,
            action_type: action.type_name().to_string(),
            inverse_type: inverse.type_name().to_string(),
            action,
            inverse,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
/// Read-only view of the history stacks, oldest first.
pub struct HistoryState {
    pub past: Vec<HistoryEntry>,
    pub future: Vec<HistoryEntry>,
    pub max_size: usize,
}

#[derive(Debug, Clone)]
pub struct HistoryManager {
    past: VecDeque<HistoryEntry>,
    future: Vec<HistoryEntry>,
    max_size: usize,
}

impl HistoryManager {
    pub fn new(max_size: usize) -> Self {
        Self {
            past: VecDeque::new(),
            future: Vec::new(),
            max_size: max_size.max(1),
        }
    }

    /// Records a committed action. Returns `false` for exempt actions and actions with no inverse.
    pub fn record(
        &mut self,
        action: &Action,
        before: &DocumentState,
        after: &DocumentState,
        ctx: &ReduceContext,
    ) -> bool {
        if action.body.is_history_exempt() {
            return false;
        }
        let Some((resolved, inverse)) = invert(&action.body, before, after, ctx) else {
            return false;
        };
        self.push(HistoryEntry::new(action.meta.id.clone(), ctx.now, resolved, inverse));
        true
    }

    fn push(&mut self, entry: HistoryEntry) {
        self.future.clear();
        self.past.push_back(entry);
        while self.past.len() > self.max_size {
            self.past.pop_front();
        }
    }

    /// Moves the newest entry to the redo stack and returns its inverse.
    pub fn undo(&mut self) -> Option<BuilderAction> {
        let entry = self.past.pop_back()?;
        let inverse = entry.inverse.clone();
        self.future.push(entry);
        Some(inverse)
    }

    /// Moves the newest redo entry back to the undo stack and returns its action.
    pub fn redo(&mut self) -> Option<BuilderAction> {
        let entry = self.future.pop()?;
        let action = entry.action.clone();
        self.past.push_back(entry);
        Some(action)
    }

    /// Puts back an entry whose inverse failed to apply.
    pub fn revert_undo(&mut self) {
        if let Some(entry) = self.future.pop() {
            self.past.push_back(entry);
        }
    }

    /// Puts back an entry whose replay failed to apply.
    pub fn revert_redo(&mut self) {
        if let Some(entry) = self.past.pop_back() {
            self.future.push(entry);
        }
    }

    pub fn can_undo(&self) -> bool {
        !self.past.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.future.is_empty()
    }

    pub fn len(&self) -> usize {
        self.past.len()
    }

    pub fn is_empty(&self) -> bool {
        self.past.is_empty()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn clear(&mut self) {
        self.past.clear();
        self.future.clear();
    }

    pub fn snapshot(&self) -> HistoryState {
        HistoryState {
            past: self.past.iter().cloned().collect(),
            future: self.future.clone(),
            max_size: self.max_size,
        }
    }
}

fn restore_document(before: &DocumentState) -> BuilderAction {
    BuilderAction::SetState {
        document: Box::new(before.snapshot()),
    }
}

fn replace_with(after: &DocumentState) -> BuilderAction {
    BuilderAction::SetState {
        document: Box::new(after.snapshot()),
    }
}

/// Computes `(resolved action, inverse)` for an action that moved `before` to `after`.
///
/// Returns `None` for history-exempt actions.
pub fn invert(
    action: &BuilderAction,
    before: &DocumentState,
    after: &DocumentState,
    ctx: &ReduceContext,
) -> Option<(BuilderAction, BuilderAction)> {
    if action.is_history_exempt() {
        return None;
    }
    let pair = match action {
        BuilderAction::AddComponent(draft) => invert_add(draft, before, after),
        BuilderAction::UpdateComponent {
            id,
            updates,
            previous,
        } => {
            let previous = match previous {
                Some(previous) => previous.clone(),
                None => updates.previous_of(before.components.get(id.as_str())?),
            };
            (
                BuilderAction::UpdateComponent {
                    id: id.clone(),
                    updates: updates.clone(),
                    previous: Some(previous.clone()),
                },
                BuilderAction::UpdateComponent {
                    id: id.clone(),
                    updates: previous,
                    previous: Some(updates.clone()),
                },
            )
        }
        BuilderAction::DeleteComponent { id } | BuilderAction::RemoveComponent { id } => {
            let component = before.components.get(id.as_str())?;
            let placement = before.placement_of(id.as_str());
            (
                action.clone(),
                BuilderAction::AddComponent(ComponentDraft::from_component(component, placement)),
            )
        }
        BuilderAction::MoveComponent { component_id, .. } => {
            let from = before.container_position(component_id.as_str())?;
            let to = after.container_position(component_id.as_str())?;
            (
                BuilderAction::MoveComponent {
                    component_id: component_id.clone(),
                    target: MoveTarget::Index(to),
                },
                BuilderAction::MoveComponent {
                    component_id: component_id.clone(),
                    target: MoveTarget::Index(from),
                },
            )
        }
        BuilderAction::DuplicateComponent { component_id, new_id } => {
            let new_id = match new_id {
                Some(new_id) => new_id.clone(),
                None => after
                    .components
                    .keys()
                    .find(|id| !before.components.contains_key(id.as_str()))?
                    .clone(),
            };
            (
                BuilderAction::DuplicateComponent {
                    component_id: component_id.clone(),
                    new_id: Some(new_id.clone()),
                },
                BuilderAction::DeleteComponent { id: new_id },
            )
        }
        BuilderAction::BatchUpdateComponents { updates } => {
            let previous = updates
                .iter()
                .filter_map(|(id, patch)| {
                    before
                        .components
                        .get(id.as_str())
                        .map(|component| (id.clone(), patch.previous_of(component)))
                })
                .collect::<BTreeMap<_, _>>();
            (
                action.clone(),
                BuilderAction::BatchUpdateComponents { updates: previous },
            )
        }
        BuilderAction::ClearAllComponents | BuilderAction::ResetState => {
            (action.clone(), restore_document(before))
        }
        BuilderAction::SetState { .. }
        | BuilderAction::MergeState { .. }
        | BuilderAction::UpdateSections { .. } => (replace_with(after), restore_document(before)),
        BuilderAction::SetLayout { .. } => (
            BuilderAction::SetLayout {
                layout: after.layout.clone(),
            },
            BuilderAction::SetLayout {
                layout: before.layout.clone(),
            },
        ),
        BuilderAction::UpdateLayoutOrder {
            from_index,
            to_index,
        } => (
            action.clone(),
            BuilderAction::UpdateLayoutOrder {
                from_index: *to_index,
                to_index: *from_index,
            },
        ),
        BuilderAction::ReorderComponents {
            from_index,
            to_index,
        } => (
            action.clone(),
            BuilderAction::ReorderComponents {
                from_index: *to_index,
                to_index: *from_index,
            },
        ),
        BuilderAction::AddSection(draft) => invert_add_section(draft, before, after)?,
        BuilderAction::UpdateSection {
            section_id,
            updates,
            previous,
        } => {
            let previous = match previous {
                Some(previous) => previous.clone(),
                None => updates.previous_of(before.section(section_id.as_str())?),
            };
            (
                BuilderAction::UpdateSection {
                    section_id: section_id.clone(),
                    updates: updates.clone(),
                    previous: Some(previous.clone()),
                },
                BuilderAction::UpdateSection {
                    section_id: section_id.clone(),
                    updates: previous,
                    previous: Some(updates.clone()),
                },
            )
        }
        BuilderAction::DeleteSection { section_id } => {
            let index = before.section_index(section_id.as_str())?;
            (
                action.clone(),
                BuilderAction::RestoreSection {
                    section: before.sections[index].clone(),
                    index,
                },
            )
        }
        BuilderAction::RestoreSection { section, .. } => (
            action.clone(),
            BuilderAction::DeleteSection {
                section_id: section.section_id.clone(),
            },
        ),
        BuilderAction::AssignComponentToSection { component_id, .. } => {
            let resolved = match after.placement_of(component_id.as_str()) {
                Placement::Section {
                    section_id,
                    index,
                    column,
                } => BuilderAction::AssignComponentToSection {
                    component_id: component_id.clone(),
                    section_id,
                    column,
                    index,
                },
                _ => return None,
            };
            let inverse = placement_restorer(component_id, before.placement_of(component_id.as_str()))
                .unwrap_or_else(|| restore_document(before));
            (resolved, inverse)
        }
        BuilderAction::RemoveComponentFromSection { component_id } => {
            let inverse = placement_restorer(component_id, before.placement_of(component_id.as_str()))?;
            (action.clone(), inverse)
        }
        BuilderAction::SetTheme { .. } => (
            action.clone(),
            BuilderAction::SetTheme {
                theme: before.theme.clone(),
            },
        ),
        BuilderAction::UpdateThemeSettings { settings } => (
            action.clone(),
            BuilderAction::UpdateThemeSettings {
                settings: previous_fields(&before.theme_settings, settings),
            },
        ),
        BuilderAction::UpdateGlobalSettings { settings } => (
            action.clone(),
            BuilderAction::UpdateGlobalSettings {
                settings: previous_fields(&before.global_settings, settings),
            },
        ),
        BuilderAction::ApplyTransaction { actions } => invert_transaction(actions, before, ctx)?,
        _ => return None,
    };
    Some(pair)
}

fn placement_restorer(
    component_id: &ComponentId,
    placement: Placement,
) -> Option<BuilderAction> {
    match placement {
        Placement::Section {
            section_id,
            index,
            column,
        } => Some(BuilderAction::AssignComponentToSection {
            component_id: component_id.clone(),
            section_id,
            column,
            index,
        }),
        Placement::Unplaced => Some(BuilderAction::RemoveComponentFromSection {
            component_id: component_id.clone(),
        }),
        Placement::Layout { .. } => None,
    }
}

fn invert_add(
    draft: &ComponentDraft,
    before: &DocumentState,
    after: &DocumentState,
) -> (BuilderAction, BuilderAction) {
    let placement = after.placement_of(draft.id.as_str());
    let resolved_draft = ComponentDraft {
        section_id: None,
        placement: Some(placement.clone()),
        ..draft.clone()
    };
    let delete = BuilderAction::DeleteComponent {
        id: draft.id.clone(),
    };

    let created_section = match &placement {
        Placement::Section { section_id, .. } if before.section(section_id.as_str()).is_none() => {
            after
                .section_index(section_id.as_str())
                .map(|index| (index, &after.sections[index]))
        }
        _ => None,
    };
    match created_section {
        Some((index, section)) => (
            BuilderAction::ApplyTransaction {
                actions: vec![
                    BuilderAction::AddSection(SectionDraft::from_section(section, index)),
                    BuilderAction::AddComponent(resolved_draft),
                ],
            },
            BuilderAction::ApplyTransaction {
                actions: vec![
                    delete,
                    BuilderAction::DeleteSection {
                        section_id: section.section_id.clone(),
                    },
                ],
            },
        ),
        None => (BuilderAction::AddComponent(resolved_draft), delete),
    }
}

fn invert_add_section(
    draft: &SectionDraft,
    before: &DocumentState,
    after: &DocumentState,
) -> Option<(BuilderAction, BuilderAction)> {
    let (index, section) = after
        .sections
        .iter()
        .enumerate()
        .find(|(_, section)| before.section(section.section_id.as_str()).is_none())?;
    let resolved = BuilderAction::AddSection(SectionDraft {
        section_id: Some(section.section_id.clone()),
        index: Some(index),
        ..draft.clone()
    });
    let inverse = if draft.components.is_empty() {
        // A first section that adopted the flat layout hands it back on delete.
        BuilderAction::DeleteSection {
            section_id: section.section_id.clone(),
        }
    } else {
        restore_document(before)
    };
    Some((resolved, inverse))
}

fn invert_transaction(
    actions: &[BuilderAction],
    before: &DocumentState,
    ctx: &ReduceContext,
) -> Option<(BuilderAction, BuilderAction)> {
    let mut current = before.clone();
    let mut forward = Vec::with_capacity(actions.len());
    let mut inverses = Vec::with_capacity(actions.len());
    for step in actions {
        let mut next = current.clone();
        reduce_document(&mut next, step, ctx).ok()?;
        match invert(step, &current, &next, ctx) {
            Some((resolved, inverse)) => {
                forward.push(resolved);
                inverses.push(inverse);
            }
            None => forward.push(step.clone()),
        }
        current = next;
    }
    inverses.reverse();
    Some((
        BuilderAction::ApplyTransaction { actions: forward },
        BuilderAction::ApplyTransaction { actions: inverses },
    ))
}
