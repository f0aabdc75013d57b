//! Identifier generation for actions, sections, and duplicated components.
//!
//! Section and duplicate ids depend only on the existing document and the supplied
//! timestamp, so replaying an action against the same state yields the same ids.

use std::collections::BTreeMap;

use crate::model::{Component, ComponentId, Section, SectionId};

/// Unique action id built from the dispatch timestamp and a process-wide sequence.
pub fn next_action_id(now: u64) -> String {
    format!("action_{now}_{:06x}", builder_host::next_sequence())
}

pub fn generate_section_id(existing: &[Section], now: u64) -> SectionId {
    let taken = |candidate: &str| {
        existing
            .iter()
            .any(|section| section.section_id.as_str() == candidate)
    };
    let base = format!("section_{now}");
    if !taken(&base) {
        return SectionId(base);
    }
    let mut suffix = 2usize;
    loop {
        let candidate = format!("{base}_{suffix}");
        if !taken(&candidate) {
            return SectionId(candidate);
        }
        suffix += 1;
    }
}

pub fn duplicate_component_id(
    source: &ComponentId,
    existing: &BTreeMap<ComponentId, Component>,
    now: u64,
) -> ComponentId {
    let base = format!("{source}_copy_{now}");
    if !existing.contains_key(base.as_str()) {
        return ComponentId(base);
    }
    let mut suffix = 2usize;
    loop {
        let candidate = format!("{base}_{suffix}");
        if !existing.contains_key(candidate.as_str()) {
            return ComponentId(candidate);
        }
        suffix += 1;
    }
}
