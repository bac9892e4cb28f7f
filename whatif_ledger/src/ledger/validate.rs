//! Causal invariants over a resolved set of events.
//!
//! Checks run in a fixed order so the same input always reports the same
//! violation: unknown triggers, then cycles, then story-order rules.

use std::collections::{BTreeMap, HashMap};

use crate::documents::DocumentSet;
use crate::entities::{EventId, StoryOrder};
use crate::error::{LedgerError, Result};

/// Check every causal invariant of a resolved document set.
pub fn check_causality(documents: &DocumentSet) -> Result<()> {
    check_triggers_committed(documents)?;
    check_acyclic(documents)?;
    check_story_order(documents)
}

fn check_triggers_committed(documents: &DocumentSet) -> Result<()> {
    for record in documents.events() {
        for trigger in &record.event.triggers {
            if documents.event(trigger).is_none() {
                return Err(LedgerError::ordering(
                    &record.event.id,
                    format!("trigger {} is not committed on this path", trigger),
                ));
            }
        }
    }
    Ok(())
}

fn check_acyclic(documents: &DocumentSet) -> Result<()> {
    // Edges point from cause to effect.
    let mut edges: BTreeMap<&EventId, Vec<&EventId>> = BTreeMap::new();
    for record in documents.events() {
        edges.entry(&record.event.id).or_default();
    }
    for record in documents.events() {
        let id = &record.event.id;
        for trigger in &record.event.triggers {
            edges.entry(trigger).or_default().push(id);
        }
        for enabled in &record.event.enables {
            if documents.event(enabled).is_some() {
                edges.entry(id).or_default().push(enabled);
            }
        }
    }

    match find_cycle(&edges) {
        Some(cycle) => Err(LedgerError::CycleDetected {
            event: cycle[0].clone(),
            cycle,
        }),
        None => Ok(()),
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Fresh,
    Active,
    Done,
}

/// Iterative depth-first search; returns the first cycle found, closed
/// (the first id repeated at the end).
fn find_cycle(edges: &BTreeMap<&EventId, Vec<&EventId>>) -> Option<Vec<EventId>> {
    let mut marks: HashMap<&EventId, Mark> = HashMap::new();

    for &start in edges.keys() {
        if marks.get(start).copied().unwrap_or(Mark::Fresh) != Mark::Fresh {
            continue;
        }
        marks.insert(start, Mark::Active);
        let mut stack: Vec<(&EventId, usize)> = vec![(start, 0)];

        while let Some(&(node, next)) = stack.last() {
            let child = edges.get(node).and_then(|children| children.get(next)).copied();
            match child {
                Some(child) => {
                    if let Some(top) = stack.last_mut() {
                        top.1 += 1;
                    }
                    match marks.get(child).copied().unwrap_or(Mark::Fresh) {
                        Mark::Fresh => {
                            marks.insert(child, Mark::Active);
                            stack.push((child, 0));
                        }
                        Mark::Active => {
                            let from = stack.iter().position(|(n, _)| *n == child).unwrap_or(0);
                            let mut cycle: Vec<EventId> =
                                stack[from..].iter().map(|(n, _)| (*n).clone()).collect();
                            cycle.push(child.clone());
                            return Some(cycle);
                        }
                        Mark::Done => {}
                    }
                }
                None => {
                    marks.insert(node, Mark::Done);
                    stack.pop();
                }
            }
        }
    }
    None
}

fn check_story_order(documents: &DocumentSet) -> Result<()> {
    let mut claimed: HashMap<StoryOrder, &EventId> = HashMap::new();

    for record in documents.events() {
        let event = &record.event;
        if let Some(other) = claimed.insert(event.story_order, &event.id) {
            return Err(LedgerError::ordering(
                &event.id,
                format!("story order {} is already taken by {}", event.story_order, other),
            ));
        }

        for trigger in &event.triggers {
            if let Some(cause) = documents.event(trigger) {
                if cause.event.story_order >= event.story_order {
                    return Err(LedgerError::ordering(
                        &event.id,
                        format!(
                            "trigger {} has story order {} (must be below {})",
                            trigger, cause.event.story_order, event.story_order
                        ),
                    ));
                }
            }
        }

        for enabled in &event.enables {
            if let Some(effect) = documents.event(enabled) {
                if effect.event.story_order <= event.story_order {
                    return Err(LedgerError::ordering(
                        &event.id,
                        format!(
                            "enabled event {} has story order {} (must be above {})",
                            enabled, effect.event.story_order, event.story_order
                        ),
                    ));
                }
            }
        }
    }
    Ok(())
}
