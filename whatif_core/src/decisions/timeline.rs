//! Timelines - named paths through the decision tree.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;
use whatif_ledger::{DecisionId, TimelineId};

use super::DecisionGraph;
use crate::error::{CoreError, Result};

/// Id of the timeline created at bootstrap.
pub const CANONICAL_TIMELINE: &str = "main";

/// A named, append-only root-to-tip decision path.
///
/// The path is shared between a timeline and its forks until one of them
/// grows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeline {
    pub id: TimelineId,
    pub name: String,
    pub is_canonical: bool,
    pub decision_path: Arc<[DecisionId]>,
    pub created_at: DateTime<Utc>,
}

impl Timeline {
    pub fn new(
        id: impl Into<TimelineId>,
        name: impl Into<String>,
        decision_path: impl Into<Arc<[DecisionId]>>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            is_canonical: false,
            decision_path: decision_path.into(),
            created_at: Utc::now(),
        }
    }

    /// The last decision on the path.
    pub fn tip(&self) -> Option<DecisionId> {
        self.decision_path.last().copied()
    }

    pub fn contains(&self, decision: DecisionId) -> bool {
        self.decision_path.contains(&decision)
    }

    /// Length of the common path prefix shared with `other`.
    pub fn common_prefix_len(&self, other: &Timeline) -> usize {
        self.decision_path
            .iter()
            .zip(other.decision_path.iter())
            .take_while(|(a, b)| a == b)
            .count()
    }

    /// Copy of this timeline with `decision` appended.
    pub fn extended(&self, decision: DecisionId) -> Timeline {
        let mut path = self.decision_path.to_vec();
        path.push(decision);
        Timeline {
            decision_path: path.into(),
            ..self.clone()
        }
    }
}

/// The set of named timelines. Exactly one is canonical.
#[derive(Debug, Clone, Default)]
pub struct Timelines {
    timelines: BTreeMap<TimelineId, Timeline>,
}

impl Timelines {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted timelines.
    pub fn restore(timelines: impl IntoIterator<Item = Timeline>) -> Self {
        Self {
            timelines: timelines.into_iter().map(|t| (t.id.clone(), t)).collect(),
        }
    }

    /// Create the canonical timeline with path `[root]`.
    pub fn create_canonical(&mut self, root: DecisionId) -> Result<TimelineId> {
        let mut timeline = Timeline::new(CANONICAL_TIMELINE, "Main", vec![root]);
        timeline.is_canonical = true;
        let id = timeline.id.clone();
        self.insert(timeline)?;
        Ok(id)
    }

    pub fn get(&self, id: &TimelineId) -> Result<&Timeline> {
        self.timelines.get(id).ok_or_else(|| CoreError::UnknownTimeline(id.clone()))
    }

    pub fn contains(&self, id: &TimelineId) -> bool {
        self.timelines.contains_key(id)
    }

    pub fn path(&self, id: &TimelineId) -> Result<&[DecisionId]> {
        self.get(id).map(|t| &*t.decision_path)
    }

    /// Every timeline, by id.
    pub fn list(&self) -> impl Iterator<Item = &Timeline> {
        self.timelines.values()
    }

    pub fn len(&self) -> usize {
        self.timelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timelines.is_empty()
    }

    pub fn canonical(&self) -> Option<&Timeline> {
        self.timelines.values().find(|t| t.is_canonical)
    }

    /// Add a fully built timeline. Its id must be free.
    pub fn insert(&mut self, timeline: Timeline) -> Result<()> {
        if self.timelines.contains_key(&timeline.id) {
            return Err(CoreError::DuplicateTimeline(timeline.id));
        }
        self.timelines.insert(timeline.id.clone(), timeline);
        Ok(())
    }

    /// Replace an existing timeline with a new version of itself.
    pub fn replace(&mut self, timeline: Timeline) -> Result<()> {
        match self.timelines.get_mut(&timeline.id) {
            Some(slot) => {
                *slot = timeline;
                Ok(())
            }
            None => Err(CoreError::UnknownTimeline(timeline.id)),
        }
    }

    /// Build a fork of `source` named `name`, without inserting it.
    pub fn prepare_fork(&self, source: &TimelineId, name: &str) -> Result<Timeline> {
        check_name(name)?;
        let id = TimelineId::from(name);
        if self.contains(&id) {
            return Err(CoreError::DuplicateTimeline(id));
        }
        let source = self.get(source)?;
        Ok(Timeline::new(id, name, Arc::clone(&source.decision_path)))
    }

    /// Fork `source` into a new timeline sharing its decision path.
    pub fn fork(&mut self, source: &TimelineId, name: &str) -> Result<TimelineId> {
        let timeline = self.prepare_fork(source, name)?;
        let id = timeline.id.clone();
        info!(source = %source, timeline = %id, depth = timeline.decision_path.len(), "Timeline forked");
        self.insert(timeline)?;
        Ok(id)
    }

    /// Check that `decision` can extend `timeline` without splicing.
    pub fn check_append(&self, graph: &DecisionGraph, timeline: &Timeline, decision: DecisionId) -> Result<()> {
        let node = graph.get(decision).ok_or(CoreError::UnknownDecision(decision))?;
        let tip = timeline
            .tip()
            .ok_or_else(|| CoreError::config(format!("timeline {} has an empty path", timeline.id)))?;
        if node.parent_id != Some(tip) {
            return Err(CoreError::NotAChild {
                decision,
                timeline: timeline.id.clone(),
                tip,
            });
        }
        Ok(())
    }

    /// Append `decision` to the tip of `timeline`.
    pub fn append_decision(&mut self, graph: &DecisionGraph, timeline: &TimelineId, decision: DecisionId) -> Result<()> {
        let current = self.get(timeline)?;
        self.check_append(graph, current, decision)?;
        let next = current.extended(decision);
        info!(timeline = %timeline, decision = %decision, depth = next.decision_path.len(), "Decision appended");
        self.replace(next)
    }

    /// Remove the name binding. Decisions stay in the graph.
    pub fn delete(&mut self, id: &TimelineId) -> Result<Timeline> {
        let timeline = self.get(id)?;
        if timeline.is_canonical {
            return Err(CoreError::CanonicalTimeline(id.clone()));
        }
        info!(timeline = %id, "Timeline deleted");
        self.timelines.remove(id).ok_or_else(|| CoreError::UnknownTimeline(id.clone()))
    }

    /// Make `id` the one canonical timeline.
    pub fn set_canonical(&mut self, id: &TimelineId) -> Result<()> {
        self.get(id)?;
        for timeline in self.timelines.values_mut() {
            timeline.is_canonical = &timeline.id == id;
        }
        info!(timeline = %id, "Canonical timeline changed");
        Ok(())
    }

    /// Last decision shared by `a` and `b`, if any.
    pub fn fork_point(&self, a: &TimelineId, b: &TimelineId) -> Result<Option<DecisionId>> {
        let (a, b) = (self.get(a)?, self.get(b)?);
        let shared = a.common_prefix_len(b);
        Ok(shared.checked_sub(1).map(|last| a.decision_path[last]))
    }
}

/// A timeline name must be usable as a single file name.
fn check_name(name: &str) -> Result<()> {
    let unsafe_char = name.chars().any(|c| matches!(c, '/' | '\\') || c.is_control());
    if name.trim().is_empty() || unsafe_char || name.contains("..") || name == "." {
        return Err(CoreError::InvalidTimelineName(name.to_string()));
    }
    Ok(())
}
