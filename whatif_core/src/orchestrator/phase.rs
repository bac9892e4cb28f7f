//! Transaction phases of the branch state machine.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};
use whatif_ledger::TimelineId;

/// IDLE -> DECIDE -> BRANCH -> PROPAGATE -> REINDEX -> (GENERATE) -> IDLE
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    Decide,
    Branch,
    Propagate,
    Reindex,
    Generate,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Decide => "decide",
            Phase::Branch => "branch",
            Phase::Propagate => "propagate",
            Phase::Reindex => "reindex",
            Phase::Generate => "generate",
        }
    }

    /// Whether the machine may move from `self` to `next`.
    ///
    /// Any phase may fall back to `Idle`. Re-applying an existing decision
    /// starts at `Branch`.
    pub fn can_advance_to(self, next: Phase) -> bool {
        matches!(
            (self, next),
            (_, Phase::Idle)
                | (Phase::Idle, Phase::Decide)
                | (Phase::Idle, Phase::Branch)
                | (Phase::Decide, Phase::Branch)
                | (Phase::Branch, Phase::Propagate)
                | (Phase::Propagate, Phase::Reindex)
                | (Phase::Reindex, Phase::Generate)
        )
    }
}

/// Current phase of each timeline's in-flight transaction.
#[derive(Debug, Default)]
pub struct PhaseTracker {
    phases: Mutex<HashMap<TimelineId, Phase>>,
}

impl PhaseTracker {
    pub fn current(&self, timeline: &TimelineId) -> Phase {
        self.phases.lock().get(timeline).copied().unwrap_or_default()
    }

    pub fn enter(&self, timeline: &TimelineId, next: Phase) {
        let mut phases = self.phases.lock();
        let current = phases.get(timeline).copied().unwrap_or_default();
        if !current.can_advance_to(next) {
            warn!(timeline = %timeline, from = current.as_str(), to = next.as_str(), "Unexpected phase transition");
        }
        debug!(timeline = %timeline, from = current.as_str(), to = next.as_str(), "Phase");
        if next == Phase::Idle {
            phases.remove(timeline);
        } else {
            phases.insert(timeline.clone(), next);
        }
    }

    pub fn finish(&self, timeline: &TimelineId) {
        self.enter(timeline, Phase::Idle);
    }
}
