//! Headline counts for one timeline, for review after ingestion.

use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use whatif_ledger::{TimelineId, WorldState};

use crate::decisions::Timeline;

/// What a timeline holds, counted from its resolved world.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorySummary {
    pub timeline_id: TimelineId,
    pub decisions: usize,
    pub scenes: usize,
    pub characters: usize,
    pub events: usize,
    pub props: usize,
    pub beliefs: usize,
}

impl StorySummary {
    pub fn of(timeline: &Timeline, world: &WorldState) -> Self {
        let scenes: BTreeSet<_> = world.events().iter().map(|record| &record.event.scene_id).collect();
        Self {
            timeline_id: timeline.id.clone(),
            decisions: timeline.decision_path.len(),
            scenes: scenes.len(),
            characters: world.characters().len(),
            events: world.len(),
            props: world.props().len(),
            beliefs: world.beliefs().len(),
        }
    }
}

impl fmt::Display for StorySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Timeline {} ({} decisions)", self.timeline_id, self.decisions)?;
        writeln!(f, "Scenes: {}", self.scenes)?;
        writeln!(f, "Characters: {}", self.characters)?;
        writeln!(f, "Events: {}", self.events)?;
        writeln!(f, "Props: {}", self.props)?;
        write!(f, "Beliefs: {}", self.beliefs)
    }
}
