//! Index Synchronizer - version checks and build-then-swap.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use whatif_ledger::TimelineId;

use super::{CancelToken, DerivedIndex, IndexInputs, IndexVersion};
use crate::error::{CoreError, Result};
use crate::knowledge_base::KnowledgeProjector;

/// Result of a reindex request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReindexOutcome {
    /// The committed index already matched its inputs.
    Unchanged(IndexVersion),
    /// A new index was built and swapped in.
    Rebuilt(IndexVersion),
}

impl ReindexOutcome {
    pub fn version(&self) -> &IndexVersion {
        match self {
            ReindexOutcome::Unchanged(version) | ReindexOutcome::Rebuilt(version) => version,
        }
    }

    pub fn rebuilt(&self) -> bool {
        matches!(self, ReindexOutcome::Rebuilt(_))
    }
}

/// Holds the committed index of every timeline.
///
/// Readers clone an `Arc` snapshot and never see a partial build; a
/// rebuild happens off to the side and is swapped in under a short write
/// lock.
#[derive(Debug, Default)]
pub struct IndexSynchronizer {
    slots: RwLock<HashMap<TimelineId, Arc<DerivedIndex>>>,
    projector: KnowledgeProjector,
}

impl IndexSynchronizer {
    pub fn new(projector: KnowledgeProjector) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            projector,
        }
    }

    /// The committed index for `timeline`, if one was built.
    pub fn snapshot(&self, timeline: &TimelineId) -> Option<Arc<DerivedIndex>> {
        self.slots.read().get(timeline).cloned()
    }

    pub fn version_of(&self, timeline: &TimelineId) -> Option<IndexVersion> {
        self.slots.read().get(timeline).map(|index| index.version.clone())
    }

    /// Whether the committed index is missing or built from other inputs.
    pub fn check_staleness(&self, inputs: &IndexInputs) -> bool {
        let fresh = inputs.version();
        let stale = self.version_of(&inputs.timeline.id).map_or(true, |stored| stored != fresh);
        debug!(timeline = %inputs.timeline.id, stale, "Checked index staleness");
        stale
    }

    /// Bring the index for `inputs.timeline` up to date.
    ///
    /// Short-circuits when the stored version matches. A cancelled build is
    /// discarded and the previous index stays authoritative.
    pub fn reindex(&self, inputs: &IndexInputs, cancel: &CancelToken) -> Result<ReindexOutcome> {
        let timeline = &inputs.timeline.id;
        let version = inputs.version();
        if self.version_of(timeline).as_ref() == Some(&version) {
            debug!(timeline = %timeline, version = %version, "Index up to date");
            return Ok(ReindexOutcome::Unchanged(version));
        }

        info!(timeline = %timeline, events = inputs.world.len(), "Reindex started");
        let index = match DerivedIndex::build(inputs, &self.projector, cancel) {
            Ok(index) => index,
            Err(err @ CoreError::ReindexCancelled(_)) => {
                warn!(timeline = %timeline, "Reindex cancelled, keeping committed index");
                return Err(err);
            }
            Err(err) => return Err(err),
        };

        self.install(index);
        info!(timeline = %timeline, version = %version, "Index swapped in");
        Ok(ReindexOutcome::Rebuilt(version))
    }

    /// Make `index` the committed index of its timeline.
    pub fn install(&self, index: DerivedIndex) {
        self.slots.write().insert(index.timeline_id.clone(), Arc::new(index));
    }

    /// Drop the committed index of `timeline`.
    pub fn evict(&self, timeline: &TimelineId) -> Option<Arc<DerivedIndex>> {
        self.slots.write().remove(timeline)
    }
}
