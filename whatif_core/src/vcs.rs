//! Version-control substrate boundary.
//!
//! Every committed decision maps to one atomic commit and every fork to one
//! branch. The core only cares whether the call succeeded.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::debug;
use whatif_ledger::{DecisionId, TimelineId};

use crate::decisions::{Decision, Timeline};
use crate::error::{CoreError, Result};

/// Content address of a substrate commit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommitId(pub String);

impl std::fmt::Display for CommitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque content-addressed store with commit and branch primitives.
pub trait VersionStore: Send + Sync {
    fn commit_decision(&self, decision: &Decision) -> Result<CommitId>;

    fn create_branch(&self, timeline: &Timeline) -> Result<()>;
}

#[derive(Debug, Default)]
struct StoreState {
    commits: BTreeMap<DecisionId, CommitId>,
    branches: BTreeMap<TimelineId, Option<DecisionId>>,
    refuse: bool,
}

/// Substrate kept in memory, for tests and embedding.
#[derive(Debug, Default)]
pub struct InMemoryVersionStore {
    state: Mutex<StoreState>,
}

impl InMemoryVersionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following call fail, or succeed again.
    pub fn refuse_commits(&self, refuse: bool) {
        self.state.lock().refuse = refuse;
    }

    pub fn commit_for(&self, decision: DecisionId) -> Option<CommitId> {
        self.state.lock().commits.get(&decision).cloned()
    }

    pub fn commit_count(&self) -> usize {
        self.state.lock().commits.len()
    }

    /// Head decision of a branch.
    pub fn branch_head(&self, timeline: &TimelineId) -> Option<DecisionId> {
        self.state.lock().branches.get(timeline).copied().flatten()
    }
}

impl VersionStore for InMemoryVersionStore {
    fn commit_decision(&self, decision: &Decision) -> Result<CommitId> {
        let mut state = self.state.lock();
        if state.refuse {
            return Err(CoreError::substrate(format!("commit of decision {} refused", decision.id)));
        }
        let body = serde_json::to_vec(decision)?;
        let id = CommitId(hex::encode(Sha256::digest(&body)));
        debug!(decision = %decision.id, commit = %id, "Substrate commit");
        state.commits.insert(decision.id, id.clone());
        Ok(id)
    }

    fn create_branch(&self, timeline: &Timeline) -> Result<()> {
        let mut state = self.state.lock();
        if state.refuse {
            return Err(CoreError::substrate(format!("branch {} refused", timeline.id)));
        }
        state.branches.insert(timeline.id.clone(), timeline.tip());
        Ok(())
    }
}
