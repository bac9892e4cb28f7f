//! Outbound notifications for downstream collaborators.
//!
//! A successful reindex emits a [`ReindexNotice`]. Delivery is one-way:
//! the core never waits for a receiver and ignores missing ones.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tokio::sync::broadcast;
use tracing::debug;
use whatif_ledger::{CharacterId, DecisionId, TimelineId};

use crate::index::IndexVersion;

/// Advisory payload sent after a successful reindex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReindexNotice {
    pub timeline_id: TimelineId,
    pub decision_id: DecisionId,
    pub index_version: IndexVersion,
    pub affected_characters: BTreeSet<CharacterId>,
}

/// Receiver side of the GENERATE transition.
pub trait GenerationNotifier: Send + Sync {
    /// Fire and forget. Must not block.
    fn notify(&self, notice: ReindexNotice);
}

/// Drops every notice.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullNotifier;

impl GenerationNotifier for NullNotifier {
    fn notify(&self, _notice: ReindexNotice) {}
}

/// Fans notices out to any number of subscribers.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<ReindexNotice>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ReindexNotice> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(64)
    }
}

impl GenerationNotifier for BroadcastNotifier {
    fn notify(&self, notice: ReindexNotice) {
        let timeline = notice.timeline_id.clone();
        // No subscribers is not an error.
        let delivered = self.tx.send(notice).unwrap_or(0);
        debug!(timeline = %timeline, delivered, "Reindex notice emitted");
    }
}
