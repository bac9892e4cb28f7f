//! Error types for the story ledger.

use thiserror::Error;

use crate::entities::EventId;
use crate::ledger::ContentHash;

/// Result type alias for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Failures raised by the ledger.
///
/// Ordering and cycle violations are validation errors: the offending
/// append is rejected whole and nothing is written. Corruption is fatal.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// A trigger points at an event that is missing, later, or retracted,
    /// or two events claim the same story order.
    #[error("ordering violation at event {event}: {reason}")]
    OrderingViolation { event: EventId, reason: String },

    /// The trigger/enable graph would no longer be acyclic.
    #[error("event {event} would close a causal cycle: {}", format_cycle(.cycle))]
    CycleDetected { event: EventId, cycle: Vec<EventId> },

    /// A stored entry no longer matches its content hash.
    #[error("ledger entry {seq} is corrupted: stored hash {expected}, content hashes to {actual}")]
    LedgerCorrupted {
        seq: u64,
        expected: ContentHash,
        actual: ContentHash,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LedgerError {
    pub fn ordering(event: &EventId, reason: impl Into<String>) -> Self {
        Self::OrderingViolation {
            event: event.clone(),
            reason: reason.into(),
        }
    }

    /// Whether the error means the ledger itself can no longer be trusted.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::LedgerCorrupted { .. })
    }
}

fn format_cycle(cycle: &[EventId]) -> String {
    cycle
        .iter()
        .map(|id| id.as_str())
        .collect::<Vec<_>>()
        .join(" -> ")
}
