//! Error types for the narrative core
//!
//! - **CoreError**: every failure the core can report
//! - **Result**: Type alias for `Result<T, CoreError>`

use thiserror::Error;
use whatif_ledger::{DecisionId, DocumentKey, LedgerError, TimelineId};

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

/// Main error type for core operations
#[derive(Error, Debug)]
pub enum CoreError {
    /// Ledger validation failure or corruption
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("unknown parent decision {0}")]
    UnknownParent(DecisionId),

    /// The decision's parent is not the tip of the timeline.
    #[error("decision {decision} is not a child of {tip}, the tip of timeline {timeline}")]
    NotAChild {
        decision: DecisionId,
        timeline: TimelineId,
        tip: DecisionId,
    },

    /// A mutation would leave the parent's resolved documents unchanged.
    #[error("mutation on {key} is already applied under parent {parent}")]
    AppliedTwice { parent: DecisionId, key: DocumentKey },

    #[error("unknown timeline {0}")]
    UnknownTimeline(TimelineId),

    #[error("unknown decision {0}")]
    UnknownDecision(DecisionId),

    #[error("timeline {0} already exists")]
    DuplicateTimeline(TimelineId),

    /// Timeline names double as file names in the project directory.
    #[error("invalid timeline name {0:?}")]
    InvalidTimelineName(String),

    #[error("timeline {0} is canonical and cannot be deleted")]
    CanonicalTimeline(TimelineId),

    /// The timeline read a corrupted ledger entry and is stopped.
    #[error("timeline {timeline} is halted: {reason}")]
    TimelineHalted { timeline: TimelineId, reason: String },

    /// The index is behind the ledger and self-healing is off.
    #[error("index of timeline {0} is stale")]
    StaleIndex(TimelineId),

    /// A rebuild was abandoned; the committed index is untouched.
    #[error("reindex of timeline {0} was cancelled")]
    ReindexCancelled(TimelineId),

    /// Version-control substrate refused a commit or branch
    #[error("substrate error: {0}")]
    Substrate(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CoreError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn substrate(msg: impl Into<String>) -> Self {
        Self::Substrate(msg.into())
    }

    /// Rejected at the API boundary, nothing applied.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::Ledger(LedgerError::OrderingViolation { .. })
                | Self::Ledger(LedgerError::CycleDetected { .. })
                | Self::UnknownParent(_)
                | Self::NotAChild { .. }
                | Self::AppliedTwice { .. }
                | Self::InvalidTimelineName(_)
        )
    }

    /// Ledger corruption; the affected timeline must stop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Ledger(err) if err.is_fatal())
    }
}

impl From<toml::de::Error> for CoreError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use whatif_ledger::{ContentHash, EventId};

    #[test]
    fn test_classification() {
        let ordering = CoreError::from(LedgerError::ordering(&EventId::from("e2"), "trigger e9 is not committed"));
        assert!(ordering.is_validation());
        assert!(!ordering.is_fatal());

        let corrupted = CoreError::from(LedgerError::LedgerCorrupted {
            seq: 3,
            expected: ContentHash::of(b"a"),
            actual: ContentHash::of(b"b"),
        });
        assert!(corrupted.is_fatal());
        assert!(!corrupted.is_validation());

        assert!(!CoreError::ReindexCancelled(TimelineId::from("main")).is_validation());
    }

    #[test]
    fn test_messages_name_the_offender() {
        let err = CoreError::UnknownTimeline(TimelineId::from("noir"));
        assert_eq!(err.to_string(), "unknown timeline noir");

        let err = CoreError::InvalidTimelineName("noir/v2".into());
        assert_eq!(err.to_string(), "invalid timeline name \"noir/v2\"");
        assert!(err.is_validation());
    }
}
