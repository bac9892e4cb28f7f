//! Decisions and Timelines - the branching model.
//!
//! Decisions form a tree rooted at the base "as authored" decision. A
//! timeline is a named root-to-node path through that tree; the ledger
//! entries it sees are exactly those owned by decisions on its path.

mod graph;
mod timeline;

pub use graph::*;
pub use timeline::*;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use whatif_ledger::{DecisionId, Mutation};

/// Label of the root decision created when a project is bootstrapped.
pub const ROOT_DECISION_LABEL: &str = "script as written";

/// What kind of change a decision represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionType {
    /// The root decision only.
    Base,
    Character,
    Scene,
    World,
    Production,
}

impl DecisionType {
    pub fn as_str(self) -> &'static str {
        match self {
            DecisionType::Base => "base",
            DecisionType::Character => "character",
            DecisionType::Scene => "scene",
            DecisionType::World => "world",
            DecisionType::Production => "production",
        }
    }
}

/// An immutable, named bundle of document mutations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub id: DecisionId,
    pub label: String,

    /// `None` only for the root.
    pub parent_id: Option<DecisionId>,

    #[serde(rename = "type")]
    pub decision_type: DecisionType,

    pub created_at: DateTime<Utc>,

    #[serde(default)]
    pub notes: String,

    /// Document patches, applied in order.
    #[serde(default)]
    pub mutations: Vec<Mutation>,
}

impl Decision {
    /// The root decision holding the ingested material.
    pub fn root(notes: impl Into<String>, mutations: Vec<Mutation>) -> Self {
        Self {
            id: DecisionId::new(),
            label: ROOT_DECISION_LABEL.to_string(),
            parent_id: None,
            decision_type: DecisionType::Base,
            created_at: Utc::now(),
            notes: notes.into(),
            mutations,
        }
    }

    pub fn child(
        parent: DecisionId,
        decision_type: DecisionType,
        label: impl Into<String>,
        mutations: Vec<Mutation>,
    ) -> Self {
        Self {
            id: DecisionId::new(),
            label: label.into(),
            parent_id: Some(parent),
            decision_type,
            created_at: Utc::now(),
            notes: String::new(),
            mutations,
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_decision() {
        let root = Decision::root("Initial ingestion from screenplay", vec![]);
        assert!(root.is_root());
        assert_eq!(root.label, ROOT_DECISION_LABEL);
        assert_eq!(root.decision_type, DecisionType::Base);
    }

    #[test]
    fn test_serialized_type_field() {
        let decision = Decision::child(DecisionId::new(), DecisionType::Character, "Marcus stays", vec![])
            .with_notes("more menace");
        let json = serde_json::to_value(&decision).unwrap();
        assert_eq!(json["type"], "character");
        assert_eq!(json["notes"], "more menace");

        let back: Decision = serde_json::from_value(json).unwrap();
        assert_eq!(back, decision);
    }
}
