//! Identifiers for everything the ledger talks about.

mod fact_key;
mod prop;

pub use fact_key::*;
pub use prop::*;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Position of an event on the narrative clock of a timeline.
pub type StoryOrder = u64;

macro_rules! authored_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

authored_id!(
    /// A character, as named by the authoring documents (e.g. `marcus`).
    CharacterId
);
authored_id!(
    /// A scene identifier (e.g. `scene_004`).
    SceneId
);
authored_id!(
    /// A prop tracked through its lifecycle.
    PropId
);
authored_id!(
    /// A story event identifier (e.g. `evt_012`).
    EventId
);
authored_id!(
    /// A named timeline (e.g. `main`, `noir`).
    TimelineId
);
authored_id!(BeliefId);

/// Unique identifier for decisions in the branch tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DecisionId(pub Uuid);

impl DecisionId {
    /// Create a new random decision ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a decision ID from a specific UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn nil() -> Self {
        Self(Uuid::nil())
    }
}

impl Default for DecisionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for DecisionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authored_ids_are_transparent() {
        let id = CharacterId::from("marcus");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"marcus\"");
        assert_eq!(id.to_string(), "marcus");
    }

    #[test]
    fn test_decision_ids_are_unique() {
        assert_ne!(DecisionId::new(), DecisionId::new());
        assert_eq!(DecisionId::nil(), DecisionId::nil());
    }
}
