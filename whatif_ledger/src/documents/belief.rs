//! Director-authored knowledge documents: beliefs, approvals, invalidations.

use serde::{Deserialize, Serialize};

use crate::entities::{BeliefId, CharacterId, EventId, FactKey};

/// A character's subjective conviction, which may diverge from the truth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Belief {
    pub id: BeliefId,
    pub character_id: CharacterId,
    pub belief_text: String,

    /// The fact this belief is about, if it maps to one.
    #[serde(default)]
    pub fact_key: Option<FactKey>,

    pub held_from_event: EventId,

    /// `None` while the belief is still held.
    #[serde(default)]
    pub held_until_event: Option<EventId>,

    /// Populated only when the belief is false.
    #[serde(default)]
    pub ground_truth: Option<String>,

    /// Learning this fact (at `partial` or better) ends the belief.
    #[serde(default)]
    pub contradicted_by: Option<FactKey>,
}

impl Belief {
    pub fn new(
        id: impl Into<BeliefId>,
        character: impl Into<CharacterId>,
        text: impl Into<String>,
        held_from: impl Into<EventId>,
    ) -> Self {
        Self {
            id: id.into(),
            character_id: character.into(),
            belief_text: text.into(),
            fact_key: None,
            held_from_event: held_from.into(),
            held_until_event: None,
            ground_truth: None,
            contradicted_by: None,
        }
    }

    pub fn about(mut self, fact_key: impl Into<FactKey>) -> Self {
        self.fact_key = Some(fact_key.into());
        self
    }

    pub fn false_because(mut self, ground_truth: impl Into<String>) -> Self {
        self.ground_truth = Some(ground_truth.into());
        self
    }

    pub fn until(mut self, event: impl Into<EventId>) -> Self {
        self.held_until_event = Some(event.into());
        self
    }

    pub fn contradicted_by(mut self, fact_key: impl Into<FactKey>) -> Self {
        self.contradicted_by = Some(fact_key.into());
        self
    }

    /// True when the belief disagrees with ground truth.
    pub fn diverges(&self) -> bool {
        self.ground_truth.is_some()
    }
}

/// Director sign-off that an inferred fact may be treated as canonical.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InferenceApproval {
    pub character_id: CharacterId,
    pub fact_key: FactKey,
    #[serde(default)]
    pub note: String,
}

impl InferenceApproval {
    pub fn new(character: impl Into<CharacterId>, fact_key: impl Into<FactKey>) -> Self {
        Self {
            character_id: character.into(),
            fact_key: fact_key.into(),
            note: String::new(),
        }
    }
}

/// Explicit retraction of something a character knew, effective at an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactInvalidation {
    pub character_id: CharacterId,
    pub fact_key: FactKey,
    pub at_event: EventId,
    #[serde(default)]
    pub reason: String,
}

impl FactInvalidation {
    pub fn new(
        character: impl Into<CharacterId>,
        fact_key: impl Into<FactKey>,
        at_event: impl Into<EventId>,
    ) -> Self {
        Self {
            character_id: character.into(),
            fact_key: fact_key.into(),
            at_event: at_event.into(),
            reason: String::new(),
        }
    }

    pub fn because(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }
}
