//! Knowledge facts - what a character knows, how, and how surely.

use serde::{Deserialize, Serialize};
use whatif_ledger::{CharacterId, EventId, FactKey, StoryOrder};

/// How sure a character is of a fact. Ordered: `Certain` is the maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Rumor,
    Suspicion,
    Partial,
    Certain,
}

impl Confidence {
    pub fn as_str(self) -> &'static str {
        match self {
            Confidence::Rumor => "rumor",
            Confidence::Suspicion => "suspicion",
            Confidence::Partial => "partial",
            Confidence::Certain => "certain",
        }
    }
}

/// How a character came to know a fact.
///
/// Variant order is propagation priority, highest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KnowledgeSource {
    DirectObservation,
    ToldBy,
    PhysicalEvidence,
    Overheard,
    Inferred,
    Rumor,
}

impl KnowledgeSource {
    /// Confidence a fact learned through this channel starts at.
    pub fn base_confidence(self) -> Confidence {
        match self {
            KnowledgeSource::DirectObservation => Confidence::Certain,
            KnowledgeSource::ToldBy => Confidence::Partial,
            KnowledgeSource::PhysicalEvidence => Confidence::Certain,
            KnowledgeSource::Overheard => Confidence::Partial,
            KnowledgeSource::Inferred => Confidence::Suspicion,
            KnowledgeSource::Rumor => Confidence::Rumor,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            KnowledgeSource::DirectObservation => "direct_observation",
            KnowledgeSource::ToldBy => "told_by",
            KnowledgeSource::PhysicalEvidence => "physical_evidence",
            KnowledgeSource::Overheard => "overheard",
            KnowledgeSource::Inferred => "inferred",
            KnowledgeSource::Rumor => "rumor",
        }
    }
}

/// Whether a fact counts toward default knowledge queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FactStatus {
    #[default]
    Confirmed,
    /// An inference waiting for director approval.
    PendingApproval,
}

/// A single entry of a character's knowledge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeFact {
    pub character_id: CharacterId,
    pub fact_key: FactKey,
    pub learned_at_event: EventId,
    pub learned_at_order: StoryOrder,
    pub source: KnowledgeSource,
    pub confidence: Confidence,

    #[serde(default)]
    pub invalidated_at_event: Option<EventId>,

    #[serde(default)]
    pub status: FactStatus,

    /// Who passed the fact on, for `told_by` facts.
    #[serde(default)]
    pub told_by: Option<CharacterId>,

    /// The teller held a belief about this fact that diverges from the truth.
    #[serde(default)]
    pub possibly_false: bool,
}

impl KnowledgeFact {
    pub fn new(
        character: CharacterId,
        fact_key: FactKey,
        event: EventId,
        order: StoryOrder,
        source: KnowledgeSource,
    ) -> Self {
        Self {
            character_id: character,
            fact_key,
            learned_at_event: event,
            learned_at_order: order,
            source,
            confidence: source.base_confidence(),
            invalidated_at_event: None,
            status: FactStatus::Confirmed,
            told_by: None,
            possibly_false: false,
        }
    }

    pub fn with_teller(mut self, teller: CharacterId, possibly_false: bool) -> Self {
        self.told_by = Some(teller);
        self.possibly_false = possibly_false;
        self
    }

    pub fn pending(mut self) -> Self {
        self.status = FactStatus::PendingApproval;
        self
    }

    pub fn is_pending(&self) -> bool {
        self.status == FactStatus::PendingApproval
    }

    pub fn is_invalidated(&self) -> bool {
        self.invalidated_at_event.is_some()
    }

    /// Whether `candidate` should replace this fact.
    ///
    /// Higher confidence wins; on a tie the earlier fact stands, so a
    /// `certain` fact is never downgraded by a later, weaker source.
    pub fn is_superseded_by(&self, candidate: &KnowledgeFact) -> bool {
        candidate.confidence > self.confidence
            || (candidate.confidence == self.confidence
                && candidate.learned_at_order < self.learned_at_order)
    }
}
