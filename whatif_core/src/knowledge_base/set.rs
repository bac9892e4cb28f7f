//! Knowledge sets - one character's projected knowledge at one story order.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use whatif_ledger::{Belief, CharacterId, EventId, FactKey, StoryOrder};

use super::{Confidence, KnowledgeFact};

/// A belief as resolved at a story order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeliefState {
    /// The authored belief, with `held_until_event` resolved.
    pub belief: Belief,
    pub held_from_order: StoryOrder,
    pub held_until_order: Option<StoryOrder>,
}

impl BeliefState {
    /// Whether the belief is held at `order`.
    pub fn is_held_at(&self, order: StoryOrder) -> bool {
        self.held_from_order <= order && self.held_until_order.map_or(true, |until| order < until)
    }

    pub fn diverges(&self) -> bool {
        self.belief.diverges()
    }
}

/// What one character knows, suspects and believes at `at_order`.
///
/// Facts are keyed by fact key; only the winning fact per key is kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeSet {
    pub character_id: CharacterId,
    pub at_order: StoryOrder,

    /// Confirmed, currently valid facts.
    facts: BTreeMap<FactKey, KnowledgeFact>,

    /// Inferences waiting for approval.
    pending: BTreeMap<FactKey, KnowledgeFact>,

    /// Facts explicitly invalidated at or before `at_order`, oldest first.
    invalidated: Vec<KnowledgeFact>,

    /// Every belief that had started by `at_order`, ordered by id.
    beliefs: Vec<BeliefState>,
}

impl KnowledgeSet {
    /// Create an empty knowledge set.
    pub fn new(character: CharacterId, at_order: StoryOrder) -> Self {
        Self {
            character_id: character,
            at_order,
            facts: BTreeMap::new(),
            pending: BTreeMap::new(),
            invalidated: Vec::new(),
            beliefs: Vec::new(),
        }
    }

    /// Offer a candidate fact. Returns true if it changed the set.
    pub(crate) fn learn(&mut self, candidate: KnowledgeFact) -> bool {
        let key = candidate.fact_key.clone();

        if candidate.is_pending() {
            if self
                .facts
                .get(&key)
                .is_some_and(|known| known.confidence >= candidate.confidence)
            {
                return false;
            }
            if let Some(existing) = self.pending.get(&key) {
                if !existing.is_superseded_by(&candidate) {
                    return false;
                }
            }
            self.pending.insert(key, candidate);
            return true;
        }

        if let Some(existing) = self.facts.get(&key) {
            if !existing.is_superseded_by(&candidate) {
                return false;
            }
        }
        if self
            .pending
            .get(&key)
            .is_some_and(|p| candidate.confidence >= p.confidence)
        {
            self.pending.remove(&key);
        }
        self.facts.insert(key, candidate);
        true
    }

    /// Retract a fact (confirmed or pending) at `event`.
    pub(crate) fn invalidate(&mut self, key: &FactKey, event: &EventId) {
        for removed in [self.facts.remove(key), self.pending.remove(key)].into_iter().flatten() {
            let mut removed = removed;
            removed.invalidated_at_event = Some(event.clone());
            self.invalidated.push(removed);
        }
    }

    pub(crate) fn push_belief(&mut self, belief: BeliefState) {
        self.beliefs.push(belief);
        self.beliefs.sort_by(|a, b| a.belief.id.cmp(&b.belief.id));
    }

    /// Whether the character knows `key` (confirmed facts only).
    pub fn knows(&self, key: &FactKey) -> bool {
        self.facts.contains_key(key)
    }

    pub fn fact(&self, key: &FactKey) -> Option<&KnowledgeFact> {
        self.facts.get(key)
    }

    pub fn confidence_of(&self, key: &FactKey) -> Option<Confidence> {
        self.facts.get(key).map(|f| f.confidence)
    }

    /// Default query: confirmed facts, by key.
    pub fn facts(&self) -> impl Iterator<Item = &KnowledgeFact> {
        self.facts.values()
    }

    /// Confirmed facts plus pending inferences the set has no confirmed
    /// counterpart for.
    pub fn facts_including_pending(&self) -> Vec<&KnowledgeFact> {
        let mut all: Vec<&KnowledgeFact> = self.facts.values().collect();
        all.extend(self.pending.values().filter(|p| !self.facts.contains_key(&p.fact_key)));
        all.sort_by(|a, b| a.fact_key.cmp(&b.fact_key));
        all
    }

    /// Facts according to a query policy.
    pub fn visible_facts(&self, include_pending: bool) -> Vec<&KnowledgeFact> {
        if include_pending {
            self.facts_including_pending()
        } else {
            self.facts.values().collect()
        }
    }

    /// Inferences reported for director approval.
    pub fn pending_approval(&self) -> impl Iterator<Item = &KnowledgeFact> {
        self.pending.values()
    }

    pub fn invalidated(&self) -> &[KnowledgeFact] {
        &self.invalidated
    }

    /// Facts whose subject is `subject` (e.g. everything about `jane`).
    pub fn facts_about<'a>(&'a self, subject: &'a str) -> impl Iterator<Item = &'a KnowledgeFact> + 'a {
        self.facts.values().filter(move |f| f.fact_key.subject() == subject)
    }

    /// Facts passed on by a teller who may have been lying.
    pub fn possible_lies(&self) -> impl Iterator<Item = &KnowledgeFact> {
        self.facts.values().filter(|f| f.possibly_false)
    }

    /// Facts this character knows that `other` does not.
    pub fn secrets_from<'a>(&'a self, other: &'a KnowledgeSet) -> impl Iterator<Item = &'a KnowledgeFact> + 'a {
        self.facts.values().filter(move |f| !other.knows(&f.fact_key))
    }

    /// Every belief that had started by `at_order`, held or ended.
    pub fn all_beliefs(&self) -> &[BeliefState] {
        &self.beliefs
    }

    /// Beliefs held at `at_order`.
    pub fn beliefs_held(&self) -> impl Iterator<Item = &BeliefState> {
        let at = self.at_order;
        self.beliefs.iter().filter(move |b| b.is_held_at(at))
    }

    /// Held beliefs that disagree with ground truth.
    pub fn divergent_beliefs(&self) -> impl Iterator<Item = &BeliefState> {
        self.beliefs_held().filter(|b| b.diverges())
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }
}
