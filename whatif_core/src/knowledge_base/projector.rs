//! The Knowledge Projector - fog of war, recomputed from the ledger.
//!
//! Knowledge is never stored. A [`KnowledgeSet`] is a pure function of a
//! resolved [`WorldState`], a character and a story order, so replaying the
//! same ledger always yields the same projection.

use std::collections::{BTreeMap, HashMap};
use tracing::debug;
use whatif_ledger::{
    Belief, CharacterId, Event, EventId, FactKey, Revelation, StoryOrder, WorldState,
};

use super::{BeliefState, Confidence, KnowledgeFact, KnowledgeSet, KnowledgeSource};

/// Computes per-character knowledge from a resolved world.
#[derive(Debug, Clone, Copy, Default)]
pub struct KnowledgeProjector;

impl KnowledgeProjector {
    pub fn new() -> Self {
        Self
    }

    /// What `character` knows, suspects and believes at `at_order`.
    pub fn project(&self, world: &WorldState, character: &CharacterId, at_order: StoryOrder) -> KnowledgeSet {
        let mut set = KnowledgeSet::new(character.clone(), at_order);

        let mut invalidations: HashMap<&EventId, Vec<&FactKey>> = HashMap::new();
        for inv in world.invalidations().iter().filter(|i| &i.character_id == character) {
            invalidations.entry(&inv.at_event).or_default().push(&inv.fact_key);
        }

        // Earliest order at which each key was confirmed at partial or better.
        let mut contradictions: HashMap<FactKey, Vec<(StoryOrder, EventId)>> = HashMap::new();

        for record in world.read_range(0, at_order) {
            let event = &record.event;
            if let Some(keys) = invalidations.get(&event.id) {
                for key in keys {
                    set.invalidate(key, &event.id);
                }
            }

            for candidate in self.candidates(world, event, character) {
                if !candidate.is_pending() && candidate.confidence >= Confidence::Partial {
                    contradictions
                        .entry(candidate.fact_key.clone())
                        .or_default()
                        .push((event.story_order, event.id.clone()));
                }
                set.learn(candidate);
            }
        }

        for belief in world.beliefs().iter().filter(|b| &b.character_id == character) {
            if let Some(state) = Self::resolve_belief(world, belief, at_order, &contradictions) {
                set.push_belief(state);
            }
        }

        debug!(
            character = %character,
            at_order,
            facts = set.len(),
            pending = set.pending_approval().count(),
            "Projected knowledge"
        );
        set
    }

    /// Projections for every character mentioned on the path.
    pub fn project_all(&self, world: &WorldState, at_order: StoryOrder) -> BTreeMap<CharacterId, KnowledgeSet> {
        world
            .characters()
            .into_iter()
            .map(|character| {
                let set = self.project(world, &character, at_order);
                (character, set)
            })
            .collect()
    }

    /// Candidate facts `character` gains from `event`, in rule priority order.
    pub fn candidates(&self, world: &WorldState, event: &Event, character: &CharacterId) -> Vec<KnowledgeFact> {
        let mut found = Vec::new();
        for revelation in &event.revelations {
            self.evaluate(world, event, revelation, character, &mut found);
        }
        found
    }

    fn evaluate(
        &self,
        world: &WorldState,
        event: &Event,
        revelation: &Revelation,
        character: &CharacterId,
        found: &mut Vec<KnowledgeFact>,
    ) {
        let key = &revelation.fact_key;
        let learned = |source: KnowledgeSource| {
            KnowledgeFact::new(character.clone(), key.clone(), event.id.clone(), event.story_order, source)
        };
        let present = event.characters_present.contains(character);
        let unaware = event.characters_unaware.contains(character);

        if revelation.observable && present && !unaware {
            found.push(learned(KnowledgeSource::DirectObservation));
        }

        for telling in &revelation.told {
            if &telling.teller != character && telling.listeners.contains(character) {
                let lying = Self::teller_diverges(world, &telling.teller, key, event.story_order);
                found.push(learned(KnowledgeSource::ToldBy).with_teller(telling.teller.clone(), lying));
            }
        }

        if let Some(prop) = &revelation.evidence {
            let handled = event
                .props
                .iter()
                .any(|interaction| &interaction.prop == prop && interaction.handled_by(character));
            if handled {
                found.push(learned(KnowledgeSource::PhysicalEvidence));
            }
        }

        if revelation.observable && !present && !unaware && event.characters_nearby.contains(character) {
            found.push(learned(KnowledgeSource::Overheard));
        }

        if revelation.inferred_by.contains(character) {
            let fact = learned(KnowledgeSource::Inferred);
            found.push(if world.is_approved(character, key) {
                fact
            } else {
                fact.pending()
            });
        }

        if revelation.rumored_to.contains(character) {
            found.push(learned(KnowledgeSource::Rumor));
        }
    }

    /// Whether `teller` holds, at `order`, a false belief about `key`.
    ///
    /// Only authored belief windows are considered here; a teller's own
    /// contradictions would require projecting the teller recursively.
    fn teller_diverges(world: &WorldState, teller: &CharacterId, key: &FactKey, order: StoryOrder) -> bool {
        world.beliefs().iter().any(|belief| {
            &belief.character_id == teller
                && belief.fact_key.as_ref() == Some(key)
                && belief.diverges()
                && world
                    .order_of(&belief.held_from_event)
                    .is_some_and(|from| from <= order)
                && belief
                    .held_until_event
                    .as_ref()
                    .and_then(|until| world.order_of(until))
                    .map_or(true, |until| order < until)
        })
    }

    fn resolve_belief(
        world: &WorldState,
        belief: &Belief,
        at_order: StoryOrder,
        contradictions: &HashMap<FactKey, Vec<(StoryOrder, EventId)>>,
    ) -> Option<BeliefState> {
        let from = world.order_of(&belief.held_from_event)?;
        if from > at_order {
            return None;
        }

        let authored = belief
            .held_until_event
            .as_ref()
            .and_then(|id| world.order_of(id).map(|order| (order, id.clone())));

        // A false belief about a fact is contradicted by learning that fact.
        let contradicting_key = belief
            .contradicted_by
            .as_ref()
            .or_else(|| belief.fact_key.as_ref().filter(|_| belief.diverges()));
        let contradicted = contradicting_key
            .and_then(|key| contradictions.get(key))
            .and_then(|hits| hits.iter().find(|(order, _)| *order > from).cloned());

        let until = match (authored, contradicted) {
            (Some(a), Some(c)) => Some(if c.0 < a.0 { c } else { a }),
            (a, c) => a.or(c),
        };

        let mut resolved = belief.clone();
        resolved.held_until_event = until.as_ref().map(|(_, id)| id.clone());
        Some(BeliefState {
            belief: resolved,
            held_from_order: from,
            held_until_order: until.map(|(order, _)| order),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use whatif_ledger::{
        ContentHash, DecisionId, DocumentSet, FactInvalidation, Mutation, PropInteraction,
    };

    fn world(mutations: Vec<Mutation>) -> WorldState {
        let documents: DocumentSet = mutations.iter().collect();
        WorldState::from_documents(vec![DecisionId::nil()], &documents, ContentHash::of(b"fixture"))
    }

    fn put(event: Event) -> Mutation {
        Mutation::event(event, vec![])
    }

    fn marcus() -> CharacterId {
        CharacterId::from("marcus")
    }

    #[test]
    fn test_direct_observation_is_certain() {
        let w = world(vec![put(
            Event::new("e1", "s1", 1)
                .with_present(["marcus"])
                .revealing(Revelation::new("jane.is_having_affair")),
        )]);
        let set = KnowledgeProjector::new().project(&w, &marcus(), 1);
        let fact = set.fact(&FactKey::from("jane.is_having_affair")).unwrap();
        assert_eq!(fact.source, KnowledgeSource::DirectObservation);
        assert_eq!(fact.confidence, Confidence::Certain);
    }

    #[test]
    fn test_knowledge_respects_story_order() {
        let w = world(vec![put(
            Event::new("e5", "s1", 5)
                .with_present(["marcus"])
                .revealing(Revelation::new("jane.lied")),
        )]);
        let projector = KnowledgeProjector::new();
        assert!(!projector.project(&w, &marcus(), 4).knows(&FactKey::from("jane.lied")));
        assert!(projector.project(&w, &marcus(), 5).knows(&FactKey::from("jane.lied")));
    }

    #[test]
    fn test_hidden_revelation_not_observed() {
        let w = world(vec![put(
            Event::new("e1", "s1", 1)
                .with_present(["marcus", "jane"])
                .revealing(Revelation::hidden("jane.has_secret").inferred_by(["marcus"])),
        )]);
        let set = KnowledgeProjector::new().project(&w, &CharacterId::from("jane"), 1);
        assert!(set.is_empty());
    }

    #[test]
    fn test_overheard_when_nearby() {
        let w = world(vec![put(
            Event::new("e1", "s1", 1)
                .with_present(["jane", "cole"])
                .with_nearby(["marcus"])
                .revealing(Revelation::new("cole.is_blackmailing_jane")),
        )]);
        let set = KnowledgeProjector::new().project(&w, &marcus(), 1);
        let fact = set.fact(&FactKey::from("cole.is_blackmailing_jane")).unwrap();
        assert_eq!(fact.source, KnowledgeSource::Overheard);
        assert_eq!(fact.confidence, Confidence::Partial);
    }

    #[test]
    fn test_physical_evidence_requires_handling_the_prop() {
        let w = world(vec![put(
            Event::new("e1", "s1", 1)
                .with_present(["marcus", "jane"])
                .with_prop(PropInteraction::new("letter", "read").by("marcus"))
                .revealing(Revelation::hidden("jane.is_having_affair").via_evidence("letter")),
        )]);
        let projector = KnowledgeProjector::new();
        let marcus_set = projector.project(&w, &marcus(), 1);
        assert_eq!(
            marcus_set.fact(&FactKey::from("jane.is_having_affair")).map(|f| f.source),
            Some(KnowledgeSource::PhysicalEvidence)
        );
        assert!(projector.project(&w, &CharacterId::from("jane"), 1).is_empty());
    }

    #[test]
    fn test_told_by_flags_teller_with_false_belief() {
        let w = world(vec![
            put(Event::new("e1", "s1", 1).with_present(["cole"])),
            Mutation::belief(
                Belief::new("b1", "cole", "The butler did it", "e1")
                    .about("butler.is_guilty")
                    .false_because("the butler was framed"),
            ),
            put(
                Event::new("e2", "s2", 2)
                    .with_present(["cole", "marcus"])
                    .revealing(Revelation::hidden("butler.is_guilty").told_by("cole", ["marcus"])),
            ),
        ]);
        let set = KnowledgeProjector::new().project(&w, &marcus(), 2);
        let fact = set.fact(&FactKey::from("butler.is_guilty")).unwrap();
        assert_eq!(fact.source, KnowledgeSource::ToldBy);
        assert_eq!(fact.told_by, Some(CharacterId::from("cole")));
        assert!(fact.possibly_false);
        assert_eq!(set.possible_lies().count(), 1);
    }

    #[test]
    fn test_same_confidence_in_one_event_prefers_higher_priority() {
        let w = world(vec![put(
            Event::new("e1", "s1", 1)
                .with_present(["jane"])
                .with_nearby(["marcus"])
                .revealing(Revelation::new("jane.lied").told_by("jane", ["marcus"])),
        )]);
        let set = KnowledgeProjector::new().project(&w, &marcus(), 1);
        assert_eq!(
            set.fact(&FactKey::from("jane.lied")).map(|f| f.source),
            Some(KnowledgeSource::ToldBy)
        );
    }

    #[test]
    fn test_invalidation_removes_certain_fact() {
        let w = world(vec![
            put(
                Event::new("e1", "s1", 1)
                    .with_present(["marcus"])
                    .revealing(Revelation::new("cole.is_guilty")),
            ),
            put(Event::new("e4", "s3", 4).with_present(["marcus"])),
            Mutation::invalidate(FactInvalidation::new("marcus", "cole.is_guilty", "e4").because("frame-up")),
        ]);
        let projector = KnowledgeProjector::new();
        assert!(projector.project(&w, &marcus(), 3).knows(&FactKey::from("cole.is_guilty")));

        let after = projector.project(&w, &marcus(), 4);
        assert!(!after.knows(&FactKey::from("cole.is_guilty")));
        assert_eq!(after.invalidated().len(), 1);
    }

    #[test]
    fn test_belief_ends_when_contradicted_at_partial() {
        let w = world(vec![
            put(Event::new("e1", "s1", 1).with_present(["marcus"])),
            Mutation::belief(
                Belief::new("b1", "marcus", "Jane is faithful", "e1")
                    .about("jane.is_having_affair")
                    .false_because("she is having an affair"),
            ),
            put(
                Event::new("e2", "s2", 2)
                    .with_present(["marcus"])
                    .revealing(Revelation::hidden("jane.is_having_affair").rumored_to(["marcus"])),
            ),
            put(
                Event::new("e3", "s3", 3)
                    .with_nearby(["marcus"])
                    .revealing(Revelation::new("jane.is_having_affair")),
            ),
        ]);
        let projector = KnowledgeProjector::new();

        // A rumor is too weak to end the belief.
        let at_two = projector.project(&w, &marcus(), 2);
        assert_eq!(at_two.divergent_beliefs().count(), 1);

        let at_three = projector.project(&w, &marcus(), 3);
        assert_eq!(at_three.beliefs_held().count(), 0);
        let ended = &at_three.all_beliefs()[0];
        assert_eq!(ended.belief.held_until_event, Some(EventId::from("e3")));
        assert_eq!(ended.held_until_order, Some(3));
    }

    #[test]
    fn test_belief_with_unknown_start_is_skipped() {
        let w = world(vec![Mutation::belief(Belief::new("b1", "marcus", "Nothing happened", "missing"))]);
        let set = KnowledgeProjector::new().project(&w, &marcus(), 10);
        assert!(set.all_beliefs().is_empty());
    }

    #[test]
    fn test_project_all_covers_mentioned_characters() {
        let w = world(vec![put(
            Event::new("e1", "s1", 1)
                .with_present(["marcus", "jane"])
                .revealing(Revelation::new("letter.exists")),
        )]);
        let all = KnowledgeProjector::new().project_all(&w, 1);
        assert_eq!(all.len(), 2);
        assert!(all.values().all(|set| set.knows(&FactKey::from("letter.exists"))));
    }
}
