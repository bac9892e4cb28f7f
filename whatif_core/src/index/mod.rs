//! Derived Index - the rebuildable query surface for one timeline.
//!
//! The index is never a source of truth. It is built in full from the
//! resolved world and the decision path, tagged with an [`IndexVersion`]
//! over its inputs, and swapped in atomically by the [`IndexSynchronizer`].

mod cancel;
mod sync;

pub use cancel::*;
pub use sync::*;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;
use whatif_ledger::{
    CharacterId, ContentHash, DecisionId, EventId, PropId, SceneId, StoryOrder, TimelineId, WorldState,
};

use crate::decisions::{Decision, DecisionType, Timeline};
use crate::error::{CoreError, Result};
use crate::knowledge_base::{BeliefState, KnowledgeProjector, KnowledgeSet};

/// Hash over the inputs an index was built from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IndexVersion(String);

impl IndexVersion {
    /// Hash of (decision path, max visible story order, ledger content hash).
    pub fn compute(path: &[DecisionId], max_order: Option<StoryOrder>, ledger_hash: &ContentHash) -> Self {
        let mut hasher = Sha256::new();
        hasher.update((path.len() as u64).to_le_bytes());
        for decision in path {
            hasher.update(decision.0.as_bytes());
        }
        match max_order {
            Some(order) => {
                hasher.update([1u8]);
                hasher.update(order.to_le_bytes());
            }
            None => hasher.update([0u8]),
        }
        hasher.update(ledger_hash.as_str().as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for IndexVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Everything one rebuild reads.
#[derive(Debug, Clone)]
pub struct IndexInputs {
    pub timeline: Timeline,
    pub world: Arc<WorldState>,
    /// Decisions on the path, root first.
    pub decisions: Vec<Decision>,
}

impl IndexInputs {
    pub fn version(&self) -> IndexVersion {
        IndexVersion::compute(
            &self.timeline.decision_path,
            self.world.max_order(),
            self.world.content_hash(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRow {
    pub id: EventId,
    pub label: String,
    pub scene_id: SceneId,
    pub story_order: StoryOrder,
    pub beat: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub story_timestamp: String,
}

/// Awareness of one character for one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AwarenessRow {
    pub event_id: EventId,
    pub story_order: StoryOrder,
    pub character_id: CharacterId,
    pub aware: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChangeRow {
    pub event_id: EventId,
    pub story_order: StoryOrder,
    pub key: String,
    pub value: String,
}

/// Latest emotional state of a character within a scene.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmotionalStateRow {
    pub character_id: CharacterId,
    pub scene_id: SceneId,
    pub mood: String,
    pub tension: String,
    pub event_id: EventId,
}

/// One prop lifecycle entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropEventRow {
    pub prop_id: PropId,
    pub event_id: EventId,
    pub story_order: StoryOrder,
    pub action: String,
    pub location: Option<String>,
    pub character_id: Option<CharacterId>,
    pub visibility: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionRow {
    pub id: DecisionId,
    pub label: String,
    pub parent_id: Option<DecisionId>,
    #[serde(rename = "type")]
    pub decision_type: DecisionType,
    pub notes: String,
    pub order_index: usize,
}

/// Read-only, rebuildable query surface for one timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedIndex {
    pub timeline_id: TimelineId,
    pub version: IndexVersion,
    pub decision_path: Vec<DecisionId>,
    pub max_order: Option<StoryOrder>,

    events: Vec<EventRow>,
    awareness: Vec<AwarenessRow>,
    world_state: Vec<StateChangeRow>,
    emotional_states: Vec<EmotionalStateRow>,
    prop_events: Vec<PropEventRow>,
    decisions: Vec<DecisionRow>,

    /// Projections at `max_order`, by character.
    knowledge: BTreeMap<CharacterId, KnowledgeSet>,
}

impl DerivedIndex {
    /// Build an index from scratch, checking `cancel` between stages.
    pub fn build(inputs: &IndexInputs, projector: &KnowledgeProjector, cancel: &CancelToken) -> Result<Self> {
        let timeline_id = inputs.timeline.id.clone();
        let checkpoint = || {
            if cancel.is_cancelled() {
                Err(CoreError::ReindexCancelled(timeline_id.clone()))
            } else {
                Ok(())
            }
        };
        let world = &inputs.world;
        let records = world.events();

        checkpoint()?;
        let mut events = Vec::with_capacity(records.len());
        let mut awareness = Vec::new();
        for record in records {
            let event = &record.event;
            events.push(EventRow {
                id: event.id.clone(),
                label: event.label.clone(),
                scene_id: event.scene_id.clone(),
                story_order: event.story_order,
                beat: event.beat.clone(),
                event_type: event.event_type.as_str().to_string(),
                story_timestamp: event.story_timestamp.clone(),
            });
            let aware = event.aware_characters();
            for character in &aware {
                awareness.push(AwarenessRow {
                    event_id: event.id.clone(),
                    story_order: event.story_order,
                    character_id: character.clone(),
                    aware: true,
                });
            }
            for character in event.characters_unaware.iter().filter(|c| !aware.contains(*c)) {
                awareness.push(AwarenessRow {
                    event_id: event.id.clone(),
                    story_order: event.story_order,
                    character_id: character.clone(),
                    aware: false,
                });
            }
        }

        checkpoint()?;
        let world_state = records
            .iter()
            .flat_map(|record| {
                record.changes.iter().map(move |change| StateChangeRow {
                    event_id: record.event.id.clone(),
                    story_order: record.story_order(),
                    key: change.key.clone(),
                    value: change.value.clone(),
                })
            })
            .collect();

        checkpoint()?;
        let mut latest: BTreeMap<(CharacterId, SceneId), EmotionalStateRow> = BTreeMap::new();
        for record in records {
            let event = &record.event;
            for (character, shift) in &event.emotional_shifts {
                latest.insert(
                    (character.clone(), event.scene_id.clone()),
                    EmotionalStateRow {
                        character_id: character.clone(),
                        scene_id: event.scene_id.clone(),
                        mood: shift.after.mood.clone(),
                        tension: shift.after.tension.clone(),
                        event_id: event.id.clone(),
                    },
                );
            }
        }
        let emotional_states = latest.into_values().collect();

        checkpoint()?;
        let prop_events = records
            .iter()
            .flat_map(|record| {
                record.event.props.iter().map(move |p| PropEventRow {
                    prop_id: p.prop.clone(),
                    event_id: record.event.id.clone(),
                    story_order: record.story_order(),
                    action: p.action.clone(),
                    location: p.location.clone(),
                    character_id: p.character.clone(),
                    visibility: p.visibility.clone(),
                })
            })
            .collect();

        let decisions = inputs
            .decisions
            .iter()
            .enumerate()
            .map(|(order_index, d)| DecisionRow {
                id: d.id,
                label: d.label.clone(),
                parent_id: d.parent_id,
                decision_type: d.decision_type,
                notes: d.notes.clone(),
                order_index,
            })
            .collect();

        let max_order = world.max_order();
        let at = max_order.unwrap_or(0);
        let mut knowledge = BTreeMap::new();
        for character in world.characters() {
            checkpoint()?;
            let set = projector.project(world, &character, at);
            knowledge.insert(character, set);
        }

        Ok(Self {
            timeline_id: inputs.timeline.id.clone(),
            version: inputs.version(),
            decision_path: inputs.timeline.decision_path.to_vec(),
            max_order,
            events,
            awareness,
            world_state,
            emotional_states,
            prop_events,
            decisions,
            knowledge,
        })
    }

    /// Canonical serialized form; identical inputs give identical bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// All events, in story order.
    pub fn events(&self) -> &[EventRow] {
        &self.events
    }

    pub fn event(&self, id: &EventId) -> Option<&EventRow> {
        self.events.iter().find(|e| &e.id == id)
    }

    /// Events `character` is aware of with `story_order <= max_order`.
    pub fn events_aware(&self, character: &CharacterId, max_order: StoryOrder) -> Vec<&EventRow> {
        self.awareness
            .iter()
            .filter(|row| row.aware && &row.character_id == character && row.story_order <= max_order)
            .filter_map(|row| self.event(&row.event_id))
            .collect()
    }

    /// Characters explicitly unaware of `event`.
    pub fn unaware_of(&self, event: &EventId) -> Vec<&CharacterId> {
        self.awareness
            .iter()
            .filter(|row| !row.aware && &row.event_id == event)
            .map(|row| &row.character_id)
            .collect()
    }

    pub fn knowledge(&self, character: &CharacterId) -> Option<&KnowledgeSet> {
        self.knowledge.get(character)
    }

    pub fn characters(&self) -> impl Iterator<Item = &CharacterId> {
        self.knowledge.keys()
    }

    /// Beliefs `character` holds at the end of the timeline.
    pub fn belief_state(&self, character: &CharacterId) -> Vec<&BeliefState> {
        self.knowledge
            .get(character)
            .map(|set| set.beliefs_held().collect())
            .unwrap_or_default()
    }

    /// Lifecycle entries for `prop`, in story order.
    pub fn prop_lifecycle(&self, prop: &PropId) -> Vec<&PropEventRow> {
        self.prop_events.iter().filter(|row| &row.prop_id == prop).collect()
    }

    pub fn emotional_state(&self, character: &CharacterId, scene: &SceneId) -> Option<&EmotionalStateRow> {
        self.emotional_states
            .iter()
            .find(|row| &row.character_id == character && &row.scene_id == scene)
    }

    /// Recorded changes to `key`, oldest first.
    pub fn state_changes(&self, key: &str) -> Vec<&StateChangeRow> {
        self.world_state.iter().filter(|row| row.key == key).collect()
    }

    pub fn decisions(&self) -> &[DecisionRow] {
        &self.decisions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use whatif_ledger::{
        DocumentSet, EmotionalShift, EmotionalState, Event, Mutation, PropInteraction, Revelation, WorldStateChange,
    };

    fn inputs() -> IndexInputs {
        let root = Decision::root("", vec![]);
        let mutations = vec![
            Mutation::event(
                Event::new("e1", "s1", 1)
                    .with_label("Marcus finds the letter")
                    .with_present(["marcus"])
                    .with_unaware(["jane"])
                    .with_prop(PropInteraction::new("letter", "found").by("marcus").at("desk"))
                    .revealing(Revelation::new("jane.wrote_letter")),
                vec![WorldStateChange::new("letter.location", "marcus.pocket")],
            ),
            Mutation::event(
                Event::new("e2", "s1", 2)
                    .with_present(["marcus", "jane"])
                    .with_prop(PropInteraction::new("letter", "burned").by("jane").at("fireplace"))
                    .with_emotional_shift(
                        "marcus",
                        EmotionalShift {
                            before: EmotionalState { mood: "calm".into(), tension: "low".into() },
                            after: EmotionalState { mood: "suspicious".into(), tension: "high".into() },
                        },
                    ),
                vec![],
            ),
        ];
        let documents: DocumentSet = mutations.iter().collect();
        let path = vec![root.id];
        let world = WorldState::from_documents(path.clone(), &documents, ContentHash::of(b"inputs"));
        IndexInputs {
            timeline: Timeline::new("main", "Main", path),
            world: Arc::new(world),
            decisions: vec![root],
        }
    }

    fn build() -> DerivedIndex {
        DerivedIndex::build(&inputs(), &KnowledgeProjector::new(), &CancelToken::new()).unwrap()
    }

    #[test]
    fn test_version_depends_on_every_input() {
        let path = [DecisionId::new()];
        let hash = ContentHash::of(b"ledger");
        let base = IndexVersion::compute(&path, Some(3), &hash);

        assert_eq!(base, IndexVersion::compute(&path, Some(3), &hash));
        assert_ne!(base, IndexVersion::compute(&path, Some(4), &hash));
        assert_ne!(base, IndexVersion::compute(&path, None, &hash));
        assert_ne!(base, IndexVersion::compute(&path, Some(3), &ContentHash::of(b"other")));
        assert_ne!(base, IndexVersion::compute(&[DecisionId::new()], Some(3), &hash));
    }

    #[test]
    fn test_build_is_byte_identical() {
        assert_eq!(build().to_bytes().unwrap(), build().to_bytes().unwrap());
    }

    #[test]
    fn test_awareness_queries() {
        let index = build();
        let jane = CharacterId::from("jane");
        let aware: Vec<_> = index.events_aware(&jane, 10).iter().map(|e| e.id.as_str()).collect();
        assert_eq!(aware, vec!["e2"]);
        assert_eq!(index.events_aware(&CharacterId::from("marcus"), 1).len(), 1);
        assert_eq!(index.unaware_of(&EventId::from("e1")), vec![&jane]);
    }

    #[test]
    fn test_prop_lifecycle_and_emotions() {
        let index = build();
        let lifecycle: Vec<_> = index
            .prop_lifecycle(&PropId::from("letter"))
            .iter()
            .map(|row| row.action.as_str())
            .collect();
        assert_eq!(lifecycle, vec!["found", "burned"]);

        let mood = index
            .emotional_state(&CharacterId::from("marcus"), &SceneId::from("s1"))
            .map(|row| row.mood.as_str());
        assert_eq!(mood, Some("suspicious"));
        assert_eq!(index.state_changes("letter.location").len(), 1);
    }

    #[test]
    fn test_knowledge_projected_at_end() {
        let index = build();
        let marcus = index.knowledge(&CharacterId::from("marcus")).unwrap();
        assert_eq!(marcus.at_order, 2);
        assert!(marcus.knows(&whatif_ledger::FactKey::from("jane.wrote_letter")));
    }

    #[test]
    fn test_cancelled_build() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let result = DerivedIndex::build(&inputs(), &KnowledgeProjector::new(), &cancel);
        assert!(matches!(result, Err(CoreError::ReindexCancelled(_))));
    }

    #[test]
    fn test_bytes_round_trip() {
        let index = build();
        let back = DerivedIndex::from_bytes(&index.to_bytes().unwrap()).unwrap();
        assert_eq!(back, index);
    }
}
