//! Story events - immutable facts about the story, keyed by story order.

mod revelation;

pub use revelation::*;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::entities::{CharacterId, EventId, PropInteraction, SceneId, StoryOrder};

/// Kind of narrative beat an event represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    #[default]
    Action,
    Revelation,
    Decision,
    Confrontation,
    Transition,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Action => "action",
            EventType::Revelation => "revelation",
            EventType::Decision => "decision",
            EventType::Confrontation => "confrontation",
            EventType::Transition => "transition",
        }
    }
}

/// Mood snapshot of a character.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct EmotionalState {
    #[serde(default)]
    pub mood: String,
    #[serde(default)]
    pub tension: String,
}

/// How an event moves a character emotionally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct EmotionalShift {
    #[serde(default)]
    pub before: EmotionalState,
    #[serde(default)]
    pub after: EmotionalState,
}

/// A delta to world state, owned by one event.
///
/// `key` is a dotted path such as `marcus.trust_in_jane`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldStateChange {
    pub key: String,
    pub value: String,
}

impl WorldStateChange {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// An immutable story event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,

    #[serde(default)]
    pub label: String,

    pub scene_id: SceneId,

    /// Causal clock; unique and strictly increasing within a timeline.
    pub story_order: StoryOrder,

    #[serde(default)]
    pub beat: String,

    #[serde(rename = "type", default)]
    pub event_type: EventType,

    /// In-fiction time, for display only. Never used for ordering.
    #[serde(default)]
    pub story_timestamp: String,

    #[serde(default)]
    pub characters_present: Vec<CharacterId>,

    #[serde(default)]
    pub characters_aware_after: Vec<CharacterId>,

    #[serde(default)]
    pub characters_unaware: Vec<CharacterId>,

    /// Co-located but out of the scene's line of sight.
    #[serde(default)]
    pub characters_nearby: Vec<CharacterId>,

    /// Earlier events this one causally depends on.
    #[serde(default)]
    pub triggers: BTreeSet<EventId>,

    /// Later events this one unlocks.
    #[serde(default)]
    pub enables: BTreeSet<EventId>,

    #[serde(default)]
    pub revelations: Vec<Revelation>,

    #[serde(default)]
    pub props: Vec<PropInteraction>,

    #[serde(default)]
    pub emotional_shifts: BTreeMap<CharacterId, EmotionalShift>,
}

impl Event {
    /// Create a new action event in `scene` at `story_order`.
    pub fn new(id: impl Into<EventId>, scene: impl Into<SceneId>, story_order: StoryOrder) -> Self {
        Self {
            id: id.into(),
            label: String::new(),
            scene_id: scene.into(),
            story_order,
            beat: String::new(),
            event_type: EventType::Action,
            story_timestamp: String::new(),
            characters_present: Vec::new(),
            characters_aware_after: Vec::new(),
            characters_unaware: Vec::new(),
            characters_nearby: Vec::new(),
            triggers: BTreeSet::new(),
            enables: BTreeSet::new(),
            revelations: Vec::new(),
            props: Vec::new(),
            emotional_shifts: BTreeMap::new(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_type(mut self, event_type: EventType) -> Self {
        self.event_type = event_type;
        self
    }

    pub fn with_beat(mut self, beat: impl Into<String>) -> Self {
        self.beat = beat.into();
        self
    }

    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.story_timestamp = timestamp.into();
        self
    }

    pub fn with_present<I, C>(mut self, characters: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<CharacterId>,
    {
        self.characters_present.extend(characters.into_iter().map(Into::into));
        self
    }

    pub fn with_aware_after<I, C>(mut self, characters: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<CharacterId>,
    {
        self.characters_aware_after.extend(characters.into_iter().map(Into::into));
        self
    }

    pub fn with_unaware<I, C>(mut self, characters: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<CharacterId>,
    {
        self.characters_unaware.extend(characters.into_iter().map(Into::into));
        self
    }

    pub fn with_nearby<I, C>(mut self, characters: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<CharacterId>,
    {
        self.characters_nearby.extend(characters.into_iter().map(Into::into));
        self
    }

    pub fn triggered_by(mut self, event: impl Into<EventId>) -> Self {
        self.triggers.insert(event.into());
        self
    }

    pub fn enabling(mut self, event: impl Into<EventId>) -> Self {
        self.enables.insert(event.into());
        self
    }

    pub fn revealing(mut self, revelation: Revelation) -> Self {
        self.revelations.push(revelation);
        self
    }

    pub fn with_prop(mut self, interaction: PropInteraction) -> Self {
        self.props.push(interaction);
        self
    }

    pub fn with_emotional_shift(mut self, character: impl Into<CharacterId>, shift: EmotionalShift) -> Self {
        self.emotional_shifts.insert(character.into(), shift);
        self
    }

    /// Characters aware of the event once it is over: present or told
    /// afterwards, minus anyone explicitly kept in the dark.
    pub fn aware_characters(&self) -> BTreeSet<CharacterId> {
        let unaware: BTreeSet<_> = self.characters_unaware.iter().collect();
        self.characters_present
            .iter()
            .chain(&self.characters_aware_after)
            .filter(|c| !unaware.contains(c))
            .cloned()
            .collect()
    }

    /// Every character this event mentions in any role.
    pub fn mentioned_characters(&self) -> BTreeSet<CharacterId> {
        let mut characters: BTreeSet<CharacterId> = self
            .characters_present
            .iter()
            .chain(&self.characters_aware_after)
            .chain(&self.characters_unaware)
            .chain(&self.characters_nearby)
            .cloned()
            .collect();
        for revelation in &self.revelations {
            characters.extend(revelation.participants());
        }
        characters.extend(self.props.iter().filter_map(|p| p.character.clone()));
        characters.extend(self.emotional_shifts.keys().cloned());
        characters
    }
}

/// An event together with the world-state deltas it carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub event: Event,
    #[serde(default)]
    pub changes: Vec<WorldStateChange>,
}

impl EventRecord {
    pub fn new(event: Event, changes: Vec<WorldStateChange>) -> Self {
        Self { event, changes }
    }

    pub fn id(&self) -> &EventId {
        &self.event.id
    }

    pub fn story_order(&self) -> StoryOrder {
        self.event.story_order
    }
}

impl From<Event> for EventRecord {
    fn from(event: Event) -> Self {
        Self::new(event, Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_builder() {
        let event = Event::new("evt_001", "scene_001", 1)
            .with_label("Marcus finds the letter")
            .with_type(EventType::Revelation)
            .with_present(["marcus"])
            .triggered_by("evt_000");

        assert_eq!(event.story_order, 1);
        assert_eq!(event.event_type, EventType::Revelation);
        assert!(event.triggers.contains(&EventId::from("evt_000")));
    }

    #[test]
    fn test_aware_characters_excludes_unaware() {
        let event = Event::new("evt_002", "scene_001", 2)
            .with_present(["marcus", "jane"])
            .with_aware_after(["cole"])
            .with_unaware(["jane"]);

        let aware = event.aware_characters();
        assert!(aware.contains(&CharacterId::from("marcus")));
        assert!(aware.contains(&CharacterId::from("cole")));
        assert!(!aware.contains(&CharacterId::from("jane")));
    }

    #[test]
    fn test_event_type_serializes_snake_case() {
        let event = Event::new("evt_003", "scene_002", 3).with_type(EventType::Confrontation);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "confrontation");
    }

    #[test]
    fn test_mentioned_characters_covers_revelations_and_props() {
        let event = Event::new("evt_004", "scene_002", 4)
            .with_present(["marcus"])
            .revealing(Revelation::new("jane.has_key").told_by("cole", ["ruth"]))
            .with_prop(PropInteraction::new("key", "found").by("ada"));

        let mentioned = event.mentioned_characters();
        for name in ["marcus", "cole", "ruth", "ada"] {
            assert!(mentioned.contains(&CharacterId::from(name)), "missing {name}");
        }
    }
}
