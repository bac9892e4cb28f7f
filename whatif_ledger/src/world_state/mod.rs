//! World state as seen from one decision path.
//!
//! There is no single mutable "god view" of the world. A [`WorldState`] is an
//! immutable snapshot resolved from the ledger for one path, and every read
//! is parameterized by story order.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;
use std::sync::Arc;

use crate::documents::{Belief, DocumentSet, FactInvalidation};
use crate::entities::{CharacterId, DecisionId, EventId, FactKey, PropId, StoryOrder};
use crate::events::EventRecord;
use crate::ledger::ContentHash;

/// A recorded value of a world-state key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateEntry {
    pub value: String,
    pub event: EventId,
}

/// Resolved, read-only world for one decision path.
#[derive(Debug, Clone)]
pub struct WorldState {
    path: Vec<DecisionId>,
    content_hash: ContentHash,

    /// Visible events, sorted by story order.
    events: Vec<EventRecord>,

    /// Index: event id -> position in `events`.
    positions: HashMap<EventId, usize>,

    /// Index: key -> order -> value, for logarithmic point lookups.
    state_index: HashMap<String, BTreeMap<StoryOrder, StateEntry>>,

    beliefs: Vec<Belief>,
    approvals: BTreeSet<(CharacterId, FactKey)>,
    invalidations: Vec<FactInvalidation>,
}

impl WorldState {
    pub fn from_documents(path: Vec<DecisionId>, documents: &DocumentSet, content_hash: ContentHash) -> Self {
        let mut events: Vec<EventRecord> = documents.events().cloned().collect();
        events.sort_by(|a, b| {
            a.story_order()
                .cmp(&b.story_order())
                .then_with(|| a.id().cmp(b.id()))
        });

        let positions = events
            .iter()
            .enumerate()
            .map(|(pos, record)| (record.event.id.clone(), pos))
            .collect();

        let mut state_index: HashMap<String, BTreeMap<StoryOrder, StateEntry>> = HashMap::new();
        for record in &events {
            for change in &record.changes {
                state_index.entry(change.key.clone()).or_default().insert(
                    record.story_order(),
                    StateEntry {
                        value: change.value.clone(),
                        event: record.event.id.clone(),
                    },
                );
            }
        }

        Self {
            path,
            content_hash,
            events,
            positions,
            state_index,
            beliefs: documents.beliefs().cloned().collect(),
            approvals: documents
                .approvals()
                .map(|a| (a.character_id.clone(), a.fact_key.clone()))
                .collect(),
            invalidations: documents.invalidations().cloned().collect(),
        }
    }

    /// The decision path this view was resolved for.
    pub fn path(&self) -> &[DecisionId] {
        &self.path
    }

    pub fn content_hash(&self) -> &ContentHash {
        &self.content_hash
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// All visible events in story order.
    pub fn events(&self) -> &[EventRecord] {
        &self.events
    }

    pub fn event(&self, id: &EventId) -> Option<&EventRecord> {
        self.positions.get(id).and_then(|pos| self.events.get(*pos))
    }

    pub fn order_of(&self, id: &EventId) -> Option<StoryOrder> {
        self.event(id).map(EventRecord::story_order)
    }

    pub fn max_order(&self) -> Option<StoryOrder> {
        self.events.last().map(EventRecord::story_order)
    }

    fn bounds(&self, from: StoryOrder, to: StoryOrder) -> (usize, usize) {
        let start = self.events.partition_point(|e| e.story_order() < from);
        let end = self.events.partition_point(|e| e.story_order() <= to).max(start);
        (start, end)
    }

    /// Events with `from <= story_order <= to`, in story order.
    pub fn read_range(&self, from: StoryOrder, to: StoryOrder) -> std::slice::Iter<'_, EventRecord> {
        let (start, end) = self.bounds(from, to);
        self.events[start..end].iter()
    }

    /// Most recent value of `key` at or before `at_order`.
    pub fn current_value(&self, key: &str, at_order: StoryOrder) -> Option<&str> {
        self.state_entry(key, at_order).map(|entry| entry.value.as_str())
    }

    pub fn state_entry(&self, key: &str, at_order: StoryOrder) -> Option<&StateEntry> {
        self.state_index
            .get(key)?
            .range((Bound::Unbounded, Bound::Included(at_order)))
            .next_back()
            .map(|(_, entry)| entry)
    }

    /// Every recorded value of `key`, oldest first.
    pub fn history(&self, key: &str) -> Vec<(StoryOrder, &StateEntry)> {
        self.state_index
            .get(key)
            .map(|changes| changes.iter().map(|(order, entry)| (*order, entry)).collect())
            .unwrap_or_default()
    }

    /// Ground-truth snapshot of every key at `at_order`.
    pub fn state_at(&self, at_order: StoryOrder) -> BTreeMap<String, String> {
        self.state_index
            .keys()
            .filter_map(|key| {
                self.current_value(key, at_order)
                    .map(|value| (key.clone(), value.to_string()))
            })
            .collect()
    }

    pub fn beliefs(&self) -> &[Belief] {
        &self.beliefs
    }

    pub fn invalidations(&self) -> &[FactInvalidation] {
        &self.invalidations
    }

    pub fn is_approved(&self, character: &CharacterId, fact_key: &FactKey) -> bool {
        self.approvals.contains(&(character.clone(), fact_key.clone()))
    }

    /// Every character mentioned anywhere on this path.
    pub fn characters(&self) -> BTreeSet<CharacterId> {
        let mut characters: BTreeSet<CharacterId> = self
            .events
            .iter()
            .flat_map(|record| record.event.mentioned_characters())
            .collect();
        characters.extend(self.beliefs.iter().map(|b| b.character_id.clone()));
        characters.extend(self.approvals.iter().map(|(c, _)| c.clone()));
        characters.extend(self.invalidations.iter().map(|i| i.character_id.clone()));
        characters
    }

    /// Every prop with at least one lifecycle entry.
    pub fn props(&self) -> BTreeSet<PropId> {
        self.events
            .iter()
            .flat_map(|record| record.event.props.iter().map(|p| p.prop.clone()))
            .collect()
    }
}

/// Lazy, finite, restartable walk over a range of a [`WorldState`].
///
/// Holds its own handle on the view, so it stays valid while the ledger
/// keeps growing.
#[derive(Debug, Clone)]
pub struct ReadRange {
    view: Arc<WorldState>,
    start: usize,
    next: usize,
    end: usize,
}

impl ReadRange {
    pub fn new(view: Arc<WorldState>, from: StoryOrder, to: StoryOrder) -> Self {
        let (start, end) = view.bounds(from, to);
        Self {
            view,
            start,
            next: start,
            end,
        }
    }

    /// Rewind to the first event of the range.
    pub fn restart(&mut self) {
        self.next = self.start;
    }

    pub fn remaining(&self) -> usize {
        self.end - self.next
    }
}

impl Iterator for ReadRange {
    type Item = EventRecord;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.end {
            return None;
        }
        let record = self.view.events.get(self.next).cloned();
        self.next += 1;
        record
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining(), Some(self.remaining()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::documents::Mutation;
    use crate::events::{Event, WorldStateChange};
    use crate::entities::PropInteraction;

    fn view_of(mutations: Vec<Mutation>) -> WorldState {
        let documents: DocumentSet = mutations.iter().collect();
        WorldState::from_documents(vec![DecisionId::nil()], &documents, ContentHash::of(b"test"))
    }

    fn sample() -> WorldState {
        view_of(vec![
            Mutation::event(
                Event::new("e3", "s2", 30).with_present(["jane"]),
                vec![WorldStateChange::new("letter.location", "fireplace")],
            ),
            Mutation::event(
                Event::new("e1", "s1", 10)
                    .with_present(["marcus"])
                    .with_prop(PropInteraction::new("letter", "found").by("marcus")),
                vec![WorldStateChange::new("letter.location", "desk")],
            ),
            Mutation::event(Event::new("e2", "s1", 20), vec![]),
            Mutation::approve("marcus", "jane.has_secret"),
        ])
    }

    #[test]
    fn test_events_sorted_by_story_order() {
        let view = sample();
        let orders: Vec<_> = view.events().iter().map(|e| e.story_order()).collect();
        assert_eq!(orders, vec![10, 20, 30]);
        assert_eq!(view.max_order(), Some(30));
    }

    #[test]
    fn test_read_range_bounds_inclusive() {
        let view = sample();
        assert_eq!(view.read_range(10, 20).count(), 2);
        assert_eq!(view.read_range(11, 29).count(), 1);
        assert_eq!(view.read_range(31, 100).count(), 0);
        assert_eq!(view.read_range(20, 10).count(), 0);
    }

    #[test]
    fn test_read_range_restart() {
        let mut range = ReadRange::new(Arc::new(sample()), 0, 100);
        assert_eq!(range.by_ref().count(), 3);
        assert_eq!(range.next(), None);
        range.restart();
        assert_eq!(range.next().map(|r| r.event.id.0), Some("e1".to_string()));
    }

    #[test]
    fn test_current_value_and_state_at() {
        let view = sample();
        assert_eq!(view.current_value("letter.location", 5), None);
        assert_eq!(view.current_value("letter.location", 25), Some("desk"));
        assert_eq!(view.current_value("letter.location", 30), Some("fireplace"));
        assert_eq!(view.state_at(30).get("letter.location").map(String::as_str), Some("fireplace"));
        assert_eq!(view.history("letter.location").len(), 2);
    }

    #[test]
    fn test_characters_props_and_approvals() {
        let view = sample();
        assert!(view.characters().contains(&CharacterId::from("jane")));
        assert!(view.props().contains(&PropId::from("letter")));
        assert!(view.is_approved(&CharacterId::from("marcus"), &FactKey::from("jane.has_secret")));
        assert!(!view.is_approved(&CharacterId::from("jane"), &FactKey::from("jane.has_secret")));
    }
}
