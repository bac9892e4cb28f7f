//! Documents and the patch language that changes them.
//!
//! A decision is an ordered list of [`Mutation`]s. Folding the mutations of
//! every decision on a path, in path order, yields the resolved
//! [`DocumentSet`] for that path.

mod belief;

pub use belief::*;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::entities::{BeliefId, CharacterId, EventId, FactKey};
use crate::events::{Event, EventRecord, WorldStateChange};

/// Address of a document within the resolved state.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DocumentKey {
    Event { id: EventId },
    Belief { id: BeliefId },
    Approval { character: CharacterId, fact_key: FactKey },
    Invalidation { character: CharacterId, fact_key: FactKey, at_event: EventId },
}

impl std::fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DocumentKey::Event { id } => write!(f, "event:{}", id),
            DocumentKey::Belief { id } => write!(f, "belief:{}", id),
            DocumentKey::Approval { character, fact_key } => {
                write!(f, "approval:{}/{}", character, fact_key)
            }
            DocumentKey::Invalidation { character, fact_key, at_event } => {
                write!(f, "invalidation:{}/{}@{}", character, fact_key, at_event)
            }
        }
    }
}

/// A source-of-truth document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Document {
    Event(EventRecord),
    Belief(Belief),
    Approval(InferenceApproval),
    Invalidation(FactInvalidation),
}

impl Document {
    pub fn key(&self) -> DocumentKey {
        match self {
            Document::Event(record) => DocumentKey::Event {
                id: record.event.id.clone(),
            },
            Document::Belief(belief) => DocumentKey::Belief {
                id: belief.id.clone(),
            },
            Document::Approval(approval) => DocumentKey::Approval {
                character: approval.character_id.clone(),
                fact_key: approval.fact_key.clone(),
            },
            Document::Invalidation(inv) => DocumentKey::Invalidation {
                character: inv.character_id.clone(),
                fact_key: inv.fact_key.clone(),
                at_event: inv.at_event.clone(),
            },
        }
    }
}

/// One document patch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", content = "document", rename_all = "snake_case")]
pub enum Mutation {
    /// Create the document, or supersede the version already at its key.
    Put(Document),
    /// Hide the document at this key from later decisions on the path.
    Retract(DocumentKey),
}

impl Mutation {
    /// Put an event with its world-state deltas.
    pub fn event(event: Event, changes: Vec<WorldStateChange>) -> Self {
        Mutation::Put(Document::Event(EventRecord::new(event, changes)))
    }

    pub fn belief(belief: Belief) -> Self {
        Mutation::Put(Document::Belief(belief))
    }

    pub fn approve(character: impl Into<CharacterId>, fact_key: impl Into<FactKey>) -> Self {
        Mutation::Put(Document::Approval(InferenceApproval::new(character, fact_key)))
    }

    pub fn invalidate(invalidation: FactInvalidation) -> Self {
        Mutation::Put(Document::Invalidation(invalidation))
    }

    pub fn retract_event(id: impl Into<EventId>) -> Self {
        Mutation::Retract(DocumentKey::Event { id: id.into() })
    }

    pub fn key(&self) -> DocumentKey {
        match self {
            Mutation::Put(doc) => doc.key(),
            Mutation::Retract(key) => key.clone(),
        }
    }

    /// The event this mutation puts, if any.
    pub fn as_event(&self) -> Option<&EventRecord> {
        match self {
            Mutation::Put(Document::Event(record)) => Some(record),
            _ => None,
        }
    }
}

/// Resolved document state along a decision path.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DocumentSet {
    documents: BTreeMap<DocumentKey, Document>,
}

impl DocumentSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether applying `mutation` would leave the set unchanged.
    pub fn is_noop(&self, mutation: &Mutation) -> bool {
        match mutation {
            Mutation::Put(doc) => self.documents.get(&doc.key()) == Some(doc),
            Mutation::Retract(key) => !self.documents.contains_key(key),
        }
    }

    /// Apply a mutation, returning the document it replaced or removed.
    pub fn apply(&mut self, mutation: &Mutation) -> Option<Document> {
        match mutation {
            Mutation::Put(doc) => self.documents.insert(doc.key(), doc.clone()),
            Mutation::Retract(key) => self.documents.remove(key),
        }
    }

    pub fn get(&self, key: &DocumentKey) -> Option<&Document> {
        self.documents.get(key)
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Document> {
        self.documents.values()
    }

    pub fn event(&self, id: &EventId) -> Option<&EventRecord> {
        match self.documents.get(&DocumentKey::Event { id: id.clone() }) {
            Some(Document::Event(record)) => Some(record),
            _ => None,
        }
    }

    pub fn events(&self) -> impl Iterator<Item = &EventRecord> {
        self.documents.values().filter_map(|doc| match doc {
            Document::Event(record) => Some(record),
            _ => None,
        })
    }

    pub fn beliefs(&self) -> impl Iterator<Item = &Belief> {
        self.documents.values().filter_map(|doc| match doc {
            Document::Belief(belief) => Some(belief),
            _ => None,
        })
    }

    pub fn approvals(&self) -> impl Iterator<Item = &InferenceApproval> {
        self.documents.values().filter_map(|doc| match doc {
            Document::Approval(approval) => Some(approval),
            _ => None,
        })
    }

    pub fn invalidations(&self) -> impl Iterator<Item = &FactInvalidation> {
        self.documents.values().filter_map(|doc| match doc {
            Document::Invalidation(inv) => Some(inv),
            _ => None,
        })
    }
}

impl<'a> FromIterator<&'a Mutation> for DocumentSet {
    fn from_iter<T: IntoIterator<Item = &'a Mutation>>(iter: T) -> Self {
        let mut set = DocumentSet::new();
        for mutation in iter {
            set.apply(mutation);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn letter_found() -> Mutation {
        Mutation::event(
            Event::new("evt_001", "scene_001", 1).with_present(["marcus"]),
            vec![WorldStateChange::new("letter.location", "desk")],
        )
    }

    #[test]
    fn test_put_then_identical_put_is_noop() {
        let mut set = DocumentSet::new();
        let put = letter_found();

        assert!(!set.is_noop(&put));
        set.apply(&put);
        assert!(set.is_noop(&put));
    }

    #[test]
    fn test_superseding_put_is_not_noop() {
        let mut set = DocumentSet::new();
        set.apply(&letter_found());

        let revised = Mutation::event(
            Event::new("evt_001", "scene_001", 1).with_present(["marcus", "jane"]),
            vec![],
        );
        assert!(!set.is_noop(&revised));

        let replaced = set.apply(&revised);
        assert!(replaced.is_some());
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_retract_absent_is_noop() {
        let mut set = DocumentSet::new();
        let retract = Mutation::retract_event("evt_001");
        assert!(set.is_noop(&retract));

        set.apply(&letter_found());
        assert!(!set.is_noop(&retract));
        set.apply(&retract);
        assert!(set.event(&EventId::from("evt_001")).is_none());
    }

    #[test]
    fn test_typed_accessors() {
        let set: DocumentSet = [
            letter_found(),
            Mutation::approve("marcus", "jane.has_secret"),
            Mutation::belief(Belief::new("b1", "marcus", "Jane is faithful", "evt_001")),
        ]
        .iter()
        .collect();

        assert_eq!(set.events().count(), 1);
        assert_eq!(set.approvals().count(), 1);
        assert_eq!(set.beliefs().count(), 1);
        assert_eq!(set.invalidations().count(), 0);
    }

    #[test]
    fn test_mutation_serde_shape() {
        let json = serde_json::to_value(Mutation::retract_event("evt_009")).unwrap();
        assert_eq!(json["op"], "retract");
        assert_eq!(json["document"]["kind"], "event");
    }
}
