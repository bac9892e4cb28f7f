//! Decision Graph - an arena of immutable decision nodes addressed by id.

use std::collections::HashMap;
use tracing::{debug, warn};
use whatif_ledger::{DecisionId, DocumentSet, Mutation};

use super::{Decision, DecisionType};
use crate::error::{CoreError, Result};

/// The tree of decisions.
///
/// Nodes refer to their parent by id. A node can only be inserted under an
/// existing parent, so the graph is always a tree.
#[derive(Debug, Clone, Default)]
pub struct DecisionGraph {
    nodes: HashMap<DecisionId, Decision>,

    /// Index: parent -> children, in insertion order.
    children: HashMap<DecisionId, Vec<DecisionId>>,

    root: Option<DecisionId>,
}

impl DecisionGraph {
    /// Create a graph holding only `root`.
    pub fn with_root(root: Decision) -> Self {
        let id = root.id;
        let mut nodes = HashMap::new();
        nodes.insert(id, root);
        Self {
            nodes,
            children: HashMap::new(),
            root: Some(id),
        }
    }

    /// Rebuild a graph from persisted decisions, in any order.
    pub fn restore(decisions: impl IntoIterator<Item = Decision>) -> Result<Self> {
        let mut pending: Vec<Decision> = decisions.into_iter().collect();
        let root_pos = pending
            .iter()
            .position(Decision::is_root)
            .ok_or_else(|| CoreError::config("no root decision found"))?;
        let mut graph = Self::with_root(pending.swap_remove(root_pos));

        // Insert parents before children.
        while !pending.is_empty() {
            let before = pending.len();
            let mut rest = Vec::new();
            for decision in pending {
                match decision.parent_id {
                    Some(parent) if graph.contains(parent) => {
                        graph.insert(decision)?;
                    }
                    _ => rest.push(decision),
                }
            }
            if rest.len() == before {
                let first = &rest[0];
                return Err(CoreError::UnknownParent(first.parent_id.unwrap_or(first.id)));
            }
            pending = rest;
        }
        Ok(graph)
    }

    pub fn root(&self) -> Option<DecisionId> {
        self.root
    }

    pub fn get(&self, id: DecisionId) -> Option<&Decision> {
        self.nodes.get(&id)
    }

    pub fn contains(&self, id: DecisionId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn decisions(&self) -> impl Iterator<Item = &Decision> {
        self.nodes.values()
    }

    pub fn children(&self, id: DecisionId) -> &[DecisionId] {
        self.children.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Root-to-`id` path.
    pub fn ancestry(&self, id: DecisionId) -> Result<Vec<DecisionId>> {
        let mut path = Vec::new();
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            let decision = self.nodes.get(&current).ok_or(CoreError::UnknownDecision(current))?;
            path.push(current);
            cursor = decision.parent_id;
        }
        path.reverse();
        Ok(path)
    }

    /// Fold the mutations of every decision from the root to `id`.
    pub fn resolve_documents(&self, id: DecisionId) -> Result<DocumentSet> {
        let mut documents = DocumentSet::new();
        for decision in self.ancestry(id)? {
            if let Some(node) = self.nodes.get(&decision) {
                for mutation in &node.mutations {
                    documents.apply(mutation);
                }
            }
        }
        Ok(documents)
    }

    /// Build a child decision of `parent` without inserting it.
    ///
    /// Fails with `UnknownParent` when the parent does not exist, and with
    /// `AppliedTwice` when a mutation would not change the documents
    /// resolved so far (the parent's, plus the batch's earlier mutations).
    pub fn prepare(
        &self,
        parent: DecisionId,
        decision_type: DecisionType,
        label: impl Into<String>,
        notes: impl Into<String>,
        mutations: Vec<Mutation>,
    ) -> Result<Decision> {
        if !self.contains(parent) {
            warn!(parent = %parent, "Rejected decision with unknown parent");
            return Err(CoreError::UnknownParent(parent));
        }

        let base = self.resolve_documents(parent)?;
        self.prepare_on(parent, base, decision_type, label, notes, mutations)
            .map(|(decision, _)| decision)
    }

    /// [`DecisionGraph::prepare`] against `base`, the parent's already
    /// resolved documents. Returns the decision and `base` with its
    /// mutations folded in.
    pub fn prepare_on(
        &self,
        parent: DecisionId,
        mut base: DocumentSet,
        decision_type: DecisionType,
        label: impl Into<String>,
        notes: impl Into<String>,
        mutations: Vec<Mutation>,
    ) -> Result<(Decision, DocumentSet)> {
        if !self.contains(parent) {
            warn!(parent = %parent, "Rejected decision with unknown parent");
            return Err(CoreError::UnknownParent(parent));
        }

        for mutation in &mutations {
            if base.is_noop(mutation) {
                warn!(parent = %parent, key = %mutation.key(), "Rejected duplicate mutation");
                return Err(CoreError::AppliedTwice {
                    parent,
                    key: mutation.key(),
                });
            }
            base.apply(mutation);
        }

        Ok((Decision::child(parent, decision_type, label, mutations).with_notes(notes), base))
    }

    /// Attach a decision under its parent.
    pub fn insert(&mut self, decision: Decision) -> Result<DecisionId> {
        let parent = match decision.parent_id {
            Some(parent) if self.contains(parent) => parent,
            Some(parent) => return Err(CoreError::UnknownParent(parent)),
            None => return Err(CoreError::config("a graph has exactly one root decision")),
        };

        let id = decision.id;
        debug!(decision = %id, parent = %parent, label = %decision.label, "Decision attached");
        self.children.entry(parent).or_default().push(id);
        self.nodes.insert(id, decision);
        Ok(id)
    }

    /// Validate, build and attach a decision in one step.
    pub fn create_decision(
        &mut self,
        parent: DecisionId,
        decision_type: DecisionType,
        label: impl Into<String>,
        mutations: Vec<Mutation>,
    ) -> Result<DecisionId> {
        let decision = self.prepare(parent, decision_type, label, "", mutations)?;
        self.insert(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use whatif_ledger::{Belief, Event};

    fn graph() -> (DecisionGraph, DecisionId) {
        let root = Decision::root(
            "ingested",
            vec![Mutation::event(Event::new("e1", "s1", 1).with_present(["marcus"]), vec![])],
        );
        let id = root.id;
        (DecisionGraph::with_root(root), id)
    }

    #[test]
    fn test_create_and_ancestry() {
        let (mut graph, root) = graph();
        let a = graph
            .create_decision(root, DecisionType::Character, "Marcus distrusts Jane", vec![Mutation::belief(
                Belief::new("b1", "marcus", "Jane lies", "e1"),
            )])
            .unwrap();
        let b = graph
            .create_decision(a, DecisionType::Scene, "Cut the chase", vec![Mutation::retract_event("e1")])
            .unwrap();

        assert_eq!(graph.ancestry(b).unwrap(), vec![root, a, b]);
        assert_eq!(graph.children(root), &[a]);
        assert_eq!(graph.len(), 3);
    }

    #[test]
    fn test_unknown_parent_rejected() {
        let (mut graph, _) = graph();
        let result = graph.create_decision(DecisionId::new(), DecisionType::World, "orphan", vec![]);
        assert!(matches!(result, Err(CoreError::UnknownParent(_))));
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn test_duplicate_mutation_rejected() {
        let (mut graph, root) = graph();
        let same = Mutation::event(Event::new("e1", "s1", 1).with_present(["marcus"]), vec![]);
        let result = graph.create_decision(root, DecisionType::Scene, "again", vec![same]);
        assert!(matches!(result, Err(CoreError::AppliedTwice { .. })));

        let retract_missing = graph.create_decision(root, DecisionType::Scene, "cut", vec![Mutation::retract_event("e9")]);
        assert!(matches!(retract_missing, Err(CoreError::AppliedTwice { .. })));
    }

    #[test]
    fn test_empty_decision_allowed() {
        let (mut graph, root) = graph();
        assert!(graph.create_decision(root, DecisionType::Production, "note only", vec![]).is_ok());
    }

    #[test]
    fn test_resolve_documents_follows_path_only() {
        let (mut graph, root) = graph();
        let left = graph
            .create_decision(root, DecisionType::Scene, "cut e1", vec![Mutation::retract_event("e1")])
            .unwrap();
        let right = graph
            .create_decision(root, DecisionType::Scene, "add e2", vec![Mutation::event(Event::new("e2", "s1", 2), vec![])])
            .unwrap();

        assert_eq!(graph.resolve_documents(left).unwrap().events().count(), 0);
        assert_eq!(graph.resolve_documents(right).unwrap().events().count(), 2);
    }

    #[test]
    fn test_restore_any_order() {
        let (mut graph, root) = graph();
        let a = graph.create_decision(root, DecisionType::World, "a", vec![]).unwrap();
        let b = graph.create_decision(a, DecisionType::World, "b", vec![]).unwrap();

        let mut decisions: Vec<Decision> = graph.decisions().cloned().collect();
        decisions.sort_by_key(|d| if d.id == b { 0 } else { 1 });
        let restored = DecisionGraph::restore(decisions).unwrap();
        assert_eq!(restored.ancestry(b).unwrap(), vec![root, a, b]);
    }
}
