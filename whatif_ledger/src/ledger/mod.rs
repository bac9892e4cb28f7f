//! The Ledger Store - append-only, content-hashed log of document mutations.
//!
//! Every entry belongs to exactly one decision. A timeline sees the entries
//! of the decisions on its path, folded in path order; it never sees entries
//! of decisions off its path. Entries are never edited: a correction is a
//! new entry that supersedes or retracts, owned by a later decision.

mod hash;
mod validate;

pub use hash::*;
pub use validate::check_causality;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::documents::{DocumentSet, Mutation};
use crate::entities::{DecisionId, EventId, StoryOrder};
use crate::error::{LedgerError, Result};
use crate::events::{Event, WorldStateChange};
use crate::world_state::{ReadRange, WorldState};

/// One immutable ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub seq: u64,
    pub decision: DecisionId,
    pub mutation: Mutation,
    pub content_hash: ContentHash,
}

impl LedgerEntry {
    fn seal(seq: u64, decision: DecisionId, mutation: Mutation) -> Result<Self> {
        let content_hash = Self::compute_hash(seq, decision, &mutation)?;
        Ok(Self {
            seq,
            decision,
            mutation,
            content_hash,
        })
    }

    fn compute_hash(seq: u64, decision: DecisionId, mutation: &Mutation) -> Result<ContentHash> {
        let body = serde_json::to_vec(mutation)?;
        Ok(ContentHash::of_parts([
            seq.to_le_bytes().as_slice(),
            decision.0.as_bytes().as_slice(),
            body.as_slice(),
        ]))
    }

    /// Recompute the content hash and compare it with the stored one.
    pub fn verify(&self) -> Result<()> {
        let actual = Self::compute_hash(self.seq, self.decision, &self.mutation)?;
        if actual != self.content_hash {
            error!(
                seq = self.seq,
                decision = %self.decision,
                expected = %self.content_hash.short(),
                actual = %actual.short(),
                "Ledger entry failed hash verification"
            );
            return Err(LedgerError::LedgerCorrupted {
                seq: self.seq,
                expected: self.content_hash.clone(),
                actual,
            });
        }
        Ok(())
    }
}

/// The append-only ledger.
#[derive(Debug, Default)]
pub struct Ledger {
    entries: Vec<LedgerEntry>,

    /// Index: decision -> positions of its entries, in append order.
    by_decision: HashMap<DecisionId, Vec<usize>>,

    /// Resolved paths, verified once when first resolved.
    views: Mutex<HashMap<Vec<DecisionId>, Resolved>>,
}

/// One decision path, resolved and shared by every reader.
#[derive(Debug, Clone)]
struct Resolved {
    documents: Arc<DocumentSet>,
    world: Arc<WorldState>,
}

impl Clone for Ledger {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
            by_decision: self.by_decision.clone(),
            views: Mutex::new(HashMap::new()),
        }
    }
}

impl Ledger {
    /// Create a new empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a ledger from persisted entries.
    ///
    /// Hashes are not checked here; every read verifies the entries it
    /// touches, and [`Ledger::verify`] checks everything at once.
    pub fn restore(entries: Vec<LedgerEntry>) -> Self {
        let mut by_decision: HashMap<DecisionId, Vec<usize>> = HashMap::new();
        for (pos, entry) in entries.iter().enumerate() {
            by_decision.entry(entry.decision).or_default().push(pos);
        }
        Self {
            entries,
            by_decision,
            views: Mutex::new(HashMap::new()),
        }
    }

    /// Verify the content hash of every entry.
    pub fn verify(&self) -> Result<()> {
        self.entries.iter().try_for_each(LedgerEntry::verify)
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether any entry has been written for `decision`.
    pub fn is_committed(&self, decision: DecisionId) -> bool {
        self.by_decision.contains_key(&decision)
    }

    /// Entries owned by `decision`, in append order.
    pub fn entries_for(&self, decision: DecisionId) -> impl Iterator<Item = &LedgerEntry> {
        self.by_decision
            .get(&decision)
            .into_iter()
            .flatten()
            .filter_map(|pos| self.entries.get(*pos))
    }

    /// The documents visible along `path`.
    ///
    /// Entries are verified when a path is first resolved; later reads share
    /// the cached set.
    pub fn documents(&self, path: &[DecisionId]) -> Result<Arc<DocumentSet>> {
        self.resolved(path).map(|resolved| resolved.documents)
    }

    /// Hash over the content hashes of every entry visible along `path`.
    pub fn content_hash(&self, path: &[DecisionId]) -> Result<ContentHash> {
        self.view(path).map(|view| view.content_hash().clone())
    }

    fn resolve(&self, path: &[DecisionId]) -> Result<(DocumentSet, ContentHash)> {
        let mut documents = DocumentSet::new();
        let mut hashes: Vec<&[u8]> = Vec::new();
        for decision in path {
            for entry in self.entries_for(*decision) {
                entry.verify()?;
                documents.apply(&entry.mutation);
                hashes.push(entry.content_hash.as_str().as_bytes());
            }
        }
        Ok((documents, ContentHash::of_parts(hashes)))
    }

    /// Check that folding `mutations` into `decision` on top of `path`
    /// keeps every causal invariant. Nothing is written.
    ///
    /// `path` is the root-to-decision path; the decision itself is appended
    /// when missing, so a parent's ancestry works too.
    pub fn validate(&self, decision: DecisionId, path: &[DecisionId], mutations: &[Mutation]) -> Result<()> {
        let path = Self::path_through(decision, path);
        // An unwritten decision contributes nothing yet, so its parent's
        // cached documents are the base.
        let visible = match path.split_last() {
            Some((_, parent)) if !self.is_committed(decision) => parent,
            _ => path.as_slice(),
        };
        let mut documents = DocumentSet::clone(&*self.documents(visible)?);
        for mutation in mutations {
            documents.apply(mutation);
        }
        validate::check_causality(&documents)
    }

    /// Fold every mutation of `decision` into the ledger, atomically.
    ///
    /// Already-folded decisions are left alone, so re-applying an orphaned
    /// decision to a new timeline never duplicates its entries.
    pub fn commit(&mut self, decision: DecisionId, path: &[DecisionId], mutations: &[Mutation]) -> Result<Vec<u64>> {
        if self.is_committed(decision) {
            debug!(decision = %decision, "Decision already folded into ledger");
            return Ok(self.entries_for(decision).map(|e| e.seq).collect());
        }
        self.validate(decision, path, mutations)?;
        self.write(decision, mutations.iter().cloned())
    }

    /// Append one event (with its world-state deltas) to `decision`.
    pub fn append(
        &mut self,
        decision: DecisionId,
        path: &[DecisionId],
        event: Event,
        changes: Vec<WorldStateChange>,
    ) -> Result<EventId> {
        let id = event.id.clone();
        let mutation = Mutation::event(event, changes);
        self.validate(decision, path, std::slice::from_ref(&mutation))?;
        self.write(decision, std::iter::once(mutation))?;
        Ok(id)
    }

    fn write(&mut self, decision: DecisionId, mutations: impl Iterator<Item = Mutation>) -> Result<Vec<u64>> {
        let start = self.entries.len();
        let mut sealed = Vec::new();
        for (offset, mutation) in mutations.enumerate() {
            sealed.push(LedgerEntry::seal((start + offset) as u64, decision, mutation)?);
        }

        let seqs: Vec<u64> = sealed.iter().map(|e| e.seq).collect();
        let positions = self.by_decision.entry(decision).or_default();
        positions.extend(start..start + sealed.len());
        self.entries.extend(sealed);

        self.views.lock().retain(|path, _| !path.contains(&decision));
        info!(decision = %decision, entries = seqs.len(), total = self.entries.len(), "Ledger commit");
        Ok(seqs)
    }

    /// The resolved world for `path`, cached until a decision on it changes.
    pub fn view(&self, path: &[DecisionId]) -> Result<Arc<WorldState>> {
        self.resolved(path).map(|resolved| resolved.world)
    }

    fn resolved(&self, path: &[DecisionId]) -> Result<Resolved> {
        if let Some(resolved) = self.views.lock().get(path) {
            return Ok(resolved.clone());
        }
        let (documents, hash) = self.resolve(path)?;
        let world = Arc::new(WorldState::from_documents(path.to_vec(), &documents, hash));
        let resolved = Resolved {
            documents: Arc::new(documents),
            world,
        };
        self.views.lock().insert(path.to_vec(), resolved.clone());
        debug!(path_len = path.len(), events = resolved.world.len(), "Built world view");
        Ok(resolved)
    }

    /// Drop cached views whose path fails `live`. Callers pass the paths
    /// still bound to a timeline; every other path is rebuilt on demand.
    pub fn retain_views(&self, mut live: impl FnMut(&[DecisionId]) -> bool) {
        let mut views = self.views.lock();
        let before = views.len();
        views.retain(|path, _| live(path.as_slice()));
        if views.len() < before {
            debug!(evicted = before - views.len(), cached = views.len(), "Evicted world views");
        }
    }

    /// Number of resolved paths held in memory.
    pub fn cached_views(&self) -> usize {
        self.views.lock().len()
    }

    /// Events visible along `path` with `from <= story_order <= to`, lazily.
    pub fn read_range(&self, path: &[DecisionId], from: StoryOrder, to: StoryOrder) -> Result<ReadRange> {
        Ok(ReadRange::new(self.view(path)?, from, to))
    }

    /// Most recent value of `key` at or before `at_order` along `path`.
    pub fn current_value(&self, path: &[DecisionId], key: &str, at_order: StoryOrder) -> Result<Option<String>> {
        Ok(self.view(path)?.current_value(key, at_order).map(str::to_string))
    }

    fn path_through(decision: DecisionId, path: &[DecisionId]) -> Vec<DecisionId> {
        let mut full = path.to_vec();
        if full.last() != Some(&decision) {
            full.push(decision);
        }
        full
    }
}
