//! Branch Orchestrator - the transactional state machine.
//!
//! One transaction per timeline at a time:
//!
//! 1. **Decide**: build and validate a decision under the timeline tip
//! 2. **Branch**: stage the extended (or forked) path without installing it
//! 3. **Propagate**: fold the decision into the ledger and reproject the
//!    characters it touches
//! 4. **Reindex**: rebuild the derived index and swap it in
//! 5. **Generate**: emit a one-way notice to downstream collaborators
//!
//! A failure before the staged path is installed leaves the ledger and the
//! timelines as they were; the decision stays in the graph as an orphan
//! that can be applied again later.

mod phase;
mod summary;

pub use phase::*;
pub use summary::*;

use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::{error, info, warn};
use whatif_ledger::{
    check_causality, CharacterId, DecisionId, Document, DocumentSet, Event, FactInvalidation, FactKey, Ledger,
    LedgerEntry, Mutation, ReadRange, StoryOrder, TimelineId, WorldState, WorldStateChange,
};

use crate::config::StudioConfig;
use crate::decisions::{Decision, DecisionGraph, DecisionType, Timeline, Timelines, CANONICAL_TIMELINE};
use crate::error::{CoreError, Result};
use crate::events::{GenerationNotifier, NullNotifier, ReindexNotice};
use crate::index::{CancelToken, DerivedIndex, IndexInputs, IndexSynchronizer, IndexVersion, ReindexOutcome};
use crate::knowledge_base::{KnowledgeFact, KnowledgeProjector, KnowledgeSet};
use crate::vcs::VersionStore;

/// Where a new decision lands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BranchTarget {
    /// Extend an existing timeline.
    Append(TimelineId),
    /// Fork `source` into a new timeline named `name`, then extend the fork.
    Fork { source: TimelineId, name: String },
}

impl BranchTarget {
    /// The timeline the transaction writes to.
    pub fn timeline_id(&self) -> TimelineId {
        match self {
            BranchTarget::Append(id) => id.clone(),
            BranchTarget::Fork { name, .. } => TimelineId::from(name.as_str()),
        }
    }
}

/// Director intent: a batch of mutations and where to apply it.
#[derive(Debug, Clone)]
pub struct DecisionRequest {
    pub label: String,
    pub decision_type: DecisionType,
    pub notes: String,
    pub mutations: Vec<Mutation>,
    pub target: BranchTarget,
}

impl DecisionRequest {
    /// A request against the canonical timeline.
    pub fn new(decision_type: DecisionType, label: impl Into<String>, mutations: Vec<Mutation>) -> Self {
        Self {
            label: label.into(),
            decision_type,
            notes: String::new(),
            mutations,
            target: BranchTarget::Append(TimelineId::from(CANONICAL_TIMELINE)),
        }
    }

    pub fn on(mut self, timeline: impl Into<TimelineId>) -> Self {
        self.target = BranchTarget::Append(timeline.into());
        self
    }

    pub fn forking(mut self, source: impl Into<TimelineId>, name: impl Into<String>) -> Self {
        self.target = BranchTarget::Fork {
            source: source.into(),
            name: name.into(),
        };
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }
}

/// Outcome of a completed transaction.
#[derive(Debug, Clone)]
pub struct TransactionReport {
    pub decision_id: DecisionId,
    pub timeline_id: TimelineId,
    pub index_version: IndexVersion,
    /// False when the index already matched (e.g. an empty decision).
    pub reindexed: bool,
    pub affected_characters: BTreeSet<CharacterId>,
    /// Projections of the affected characters at the timeline's last order.
    pub projections: BTreeMap<CharacterId, KnowledgeSet>,
}

/// Sequences decisions through the branch state machine.
pub struct BranchOrchestrator {
    config: StudioConfig,
    ledger: RwLock<Ledger>,
    graph: RwLock<DecisionGraph>,
    timelines: RwLock<Timelines>,
    index: IndexSynchronizer,
    projector: KnowledgeProjector,

    /// Single writer per timeline.
    writers: Mutex<HashMap<TimelineId, Arc<Mutex<()>>>>,

    /// Timelines stopped by ledger corruption, with the reason.
    halted: RwLock<HashMap<TimelineId, String>>,

    phases: PhaseTracker,
    notifier: Arc<dyn GenerationNotifier>,
    substrate: Arc<dyn VersionStore>,
}

impl BranchOrchestrator {
    /// Start a project: the root decision holds `mutations`, and the
    /// canonical timeline is `[root]`.
    pub fn bootstrap(
        config: StudioConfig,
        substrate: Arc<dyn VersionStore>,
        notes: impl Into<String>,
        mutations: Vec<Mutation>,
    ) -> Result<Self> {
        let root = Decision::root(notes, mutations);
        let mut ledger = Ledger::new();
        ledger.commit(root.id, &[root.id], &root.mutations)?;
        substrate.commit_decision(&root)?;

        let mut timelines = Timelines::new();
        let main = timelines.create_canonical(root.id)?;
        substrate.create_branch(timelines.get(&main)?)?;

        info!(root = %root.id, entries = ledger.len(), "Project bootstrapped");
        let graph = DecisionGraph::with_root(root);
        Ok(Self::from_parts(config, substrate, ledger, graph, timelines))
    }

    /// Assemble an orchestrator from restored state.
    pub fn from_parts(
        config: StudioConfig,
        substrate: Arc<dyn VersionStore>,
        ledger: Ledger,
        graph: DecisionGraph,
        timelines: Timelines,
    ) -> Self {
        Self {
            config,
            ledger: RwLock::new(ledger),
            graph: RwLock::new(graph),
            timelines: RwLock::new(timelines),
            index: IndexSynchronizer::new(KnowledgeProjector::new()),
            projector: KnowledgeProjector::new(),
            writers: Mutex::new(HashMap::new()),
            halted: RwLock::new(HashMap::new()),
            phases: PhaseTracker::default(),
            notifier: Arc::new(NullNotifier),
            substrate,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn GenerationNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn config(&self) -> &StudioConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------

    /// Run one full transaction for `request`.
    pub fn run(&self, request: DecisionRequest) -> Result<TransactionReport> {
        let timeline = request.target.timeline_id();
        let writer = self.writer(&timeline);
        let _guard = writer.lock();

        let result = self.run_locked(request);
        self.phases.finish(&timeline);
        result
    }

    fn run_locked(&self, request: DecisionRequest) -> Result<TransactionReport> {
        let DecisionRequest {
            label,
            decision_type,
            notes,
            mutations,
            target,
        } = request;

        let (base, is_fork, owner) = match &target {
            BranchTarget::Append(id) => {
                self.ensure_running(id)?;
                (self.timelines.read().get(id)?.clone(), false, id)
            }
            BranchTarget::Fork { source, name } => {
                self.ensure_running(source)?;
                (self.timelines.read().prepare_fork(source, name)?, true, source)
            }
        };
        let parent = base
            .tip()
            .ok_or_else(|| CoreError::config(format!("timeline {} has an empty path", base.id)))?;

        self.phases.enter(&base.id, Phase::Decide);
        let documents = self.documents(owner, &base.decision_path)?;
        let decision = self.decide(parent, Some(&*documents), decision_type, label, notes, mutations)?;

        self.transition(base, decision, is_fork)
    }

    /// Re-apply an existing decision (typically an orphan) to `timeline`.
    pub fn apply_decision(&self, timeline: &TimelineId, decision: DecisionId) -> Result<TransactionReport> {
        let writer = self.writer(timeline);
        let _guard = writer.lock();

        let result = self.apply_locked(timeline, decision);
        self.phases.finish(timeline);
        result
    }

    fn apply_locked(&self, timeline: &TimelineId, decision: DecisionId) -> Result<TransactionReport> {
        self.ensure_running(timeline)?;
        let base = self.timelines.read().get(timeline)?.clone();
        let decision = self
            .graph
            .read()
            .get(decision)
            .cloned()
            .ok_or(CoreError::UnknownDecision(decision))?;
        self.transition(base, decision, false)
    }

    /// Alias of [`BranchOrchestrator::apply_decision`].
    pub fn append_decision(&self, timeline: &TimelineId, decision: DecisionId) -> Result<TransactionReport> {
        self.apply_decision(timeline, decision)
    }

    /// DECIDE only: validate and attach a decision under `parent`.
    ///
    /// The decision is not placed on any timeline.
    pub fn create_decision(
        &self,
        parent: DecisionId,
        decision_type: DecisionType,
        label: impl Into<String>,
        notes: impl Into<String>,
        mutations: Vec<Mutation>,
    ) -> Result<DecisionId> {
        self.decide(parent, None, decision_type, label.into(), notes.into(), mutations)
            .map(|decision| decision.id)
    }

    /// Validate a child of `parent`. `base` is the parent's resolved
    /// documents when a timeline already holds them; otherwise they are
    /// folded from the graph.
    fn decide(
        &self,
        parent: DecisionId,
        base: Option<&DocumentSet>,
        decision_type: DecisionType,
        label: String,
        notes: String,
        mutations: Vec<Mutation>,
    ) -> Result<Decision> {
        let decision = {
            let graph = self.graph.read();
            let base = match base {
                Some(documents) => documents.clone(),
                None if graph.contains(parent) => graph.resolve_documents(parent)?,
                None => return Err(CoreError::UnknownParent(parent)),
            };
            let (decision, documents) = graph.prepare_on(parent, base, decision_type, label, notes, mutations)?;
            if let Err(err) = check_causality(&documents) {
                warn!(parent = %parent, error = %err, "Decision rejected");
                return Err(err.into());
            }
            decision
        };

        self.substrate.commit_decision(&decision)?;
        self.graph.write().insert(decision.clone())?;
        info!(
            decision = %decision.id,
            parent = %parent,
            kind = decision.decision_type.as_str(),
            mutations = decision.mutations.len(),
            "Decision created"
        );
        Ok(decision)
    }

    /// BRANCH -> PROPAGATE -> REINDEX -> GENERATE for a decision.
    fn transition(&self, base: Timeline, decision: Decision, is_fork: bool) -> Result<TransactionReport> {
        let timeline_id = base.id.clone();

        self.phases.enter(&timeline_id, Phase::Branch);
        let staged = {
            let graph = self.graph.read();
            self.timelines.read().check_append(&graph, &base, decision.id)?;
            base.extended(decision.id)
        };
        if is_fork {
            self.substrate.create_branch(&staged)?;
        }

        self.phases.enter(&timeline_id, Phase::Propagate);
        let prior = self.documents(&timeline_id, &base.decision_path)?;
        self.guard(
            &timeline_id,
            self.ledger
                .write()
                .commit(decision.id, &staged.decision_path, &decision.mutations)
                .map_err(CoreError::from),
        )?;
        let world = self.guard(&timeline_id, self.ledger.read().view(&staged.decision_path).map_err(CoreError::from))?;

        let affected = affected_characters(&decision.mutations, &prior, &world);
        let at = world.max_order().unwrap_or(0);
        let projections: BTreeMap<CharacterId, KnowledgeSet> = affected
            .iter()
            .map(|character| (character.clone(), self.projector.project(&world, character, at)))
            .collect();
        info!(timeline = %timeline_id, decision = %decision.id, characters = affected.len(), "Projections recomputed");

        {
            let mut timelines = self.timelines.write();
            if is_fork {
                timelines.insert(staged.clone())?;
            } else {
                timelines.replace(staged.clone())?;
            }
        }
        self.prune_views();

        self.phases.enter(&timeline_id, Phase::Reindex);
        let inputs = self.inputs_for(staged, world)?;
        let outcome = self.index.reindex(&inputs, &CancelToken::new())?;

        self.phases.enter(&timeline_id, Phase::Generate);
        self.notifier.notify(ReindexNotice {
            timeline_id: timeline_id.clone(),
            decision_id: decision.id,
            index_version: outcome.version().clone(),
            affected_characters: affected.clone(),
        });

        Ok(TransactionReport {
            decision_id: decision.id,
            timeline_id,
            index_version: outcome.version().clone(),
            reindexed: outcome.rebuilt(),
            affected_characters: affected,
            projections,
        })
    }

    /// Add one event (with its world-state deltas) to `timeline`.
    pub fn append_event(
        &self,
        timeline: &TimelineId,
        event: Event,
        changes: Vec<WorldStateChange>,
    ) -> Result<TransactionReport> {
        let label = format!("add event {}", event.id);
        self.run(DecisionRequest::new(DecisionType::Scene, label, vec![Mutation::event(event, changes)]).on(timeline.clone()))
    }

    /// Sign off an inferred fact so it counts as canonical knowledge.
    pub fn approve_inference(
        &self,
        timeline: &TimelineId,
        character: impl Into<CharacterId>,
        fact_key: impl Into<FactKey>,
    ) -> Result<TransactionReport> {
        let (character, fact_key) = (character.into(), fact_key.into());
        let label = format!("approve {} for {}", fact_key, character);
        self.run(
            DecisionRequest::new(DecisionType::Character, label, vec![Mutation::approve(character, fact_key)])
                .on(timeline.clone()),
        )
    }

    /// Explicitly end a character's knowledge of a fact.
    pub fn invalidate_fact(&self, timeline: &TimelineId, invalidation: FactInvalidation) -> Result<TransactionReport> {
        let label = format!("invalidate {} for {}", invalidation.fact_key, invalidation.character_id);
        self.run(
            DecisionRequest::new(DecisionType::Character, label, vec![Mutation::invalidate(invalidation)])
                .on(timeline.clone()),
        )
    }

    // ------------------------------------------------------------------
    // Timelines
    // ------------------------------------------------------------------

    /// Start a timeline sharing `source`'s path. No documents are copied.
    pub fn fork_timeline(&self, source: &TimelineId, name: &str) -> Result<TimelineId> {
        let id = TimelineId::from(name);
        let writer = self.writer(&id);
        let _guard = writer.lock();

        self.ensure_running(source)?;
        let fork = self.timelines.read().prepare_fork(source, name)?;
        self.substrate.create_branch(&fork)?;
        self.timelines.write().insert(fork)?;
        info!(source = %source, timeline = %id, "Timeline forked");
        Ok(id)
    }

    /// Drop the name binding and its cached index. Decisions remain.
    pub fn delete_timeline(&self, id: &TimelineId) -> Result<()> {
        let writer = self.writer(id);
        let _guard = writer.lock();

        self.timelines.write().delete(id)?;
        self.index.evict(id);
        self.halted.write().remove(id);
        self.prune_views();
        Ok(())
    }

    pub fn set_canonical(&self, id: &TimelineId) -> Result<()> {
        self.timelines.write().set_canonical(id)
    }

    pub fn fork_point(&self, a: &TimelineId, b: &TimelineId) -> Result<Option<DecisionId>> {
        self.timelines.read().fork_point(a, b)
    }

    pub fn timeline(&self, id: &TimelineId) -> Result<Timeline> {
        self.timelines.read().get(id).cloned()
    }

    pub fn list_timelines(&self) -> Vec<Timeline> {
        self.timelines.read().list().cloned().collect()
    }

    pub fn root(&self) -> Option<DecisionId> {
        self.graph.read().root()
    }

    pub fn decision(&self, id: DecisionId) -> Option<Decision> {
        self.graph.read().get(id).cloned()
    }

    /// Every decision, oldest first.
    pub fn decisions(&self) -> Vec<Decision> {
        let mut decisions: Vec<Decision> = self.graph.read().decisions().cloned().collect();
        decisions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        decisions
    }

    pub fn ledger_entries(&self) -> Vec<LedgerEntry> {
        self.ledger.read().entries().to_vec()
    }

    pub fn phase(&self, timeline: &TimelineId) -> Phase {
        self.phases.current(timeline)
    }

    /// Headline counts for `timeline`.
    pub fn summary(&self, timeline: &TimelineId) -> Result<StorySummary> {
        let (timeline, world) = self.view(timeline)?;
        let summary = StorySummary::of(&timeline, &world);
        info!(timeline = %timeline.id, events = summary.events, scenes = summary.scenes, "Story summary");
        Ok(summary)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// The resolved world of `timeline`.
    pub fn world(&self, timeline: &TimelineId) -> Result<Arc<WorldState>> {
        self.view(timeline).map(|(_, world)| world)
    }

    /// Fog of war for `character` at `at_order`.
    pub fn project(&self, timeline: &TimelineId, character: &CharacterId, at_order: StoryOrder) -> Result<KnowledgeSet> {
        let world = self.world(timeline)?;
        Ok(self.projector.project(&world, character, at_order))
    }

    pub fn knows(
        &self,
        timeline: &TimelineId,
        character: &CharacterId,
        fact_key: &FactKey,
        at_order: StoryOrder,
    ) -> Result<bool> {
        Ok(self.project(timeline, character, at_order)?.knows(fact_key))
    }

    /// Known facts under the configured pending-approval policy.
    pub fn knowledge(
        &self,
        timeline: &TimelineId,
        character: &CharacterId,
        at_order: StoryOrder,
    ) -> Result<Vec<KnowledgeFact>> {
        let set = self.project(timeline, character, at_order)?;
        Ok(set
            .visible_facts(self.config.knowledge.include_pending)
            .into_iter()
            .cloned()
            .collect())
    }

    /// Inferences awaiting approval, across every character.
    pub fn pending_approvals(&self, timeline: &TimelineId, at_order: StoryOrder) -> Result<Vec<KnowledgeFact>> {
        let world = self.world(timeline)?;
        Ok(self
            .projector
            .project_all(&world, at_order)
            .values()
            .flat_map(|set| set.pending_approval().cloned())
            .collect())
    }

    pub fn read_range(&self, timeline: &TimelineId, from: StoryOrder, to: StoryOrder) -> Result<ReadRange> {
        Ok(ReadRange::new(self.world(timeline)?, from, to))
    }

    pub fn current_value(&self, timeline: &TimelineId, key: &str, at_order: StoryOrder) -> Result<Option<String>> {
        Ok(self.world(timeline)?.current_value(key, at_order).map(str::to_string))
    }

    // ------------------------------------------------------------------
    // Index
    // ------------------------------------------------------------------

    pub fn index_inputs(&self, timeline: &TimelineId) -> Result<IndexInputs> {
        let (timeline, world) = self.view(timeline)?;
        self.inputs_for(timeline, world)
    }

    /// The committed index, never stale.
    ///
    /// A stale index is rebuilt first when self-healing is on, and refused
    /// otherwise.
    pub fn index(&self, timeline: &TimelineId) -> Result<Arc<DerivedIndex>> {
        let inputs = self.index_inputs(timeline)?;
        if !self.index.check_staleness(&inputs) {
            if let Some(index) = self.index.snapshot(timeline) {
                return Ok(index);
            }
        }
        if !self.config.index.self_heal {
            warn!(timeline = %timeline, "Refusing to serve stale index");
            return Err(CoreError::StaleIndex(timeline.clone()));
        }

        self.reindex_with(timeline, &CancelToken::new())?;
        self.index
            .snapshot(timeline)
            .ok_or_else(|| CoreError::StaleIndex(timeline.clone()))
    }

    /// The committed index as is, without a staleness check.
    pub fn committed_index(&self, timeline: &TimelineId) -> Option<Arc<DerivedIndex>> {
        self.index.snapshot(timeline)
    }

    pub fn check_staleness(&self, timeline: &TimelineId) -> Result<bool> {
        Ok(self.index.check_staleness(&self.index_inputs(timeline)?))
    }

    pub fn reindex(&self, timeline: &TimelineId) -> Result<IndexVersion> {
        self.reindex_with(timeline, &CancelToken::new())
            .map(|outcome| outcome.version().clone())
    }

    /// Reindex with cooperative cancellation. Waits for the timeline's writer.
    pub fn reindex_with(&self, timeline: &TimelineId, cancel: &CancelToken) -> Result<ReindexOutcome> {
        let writer = self.writer(timeline);
        let _guard = writer.lock();

        let inputs = self.index_inputs(timeline)?;
        self.index.reindex(&inputs, cancel)
    }

    /// Adopt a previously built index, e.g. from the on-disk cache.
    pub fn install_index(&self, index: DerivedIndex) {
        self.index.install(index);
    }

    // ------------------------------------------------------------------
    // Halting
    // ------------------------------------------------------------------

    pub fn is_halted(&self, timeline: &TimelineId) -> bool {
        self.halted.read().contains_key(timeline)
    }

    /// Operator acknowledgement after corruption was dealt with.
    pub fn clear_halt(&self, timeline: &TimelineId) -> bool {
        let cleared = self.halted.write().remove(timeline).is_some();
        if cleared {
            info!(timeline = %timeline, "Halt cleared");
        }
        cleared
    }

    fn ensure_running(&self, timeline: &TimelineId) -> Result<()> {
        match self.halted.read().get(timeline) {
            Some(reason) => Err(CoreError::TimelineHalted {
                timeline: timeline.clone(),
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Halt `timeline` if `result` is a corruption error.
    fn guard<T>(&self, timeline: &TimelineId, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            if err.is_fatal() {
                let reason = err.to_string();
                error!(timeline = %timeline, reason = %reason, "Ledger corruption, halting timeline");
                self.halted.write().insert(timeline.clone(), reason);
            }
        }
        result
    }

    fn view(&self, id: &TimelineId) -> Result<(Timeline, Arc<WorldState>)> {
        self.ensure_running(id)?;
        let timeline = self.timelines.read().get(id)?.clone();
        let world = self.guard(id, self.ledger.read().view(&timeline.decision_path).map_err(CoreError::from))?;
        Ok((timeline, world))
    }

    fn documents(&self, timeline: &TimelineId, path: &[DecisionId]) -> Result<Arc<DocumentSet>> {
        self.guard(timeline, self.ledger.read().documents(path).map_err(CoreError::from))
    }

    /// Drop cached ledger views that no timeline points at any more.
    fn prune_views(&self) {
        let live: HashSet<Arc<[DecisionId]>> = self
            .timelines
            .read()
            .list()
            .map(|timeline| Arc::clone(&timeline.decision_path))
            .collect();
        self.ledger.read().retain_views(|path| live.contains(path));
    }

    fn inputs_for(&self, timeline: Timeline, world: Arc<WorldState>) -> Result<IndexInputs> {
        let decisions = {
            let graph = self.graph.read();
            timeline
                .decision_path
                .iter()
                .map(|id| graph.get(*id).cloned().ok_or(CoreError::UnknownDecision(*id)))
                .collect::<Result<Vec<_>>>()?
        };
        Ok(IndexInputs {
            timeline,
            world,
            decisions,
        })
    }

    fn writer(&self, timeline: &TimelineId) -> Arc<Mutex<()>> {
        Arc::clone(self.writers.lock().entry(timeline.clone()).or_default())
    }
}

/// Characters whose projection may change when `mutations` are folded
/// on top of `prior`, giving `world`.
///
/// Besides everyone a touched document names, a teller's belief about a
/// fact reaches the listeners of every telling of that fact by the same
/// teller: whether they were lied to depends on it.
fn affected_characters(mutations: &[Mutation], prior: &DocumentSet, world: &WorldState) -> BTreeSet<CharacterId> {
    let mut affected = BTreeSet::new();
    for mutation in mutations {
        let replaced = prior.get(&mutation.key());
        let put = match mutation {
            Mutation::Put(document) => Some(document),
            Mutation::Retract(_) => None,
        };
        for document in replaced.into_iter().chain(put) {
            affected.extend(document_characters(document));
            if let Document::Belief(belief) = document {
                if let Some(fact_key) = &belief.fact_key {
                    affected.extend(told_listeners(world, &belief.character_id, fact_key));
                }
            }
        }
    }
    affected
}

/// Everyone `teller` told `fact_key` to, anywhere on the path.
fn told_listeners<'a>(
    world: &'a WorldState,
    teller: &'a CharacterId,
    fact_key: &'a FactKey,
) -> impl Iterator<Item = CharacterId> + 'a {
    world
        .events()
        .iter()
        .flat_map(|record| &record.event.revelations)
        .filter(move |revelation| &revelation.fact_key == fact_key)
        .flat_map(|revelation| &revelation.told)
        .filter(move |telling| &telling.teller == teller)
        .flat_map(|telling| telling.listeners.iter().cloned())
}

fn document_characters(document: &Document) -> BTreeSet<CharacterId> {
    match document {
        Document::Event(record) => record.event.mentioned_characters(),
        Document::Belief(belief) => BTreeSet::from([belief.character_id.clone()]),
        Document::Approval(approval) => BTreeSet::from([approval.character_id.clone()]),
        Document::Invalidation(inv) => BTreeSet::from([inv.character_id.clone()]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::BroadcastNotifier;
    use crate::knowledge_base::Confidence;
    use crate::vcs::InMemoryVersionStore;
    use whatif_ledger::{Belief, EventId, LedgerError, Revelation};

    fn main_id() -> TimelineId {
        TimelineId::from(CANONICAL_TIMELINE)
    }

    fn marcus() -> CharacterId {
        CharacterId::from("marcus")
    }

    fn studio() -> BranchOrchestrator {
        let opening = vec![Mutation::event(
            Event::new("e1", "s1", 1)
                .with_present(["marcus", "jane"])
                .revealing(Revelation::new("jane.wears_ring")),
            vec![WorldStateChange::new("marcus.trust_in_jane", "high")],
        )];
        BranchOrchestrator::bootstrap(
            StudioConfig::default(),
            Arc::new(InMemoryVersionStore::new()),
            "Initial ingestion from screenplay",
            opening,
        )
        .unwrap()
    }

    #[test]
    fn test_bootstrap_creates_root_and_main() {
        let studio = studio();
        let main = studio.timeline(&main_id()).unwrap();
        assert!(main.is_canonical);
        assert_eq!(&*main.decision_path, &[studio.root().unwrap()]);
        assert_eq!(studio.list_timelines().len(), 1);
        assert_eq!(
            studio.current_value(&main_id(), "marcus.trust_in_jane", 1).unwrap().as_deref(),
            Some("high")
        );
    }

    #[test]
    fn test_run_appends_and_reindexes() {
        let studio = studio();
        let report = studio
            .append_event(
                &main_id(),
                Event::new("e2", "s2", 2).with_present(["marcus"]).triggered_by("e1"),
                vec![WorldStateChange::new("marcus.trust_in_jane", "shaken")],
            )
            .unwrap();

        assert!(report.reindexed);
        assert!(report.affected_characters.contains(&marcus()));
        assert_eq!(studio.timeline(&main_id()).unwrap().decision_path.len(), 2);
        assert_eq!(studio.phase(&main_id()), Phase::Idle);
        assert!(!studio.check_staleness(&main_id()).unwrap());
        assert_eq!(
            studio.committed_index(&main_id()).map(|index| index.version.clone()),
            Some(report.index_version)
        );
    }

    #[test]
    fn test_rejected_decision_leaves_state_unchanged() {
        let studio = studio();
        let entries = studio.ledger_entries().len();

        let result = studio.append_event(&main_id(), Event::new("e2", "s2", 2).triggered_by("e9"), vec![]);
        assert!(matches!(result, Err(CoreError::Ledger(LedgerError::OrderingViolation { .. }))));
        assert_eq!(studio.ledger_entries().len(), entries);
        assert_eq!(studio.decisions().len(), 1);
        assert_eq!(studio.timeline(&main_id()).unwrap().decision_path.len(), 1);
    }

    #[test]
    fn test_failed_branch_keeps_orphan_decision() {
        let studio = studio();
        let root = studio.root().unwrap();
        let first = studio
            .create_decision(root, DecisionType::World, "storm", "", vec![Mutation::event(Event::new("e2", "s2", 2), vec![])])
            .unwrap();
        let grandchild = studio
            .create_decision(first, DecisionType::World, "flood", "", vec![Mutation::event(Event::new("e3", "s2", 3), vec![])])
            .unwrap();

        let splice = studio.apply_decision(&main_id(), grandchild);
        assert!(matches!(splice, Err(CoreError::NotAChild { .. })));
        assert_eq!(studio.ledger_entries().len(), 1);
        assert!(studio.decision(grandchild).is_some());

        studio.apply_decision(&main_id(), first).unwrap();
        studio.apply_decision(&main_id(), grandchild).unwrap();
        assert_eq!(studio.world(&main_id()).unwrap().len(), 3);
    }

    #[test]
    fn test_fork_target_creates_timeline() {
        let studio = studio();
        let report = studio
            .run(
                DecisionRequest::new(DecisionType::World, "rain all night", vec![Mutation::event(
                    Event::new("e2", "s2", 2).with_present(["jane"]),
                    vec![],
                )])
                .forking(main_id(), "noir"),
            )
            .unwrap();

        let noir = TimelineId::from("noir");
        assert_eq!(report.timeline_id, noir);
        assert_eq!(studio.world(&noir).unwrap().len(), 2);
        assert_eq!(studio.world(&main_id()).unwrap().len(), 1);
        assert_eq!(studio.fork_point(&main_id(), &noir).unwrap(), studio.root());
    }

    #[test]
    fn test_notice_emitted_after_reindex() {
        let notifier = Arc::new(BroadcastNotifier::new(8));
        let mut rx = notifier.subscribe();
        let studio = studio().with_notifier(notifier);

        let report = studio.approve_inference(&main_id(), "marcus", "jane.has_secret").unwrap();
        let notice = rx.try_recv().unwrap();
        assert_eq!(notice.timeline_id, main_id());
        assert_eq!(notice.decision_id, report.decision_id);
        assert_eq!(notice.index_version, report.index_version);
        assert!(notice.affected_characters.contains(&marcus()));
    }

    #[test]
    fn test_knowledge_policy_follows_config() {
        let mut config = StudioConfig::default();
        config.knowledge.include_pending = true;
        let studio = BranchOrchestrator::bootstrap(
            config,
            Arc::new(InMemoryVersionStore::new()),
            "",
            vec![Mutation::event(
                Event::new("e1", "s1", 1)
                    .with_present(["marcus"])
                    .revealing(Revelation::hidden("jane.has_secret").inferred_by(["marcus"])),
                vec![],
            )],
        )
        .unwrap();

        let facts = studio.knowledge(&main_id(), &marcus(), 1).unwrap();
        assert_eq!(facts.len(), 1);
        assert!(facts[0].is_pending());
        assert_eq!(facts[0].confidence, Confidence::Suspicion);
        assert_eq!(studio.pending_approvals(&main_id(), 1).unwrap().len(), 1);
    }

    #[test]
    fn test_stale_index_refused_without_self_heal() {
        let mut config = StudioConfig::default();
        config.index.self_heal = false;
        let studio = BranchOrchestrator::bootstrap(config, Arc::new(InMemoryVersionStore::new()), "", vec![]).unwrap();
        assert!(matches!(studio.index(&main_id()), Err(CoreError::StaleIndex(_))));

        studio.reindex(&main_id()).unwrap();
        assert!(studio.index(&main_id()).is_ok());
    }

    #[test]
    fn test_corruption_halts_timeline() {
        let studio = studio();
        let mut entries = studio.ledger_entries();
        entries[0].mutation = Mutation::event(Event::new("e1", "s1", 7), vec![]);

        let graph = DecisionGraph::restore(studio.decisions()).unwrap();
        let timelines = Timelines::restore(studio.list_timelines());
        let tampered = BranchOrchestrator::from_parts(
            StudioConfig::default(),
            Arc::new(InMemoryVersionStore::new()),
            Ledger::restore(entries),
            graph,
            timelines,
        );

        let first = tampered.project(&main_id(), &marcus(), 1);
        assert!(matches!(first, Err(ref err) if err.is_fatal()));
        assert!(tampered.is_halted(&main_id()));

        let next = tampered.append_event(&main_id(), Event::new("e2", "s1", 2), vec![]);
        assert!(matches!(next, Err(CoreError::TimelineHalted { .. })));

        assert!(tampered.clear_halt(&main_id()));
        assert!(tampered.project(&main_id(), &marcus(), 1).is_err());
    }

    #[test]
    fn test_delete_timeline_keeps_decisions() {
        let studio = studio();
        let report = studio
            .run(DecisionRequest::new(DecisionType::Production, "alt take", vec![]).forking(main_id(), "alt"))
            .unwrap();
        assert!(report.affected_characters.is_empty());

        studio.delete_timeline(&TimelineId::from("alt")).unwrap();
        assert!(studio.decision(report.decision_id).is_some());
        assert!(matches!(studio.delete_timeline(&main_id()), Err(CoreError::CanonicalTimeline(_))));
    }

    #[test]
    fn test_teller_belief_reprojects_listeners() {
        let studio = BranchOrchestrator::bootstrap(
            StudioConfig::default(),
            Arc::new(InMemoryVersionStore::new()),
            "",
            vec![Mutation::event(
                Event::new("e1", "s1", 1)
                    .with_present(["cole", "marcus"])
                    .revealing(Revelation::hidden("butler.is_guilty").told_by("cole", ["marcus"])),
                vec![],
            )],
        )
        .unwrap();
        let guilt = FactKey::from("butler.is_guilty");
        let before = studio.project(&main_id(), &marcus(), 1).unwrap();
        assert!(!before.fact(&guilt).unwrap().possibly_false);

        let report = studio
            .run(DecisionRequest::new(
                DecisionType::Character,
                "cole is covering for someone",
                vec![Mutation::belief(
                    Belief::new("b1", "cole", "the butler did it", "e1")
                        .about("butler.is_guilty")
                        .false_because("the gardener did it"),
                )],
            ))
            .unwrap();

        assert!(report.affected_characters.contains(&CharacterId::from("cole")));
        assert!(report.affected_characters.contains(&marcus()));
        assert!(report.projections[&marcus()].fact(&guilt).unwrap().possibly_false);
    }

    #[test]
    fn test_view_cache_follows_live_timelines() {
        let studio = studio();
        for order in 2..=51 {
            studio
                .append_event(&main_id(), Event::new(format!("e{order}"), "s2", order).with_present(["marcus"]), vec![])
                .unwrap();
        }
        assert_eq!(studio.world(&main_id()).unwrap().len(), 51);
        assert_eq!(studio.ledger.read().cached_views(), 1);

        studio.fork_timeline(&main_id(), "noir").unwrap();
        studio
            .append_event(&TimelineId::from("noir"), Event::new("e52", "s3", 52), vec![])
            .unwrap();
        assert_eq!(studio.ledger.read().cached_views(), 2);

        studio.delete_timeline(&TimelineId::from("noir")).unwrap();
        assert_eq!(studio.ledger.read().cached_views(), 1);
    }

    #[test]
    fn test_create_decision_under_unknown_parent() {
        let studio = studio();
        let result = studio.create_decision(DecisionId::new(), DecisionType::Scene, "stray", "", vec![]);
        assert!(matches!(result, Err(CoreError::UnknownParent(_))));
        assert_eq!(studio.decisions().len(), 1);
    }

    #[test]
    fn test_superseding_event_changes_visible_version_only_on_branch() {
        let studio = studio();
        studio.fork_timeline(&main_id(), "revision").unwrap();
        let revision = TimelineId::from("revision");

        studio
            .run(
                DecisionRequest::new(DecisionType::Scene, "jane leaves early", vec![Mutation::event(
                    Event::new("e1", "s1", 1).with_present(["marcus"]),
                    vec![],
                )])
                .on(revision.clone()),
            )
            .unwrap();

        let event = EventId::from("e1");
        let on_main = studio.world(&main_id()).unwrap().event(&event).unwrap().event.characters_present.len();
        let on_revision = studio.world(&revision).unwrap().event(&event).unwrap().event.characters_present.len();
        assert_eq!((on_main, on_revision), (2, 1));
    }
}
