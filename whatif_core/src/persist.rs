//! On-disk project layout.
//!
//! ```text
//! .studio/projects/<name>/
//!   ledger.jsonl            one ledger entry per line
//!   decisions/<id>.json     one file per decision
//!   timelines/<id>.json     one file per timeline
//!   cache/<t>.index.json    derived index (rebuildable)
//!   cache/<t>.version       its IndexVersion
//! ```
//!
//! The ledger is the only authoritative file; the cache may be deleted at
//! any time.

use std::collections::HashSet;
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use whatif_ledger::{Ledger, LedgerEntry};

use crate::config::StudioConfig;
use crate::decisions::{Decision, DecisionGraph, Timeline, Timelines};
use crate::error::{CoreError, Result};
use crate::index::{DerivedIndex, IndexInputs};
use crate::orchestrator::BranchOrchestrator;
use crate::vcs::VersionStore;

/// Reads and writes one project directory.
#[derive(Debug, Clone)]
pub struct ProjectStore {
    config: StudioConfig,
}

impl ProjectStore {
    pub fn new(config: StudioConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StudioConfig {
        &self.config
    }

    /// Whether a project has been saved here.
    pub fn exists(&self) -> bool {
        self.config.ledger_path().exists()
    }

    /// Write the ledger, the decision graph, every timeline and, when
    /// enabled, the committed indexes.
    pub fn save(&self, studio: &BranchOrchestrator) -> Result<()> {
        fs::create_dir_all(self.config.decisions_dir())?;
        fs::create_dir_all(self.config.timelines_dir())?;

        let entries = studio.ledger_entries();
        self.write_ledger(&entries)?;

        let decisions = studio.decisions();
        for decision in &decisions {
            let path = self.config.decisions_dir().join(format!("{}.json", decision.id));
            write_atomic(&path, &serde_json::to_vec_pretty(decision)?)?;
        }

        let timelines = studio.list_timelines();
        let mut bound = HashSet::new();
        for timeline in &timelines {
            let path = self.config.timelines_dir().join(format!("{}.json", timeline.id));
            write_atomic(&path, &serde_json::to_vec_pretty(timeline)?)?;
            bound.insert(path);
        }
        remove_stale_json(&self.config.timelines_dir(), &bound)?;

        if self.config.index.cache_per_timeline {
            for timeline in &timelines {
                if let Some(index) = studio.committed_index(&timeline.id) {
                    self.save_index(&index)?;
                }
            }
        }

        info!(
            project = %self.config.project_name,
            entries = entries.len(),
            decisions = decisions.len(),
            timelines = timelines.len(),
            "Project saved"
        );
        Ok(())
    }

    /// Restore a saved project. Every ledger entry is re-verified first.
    pub fn load(&self, substrate: Arc<dyn VersionStore>) -> Result<BranchOrchestrator> {
        let ledger = Ledger::restore(self.read_ledger()?);
        ledger.verify()?;

        let decisions: Vec<Decision> = read_json_dir(&self.config.decisions_dir())?;
        let graph = DecisionGraph::restore(decisions)?;
        let timelines: Vec<Timeline> = read_json_dir(&self.config.timelines_dir())?;
        let timelines = Timelines::restore(timelines);

        let studio = BranchOrchestrator::from_parts(self.config.clone(), substrate, ledger, graph, timelines);

        if self.config.index.cache_per_timeline {
            for timeline in studio.list_timelines() {
                let inputs = studio.index_inputs(&timeline.id)?;
                if let Some(index) = self.load_index(&inputs)? {
                    studio.install_index(index);
                }
            }
        }

        info!(project = %self.config.project_name, "Project loaded");
        Ok(studio)
    }

    fn write_ledger(&self, entries: &[LedgerEntry]) -> Result<()> {
        let mut body = Vec::new();
        for entry in entries {
            serde_json::to_writer(&mut body, entry)?;
            body.push(b'\n');
        }
        write_atomic(&self.config.ledger_path(), &body)
    }

    fn read_ledger(&self) -> Result<Vec<LedgerEntry>> {
        let path = self.config.ledger_path();
        if !path.exists() {
            return Err(CoreError::config(format!("no ledger at {}", path.display())));
        }

        let reader = BufReader::new(fs::File::open(&path)?);
        let mut entries = Vec::new();
        for line in reader.lines() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            entries.push(serde_json::from_str(trimmed)?);
        }
        Ok(entries)
    }

    /// Cache an index next to its version stamp.
    pub fn save_index(&self, index: &DerivedIndex) -> Result<()> {
        fs::create_dir_all(self.config.cache_dir())?;
        write_atomic(&self.config.index_cache_path(&index.timeline_id), &index.to_bytes()?)?;
        write_atomic(
            &self.config.index_version_path(&index.timeline_id),
            index.version.as_str().as_bytes(),
        )?;
        debug!(timeline = %index.timeline_id, version = %index.version, "Index cached");
        Ok(())
    }

    /// The cached index for `inputs`, if it matches their current version.
    pub fn load_index(&self, inputs: &IndexInputs) -> Result<Option<DerivedIndex>> {
        let timeline = &inputs.timeline.id;
        let version_path = self.config.index_version_path(timeline);
        let index_path = self.config.index_cache_path(timeline);
        if !version_path.exists() || !index_path.exists() {
            return Ok(None);
        }

        let expected = inputs.version();
        let stamped = fs::read_to_string(&version_path)?;
        if stamped.trim() != expected.as_str() {
            debug!(timeline = %timeline, "Cached index is stale");
            return Ok(None);
        }

        let index = DerivedIndex::from_bytes(&fs::read(&index_path)?)?;
        if index.version != expected {
            debug!(timeline = %timeline, "Cached index does not match its stamp");
            return Ok(None);
        }
        Ok(Some(index))
    }
}

fn write_atomic(path: &Path, body: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    let mut file = fs::File::create(&tmp)?;
    file.write_all(body)?;
    file.sync_all()?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn read_json_dir<T: serde::de::DeserializeOwned>(dir: &Path) -> Result<Vec<T>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut paths: Vec<_> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
        .collect();
    paths.sort();

    paths
        .iter()
        .map(|path| Ok(serde_json::from_slice(&fs::read(path)?)?))
        .collect()
}

/// Remove the `*.json` files in `dir` not in `keep`, so deleted timelines
/// stay deleted. Runs after every live file is written.
fn remove_stale_json(dir: &Path, keep: &HashSet<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "json") && !keep.contains(&path) {
            debug!(path = %path.display(), "Removing stale timeline file");
            fs::remove_file(path)?;
        }
    }
    Ok(())
}
