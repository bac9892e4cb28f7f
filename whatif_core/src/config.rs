//! Studio configuration and on-disk project layout.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use whatif_ledger::TimelineId;

use crate::error::{CoreError, Result};

/// File name looked up in the project root.
pub const CONFIG_FILE: &str = "studio.toml";

pub const ENV_PROJECT_ROOT: &str = "WHATIF_PROJECT_ROOT";
pub const ENV_PROJECT: &str = "WHATIF_PROJECT";

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudioConfig {
    /// Workspace root; project data lives under `.studio/` inside it.
    #[serde(default = "default_root")]
    pub project_root: PathBuf,

    #[serde(default = "default_project_name")]
    pub project_name: String,

    #[serde(default)]
    pub index: IndexConfig,

    #[serde(default)]
    pub knowledge: KnowledgeConfig,
}

/// Derived index behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Keep one cached index file per timeline
    #[serde(default = "enabled")]
    pub cache_per_timeline: bool,

    /// Queries against a stale index trigger a reindex
    #[serde(default = "enabled")]
    pub self_heal: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            cache_per_timeline: true,
            self_heal: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct KnowledgeConfig {
    /// Default knowledge queries include unapproved inferences
    #[serde(default)]
    pub include_pending: bool,
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_project_name() -> String {
    "default".to_string()
}

fn enabled() -> bool {
    true
}

impl Default for StudioConfig {
    fn default() -> Self {
        Self {
            project_root: default_root(),
            project_name: default_project_name(),
            index: IndexConfig::default(),
            knowledge: KnowledgeConfig::default(),
        }
    }
}

impl StudioConfig {
    /// Defaults rooted at `root`.
    pub fn for_root(root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: root.into(),
            ..Self::default()
        }
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| CoreError::config(format!("failed to read {}: {}", path.display(), e)))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Resolve configuration for a workspace: `studio.toml` if present,
    /// defaults otherwise, then environment overrides.
    pub fn load(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let file = root.join(CONFIG_FILE);
        let mut config = if file.exists() {
            let mut config = Self::from_file(&file)?;
            if config.project_root.is_relative() {
                config.project_root = root.join(&config.project_root);
            }
            config
        } else {
            Self::for_root(root)
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply `WHATIF_PROJECT_ROOT` / `WHATIF_PROJECT` overrides.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(root) = lookup(ENV_PROJECT_ROOT).filter(|v| !v.is_empty()) {
            self.project_root = PathBuf::from(root);
        }
        if let Some(name) = lookup(ENV_PROJECT).filter(|v| !v.is_empty()) {
            self.project_name = name;
        }
    }

    /// `<root>/.studio/projects/<name>/`
    pub fn project_dir(&self) -> PathBuf {
        self.project_root.join(".studio").join("projects").join(&self.project_name)
    }

    pub fn decisions_dir(&self) -> PathBuf {
        self.project_dir().join("decisions")
    }

    pub fn timelines_dir(&self) -> PathBuf {
        self.project_dir().join("timelines")
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.project_dir().join("ledger.jsonl")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.project_dir().join("cache")
    }

    pub fn index_cache_path(&self, timeline: &TimelineId) -> PathBuf {
        self.cache_dir().join(format!("{}.index.json", timeline))
    }

    pub fn index_version_path(&self, timeline: &TimelineId) -> PathBuf {
        self.cache_dir().join(format!("{}.version", timeline))
    }
}
