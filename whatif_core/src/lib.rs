//! # WhatIf Core
//!
//! Everything derived from the ledger: what each character knows, how the
//! story branches, and the queryable index downstream generators read from.
//!
//! ## Core Components
//!
//! - **knowledge_base**: per-character knowledge projection ("fog of war")
//! - **decisions**: the decision tree and the timelines walking it
//! - **index**: versioned, rebuildable derived index per timeline
//! - **orchestrator**: the decide / branch / propagate / reindex state machine
//! - **events**: notices emitted to generation collaborators
//! - **vcs**: the version-control substrate boundary
//! - **persist**: the on-disk project layout
//!
//! ## Design Philosophy
//!
//! - **Ledger First**: every other structure can be rebuilt from the ledger
//! - **Isolated Branches**: a decision on one timeline never changes another
//! - **Deterministic**: identical inputs give byte-identical indexes

pub mod config;
pub mod decisions;
pub mod error;
pub mod events;
pub mod index;
pub mod knowledge_base;
pub mod orchestrator;
pub mod persist;
pub mod vcs;

pub use config::*;
pub use decisions::*;
pub use error::{CoreError, Result};
pub use events::*;
pub use index::*;
pub use knowledge_base::*;
pub use orchestrator::*;
pub use persist::*;
pub use vcs::*;
