//! # WhatIf Ledger
//!
//! The source-of-truth crate: a causally ordered, append-only ledger of story
//! events and director-authored documents. It holds no branching or
//! projection logic; it only stores, validates and resolves.
//!
//! ## Core Components
//!
//! - **entities**: identifiers, fact keys and prop lifecycle entries
//! - **events**: events, world-state deltas and revelations
//! - **documents**: beliefs, approvals, invalidations and the mutation patch language
//! - **ledger**: the append-only store with causal validation and content hashing
//! - **world_state**: the resolved, order-parameterized view of one decision path

pub mod documents;
pub mod entities;
pub mod error;
pub mod events;
pub mod ledger;
pub mod world_state;

pub use documents::*;
pub use entities::*;
pub use error::LedgerError;
pub use events::*;
pub use ledger::*;
pub use world_state::*;
