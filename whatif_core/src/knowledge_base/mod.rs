//! Knowledge Base module - per-character fog of war.
//!
//! - **Facts**: what a character knows, through which channel, how surely
//! - **Sets**: one character's knowledge and beliefs at one story order
//! - **Projector**: derives sets from the resolved world by replaying events

mod fact;
mod projector;
mod set;

pub use fact::*;
pub use projector::*;
pub use set::*;
