//! Identity enrollment and identification
//!
//! The embedding store persists enrolled identities; the engine holds the
//! rebuildable in-memory index and answers probe queries.

pub mod engine;
pub mod store;

pub use engine::{IdentificationEngine, IdentityMatch, MatchCooldown};
pub use store::{EmbeddingStore, IdentityRecord};
