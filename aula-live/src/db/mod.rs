//! Database operations for the live-session service
//!
//! Table bootstrap lives in aula-common; per-table queries live here.

pub mod attendance;
pub mod sessions;
