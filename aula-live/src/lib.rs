//! Live session coordinator
//!
//! Runs scheduled classroom sessions through their lifecycle: a
//! scheduler promotes sessions at their start time, a monitoring
//! worker recognizes enrolled people during attendance, and per-session
//! rooms stream events to connected viewers over SSE.

pub mod api;
pub mod db;
pub mod identify;
pub mod monitor;
pub mod rooms;
pub mod scheduler;
pub mod session;
pub mod state;

pub use api::build_router;
pub use state::AppState;
