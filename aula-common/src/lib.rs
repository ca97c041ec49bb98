//! # Aula Common Library
//!
//! Shared code for the aula live-classroom services including:
//! - Error types
//! - Event types (LiveEvent enum) and the EventBus
//! - Configuration loading and root folder resolution
//! - Database pool initialization and schema bootstrap

pub mod config;
pub mod db;
pub mod error;
pub mod events;

pub use error::{Error, Result};
