//! Common error types for aula services
//!
//! Only conditions that make a component's contract impossible to uphold are
//! surfaced through this type. Locally recoverable conditions (a stale phase
//! transition, a duplicate attendance insert, one dead subscriber, a single
//! failed frame read) are absorbed at the component boundary and reported as
//! outcomes, not errors.

use thiserror::Error;

/// Common result type for aula operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across aula services
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested session or identity not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter (e.g. embedding length mismatch)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Capture source permanently unavailable (retry budget exhausted)
    #[error("Capture error: {0}")]
    Capture(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
