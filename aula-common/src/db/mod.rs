//! Database pool creation and schema bootstrap

pub mod init;

pub use init::{init_database_pool, init_schema, init_settings_defaults};
