//! Database initialization functions
//!
//! Opens the sqlite pool, creates missing tables, and initializes default
//! settings so a fresh root folder boots without manual setup.

use crate::error::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use tracing::info;

/// Open (or create) the sqlite database and return a connection pool
pub async fn init_database_pool(db_path: &Path) -> Result<Pool<Sqlite>> {
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    info!("Database pool opened at {}", db_path.display());
    Ok(pool)
}

/// Create missing tables
///
/// Idempotent; safe to run at every startup.
pub async fn init_schema(pool: &Pool<Sqlite>) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS identities (
            identity_key TEXT PRIMARY KEY,
            display_name TEXT NOT NULL,
            embedding BLOB NOT NULL,
            enrolled_at TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sessions (
            session_id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            scheduled_at TEXT NOT NULL,
            duration_minutes INTEGER,
            phase TEXT NOT NULL DEFAULT 'scheduled',
            subphase TEXT,
            started_at TEXT,
            ended_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Append-only; the composite primary key enforces at most one record
    // per (identity, session) pair
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS attendance_records (
            identity_key TEXT NOT NULL,
            session_id TEXT NOT NULL,
            recorded_at TEXT NOT NULL,
            confidence REAL NOT NULL,
            method TEXT NOT NULL,
            PRIMARY KEY (identity_key, session_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    info!("Database schema verified");
    Ok(())
}

/// Initialize settings table with default values
///
/// Existing values are left untouched so operator overrides survive restarts.
pub async fn init_settings_defaults(pool: &Pool<Sqlite>) -> Result<()> {
    let defaults = vec![
        ("scheduler_interval_secs", "30"),
        ("grace_window_secs", "300"),
        ("heartbeat_interval_ms", "1000"),
        ("match_threshold", "0.6"),
        ("cooldown_window_secs", "10"),
    ];

    for (key, default_value) in defaults {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM settings WHERE key = ?)")
                .bind(key)
                .fetch_one(pool)
                .await?;

        if !exists {
            sqlx::query("INSERT INTO settings (key, value) VALUES (?, ?)")
                .bind(key)
                .bind(default_value)
                .execute(pool)
                .await?;

            info!("Initialized setting '{}' with default value: {}", key, default_value);
        }
    }

    Ok(())
}
