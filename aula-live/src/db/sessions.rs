//! Session row persistence
//!
//! The registry is authoritative for phase at runtime; these rows seed it at
//! startup and record transitions so a restart retains history.

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use aula_common::{Error, Result};

use crate::session::SessionSnapshot;

/// One persisted session
#[derive(Debug, Clone)]
pub struct SessionRow {
    pub session_id: Uuid,
    pub title: String,
    pub scheduled_at: DateTime<Utc>,
    pub duration_minutes: Option<i64>,
    pub phase: String,
    pub subphase: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// Insert a newly scheduled session
pub async fn insert_session(pool: &SqlitePool, row: &SessionRow) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO sessions (session_id, title, scheduled_at, duration_minutes, phase, subphase)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(row.session_id.to_string())
    .bind(&row.title)
    .bind(row.scheduled_at.to_rfc3339())
    .bind(row.duration_minutes)
    .bind(&row.phase)
    .bind(&row.subphase)
    .execute(pool)
    .await?;
    Ok(())
}

/// Load every session row (registry seed at startup)
pub async fn load_sessions(pool: &SqlitePool) -> Result<Vec<SessionRow>> {
    let rows = sqlx::query(
        "SELECT session_id, title, scheduled_at, duration_minutes, phase, subphase, started_at, ended_at
         FROM sessions ORDER BY scheduled_at",
    )
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(row_from_sqlite).collect()
}

/// Fetch one session row
pub async fn get_session(pool: &SqlitePool, session_id: Uuid) -> Result<Option<SessionRow>> {
    let row = sqlx::query(
        "SELECT session_id, title, scheduled_at, duration_minutes, phase, subphase, started_at, ended_at
         FROM sessions WHERE session_id = ?",
    )
    .bind(session_id.to_string())
    .fetch_optional(pool)
    .await?;

    row.map(row_from_sqlite).transpose()
}

/// Write a registry snapshot's phase back to the row
pub async fn persist_phase(pool: &SqlitePool, snapshot: &SessionSnapshot) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE sessions
        SET phase = ?, subphase = ?, started_at = ?, ended_at = ?
        WHERE session_id = ?
        "#,
    )
    .bind(snapshot.phase.label())
    .bind(snapshot.phase.subphase_label())
    .bind(snapshot.started_at.map(|dt| dt.to_rfc3339()))
    .bind(snapshot.ended_at.map(|dt| dt.to_rfc3339()))
    .bind(snapshot.session_id.to_string())
    .execute(pool)
    .await?;
    Ok(())
}

fn row_from_sqlite(row: sqlx::sqlite::SqliteRow) -> Result<SessionRow> {
    let session_id: String = row.get("session_id");
    let session_id = Uuid::parse_str(&session_id)
        .map_err(|e| Error::Internal(format!("Failed to parse session_id: {}", e)))?;

    let scheduled_at: String = row.get("scheduled_at");
    let scheduled_at = parse_rfc3339("scheduled_at", &scheduled_at)?;

    let started_at: Option<String> = row.get("started_at");
    let started_at = started_at
        .map(|s| parse_rfc3339("started_at", &s))
        .transpose()?;
    let ended_at: Option<String> = row.get("ended_at");
    let ended_at = ended_at.map(|s| parse_rfc3339("ended_at", &s)).transpose()?;

    Ok(SessionRow {
        session_id,
        title: row.get("title"),
        scheduled_at,
        duration_minutes: row.get("duration_minutes"),
        phase: row.get("phase"),
        subphase: row.get("subphase"),
        started_at,
        ended_at,
    })
}

fn parse_rfc3339(field: &str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Failed to parse {}: {}", field, e)))
}
