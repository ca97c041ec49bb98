//! Append-only attendance records
//!
//! Uniqueness of (identity, session) is enforced by the table's composite
//! primary key; a duplicate insert is swallowed by ON CONFLICT DO NOTHING and
//! reported as "not inserted", never as an error.

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use aula_common::events::{AttendanceEntry, AttendanceSummary};
use aula_common::Result;

/// Record attendance for an identity in a session
///
/// Returns whether a new record was inserted (false on duplicate).
pub async fn record(
    pool: &SqlitePool,
    session_id: Uuid,
    identity_key: &str,
    confidence: f32,
    method: &str,
    recorded_at: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO attendance_records (identity_key, session_id, recorded_at, confidence, method)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(identity_key, session_id) DO NOTHING
        "#,
    )
    .bind(identity_key)
    .bind(session_id.to_string())
    .bind(recorded_at.to_rfc3339())
    .bind(confidence as f64)
    .bind(method)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Count of attendance records for a session
pub async fn present_count(pool: &SqlitePool, session_id: Uuid) -> Result<usize> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM attendance_records WHERE session_id = ?")
            .bind(session_id.to_string())
            .fetch_one(pool)
            .await?;
    Ok(count as usize)
}

/// Full roll-call summary for a session: every active identity, present or
/// absent, with per-person detail for those recorded
pub async fn summary(pool: &SqlitePool, session_id: Uuid) -> Result<AttendanceSummary> {
    let rows = sqlx::query(
        r#"
        SELECT i.identity_key, i.display_name, a.recorded_at, a.confidence, a.method
        FROM identities i
        LEFT JOIN attendance_records a
            ON a.identity_key = i.identity_key AND a.session_id = ?
        WHERE i.active = 1
        ORDER BY i.display_name
        "#,
    )
    .bind(session_id.to_string())
    .fetch_all(pool)
    .await?;

    let mut entries = Vec::with_capacity(rows.len());
    let mut present = 0;
    for row in rows {
        let recorded_at: Option<String> = row.get("recorded_at");
        let recorded_at = recorded_at.and_then(|s| {
            DateTime::parse_from_rfc3339(&s)
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        });
        let confidence: Option<f64> = row.get("confidence");
        let method: Option<String> = row.get("method");
        let is_present = method.is_some();
        if is_present {
            present += 1;
        }

        entries.push(AttendanceEntry {
            identity_key: row.get("identity_key"),
            display_name: row.get("display_name"),
            present: is_present,
            recorded_at,
            confidence: confidence.map(|c| c as f32),
            method,
        });
    }

    let total = entries.len();
    Ok(AttendanceSummary {
        total_enrolled: total,
        present_count: present,
        absent_count: total - present,
        entries,
    })
}
