//! Persistent embedding store for enrolled identities
//!
//! One row per identity key. Embeddings are fixed-length f32 vectors stored
//! as little-endian BLOBs; dimensionality is a store-wide constant validated
//! on every put. Re-enrollment replaces the embedding in place; removal is
//! soft (active flag) by default, hard on request.

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tracing::info;

use aula_common::{Error, Result};

/// One enrolled identity
#[derive(Debug, Clone)]
pub struct IdentityRecord {
    pub identity_key: String,
    pub display_name: String,
    pub embedding: Vec<f32>,
    pub enrolled_at: DateTime<Utc>,
    pub active: bool,
}

/// Key→(embedding, metadata) table for enrolled identities
#[derive(Clone)]
pub struct EmbeddingStore {
    pool: SqlitePool,
    dim: usize,
}

impl EmbeddingStore {
    pub fn new(pool: SqlitePool, dim: usize) -> Self {
        Self { pool, dim }
    }

    /// Store-wide embedding dimensionality
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Enroll or re-enroll an identity
    ///
    /// Replaces the embedding on conflict and reactivates a soft-deleted row.
    pub async fn put(&self, identity_key: &str, display_name: &str, embedding: &[f32]) -> Result<()> {
        if embedding.len() != self.dim {
            return Err(Error::InvalidInput(format!(
                "embedding has {} dimensions, store requires {}",
                embedding.len(),
                self.dim
            )));
        }

        let blob = encode_embedding(embedding);
        let enrolled_at = Utc::now().to_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO identities (identity_key, display_name, embedding, enrolled_at, active)
            VALUES (?, ?, ?, ?, 1)
            ON CONFLICT(identity_key) DO UPDATE SET
                display_name = excluded.display_name,
                embedding = excluded.embedding,
                enrolled_at = excluded.enrolled_at,
                active = 1
            "#,
        )
        .bind(identity_key)
        .bind(display_name)
        .bind(&blob)
        .bind(&enrolled_at)
        .execute(&self.pool)
        .await?;

        info!(identity_key, "identity enrolled");
        Ok(())
    }

    /// Fetch one identity by key (soft-deleted rows included, flagged inactive)
    pub async fn get(&self, identity_key: &str) -> Result<Option<IdentityRecord>> {
        let row = sqlx::query(
            "SELECT identity_key, display_name, embedding, enrolled_at, active
             FROM identities WHERE identity_key = ?",
        )
        .bind(identity_key)
        .fetch_optional(&self.pool)
        .await?;

        row.map(record_from_row).transpose()
    }

    /// Remove an identity; soft delete clears the active flag, hard delete
    /// removes the row
    ///
    /// Returns whether anything was affected.
    pub async fn delete(&self, identity_key: &str, soft: bool) -> Result<bool> {
        let result = if soft {
            sqlx::query("UPDATE identities SET active = 0 WHERE identity_key = ?")
                .bind(identity_key)
                .execute(&self.pool)
                .await?
        } else {
            sqlx::query("DELETE FROM identities WHERE identity_key = ?")
                .bind(identity_key)
                .execute(&self.pool)
                .await?
        };
        Ok(result.rows_affected() > 0)
    }

    /// All active identities, the consistent snapshot an index rebuild reads
    pub async fn list_active(&self) -> Result<Vec<IdentityRecord>> {
        let rows = sqlx::query(
            "SELECT identity_key, display_name, embedding, enrolled_at, active
             FROM identities WHERE active = 1 ORDER BY identity_key",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(record_from_row).collect()
    }
}

fn record_from_row(row: sqlx::sqlite::SqliteRow) -> Result<IdentityRecord> {
    let enrolled_at: String = row.get("enrolled_at");
    let enrolled_at = DateTime::parse_from_rfc3339(&enrolled_at)
        .map_err(|e| Error::Internal(format!("Failed to parse enrolled_at: {}", e)))?
        .with_timezone(&Utc);
    let blob: Vec<u8> = row.get("embedding");
    let active: i64 = row.get("active");

    Ok(IdentityRecord {
        identity_key: row.get("identity_key"),
        display_name: row.get("display_name"),
        embedding: decode_embedding(&blob)?,
        enrolled_at,
        active: active != 0,
    })
}

/// Encode an embedding as little-endian f32 bytes
pub fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(embedding.len() * 4);
    for value in embedding {
        blob.extend_from_slice(&value.to_le_bytes());
    }
    blob
}

/// Decode little-endian f32 bytes back into an embedding
pub fn decode_embedding(blob: &[u8]) -> Result<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return Err(Error::Internal(format!(
            "embedding blob length {} is not a multiple of 4",
            blob.len()
        )));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}
