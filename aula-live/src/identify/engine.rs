//! Identification engine: nearest-neighbor search over enrolled embeddings
//!
//! The index is a plain linear-scan structure rebuilt from the embedding
//! store; at the scale this service targets (tens to low thousands of
//! enrolled identities, a few probes per second) that is the right tool and
//! an approximate-nearest-neighbor structure would be over-engineering.
//!
//! Reload swaps in a whole new index snapshot behind an RwLock'd Arc, so
//! in-flight identify calls keep scanning the snapshot they started with and
//! the live index is never mutated in place.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::info;

use aula_common::{Error, Result};

use super::store::{EmbeddingStore, IdentityRecord};

/// Accepted identification result
#[derive(Debug, Clone)]
pub struct IdentityMatch {
    pub identity_key: String,
    pub display_name: String,
    /// Calibrated confidence in [0, 1]
    pub confidence: f32,
    /// Raw Euclidean distance, kept alongside confidence for future
    /// recalibration of the mapping
    pub distance: f32,
}

/// Immutable index snapshot: parallel sequences of key/name/embedding
struct IdentityIndex {
    keys: Vec<String>,
    names: Vec<String>,
    embeddings: Vec<Vec<f32>>,
}

impl IdentityIndex {
    fn empty() -> Self {
        Self {
            keys: Vec::new(),
            names: Vec::new(),
            embeddings: Vec::new(),
        }
    }

    fn from_records(records: Vec<IdentityRecord>) -> Self {
        let mut index = Self {
            keys: Vec::with_capacity(records.len()),
            names: Vec::with_capacity(records.len()),
            embeddings: Vec::with_capacity(records.len()),
        };
        for record in records {
            index.keys.push(record.identity_key);
            index.names.push(record.display_name);
            index.embeddings.push(record.embedding);
        }
        index
    }

    fn len(&self) -> usize {
        self.keys.len()
    }
}

/// Turns a probe embedding into an identity + confidence
pub struct IdentificationEngine {
    store: EmbeddingStore,
    index: RwLock<Arc<IdentityIndex>>,
    threshold: f32,
}

impl IdentificationEngine {
    /// Create an engine with an empty index; call [`reload`] to populate it
    ///
    /// An empty index is a valid (if useless) state: identify simply finds
    /// no match until the first successful reload.
    pub fn new(store: EmbeddingStore, threshold: f32) -> Self {
        Self {
            store,
            index: RwLock::new(Arc::new(IdentityIndex::empty())),
            threshold,
        }
    }

    pub fn store(&self) -> &EmbeddingStore {
        &self.store
    }

    /// Rebuild the index from the embedding store and swap it in atomically
    ///
    /// Safe to call concurrently with in-flight identify calls. Returns the
    /// number of indexed identities.
    pub async fn reload(&self) -> Result<usize> {
        let records = self.store.list_active().await?;
        let fresh = Arc::new(IdentityIndex::from_records(records));
        let count = fresh.len();

        *self.index.write().await = fresh;
        info!(indexed = count, "identification index reloaded");
        Ok(count)
    }

    /// Number of identities in the current index snapshot
    pub async fn index_size(&self) -> usize {
        self.index.read().await.len()
    }

    /// Match a probe embedding against the index
    ///
    /// Linear scan over all indexed embeddings; the nearest is accepted iff
    /// its Euclidean distance is below the threshold. An empty index yields
    /// no match, never an error.
    pub async fn identify(&self, probe: &[f32]) -> Result<Option<IdentityMatch>> {
        // A malformed probe is rejected regardless of index contents
        if probe.len() != self.store.dim() {
            return Err(Error::InvalidInput(format!(
                "probe has {} dimensions, index requires {}",
                probe.len(),
                self.store.dim()
            )));
        }

        let index = Arc::clone(&*self.index.read().await);
        if index.len() == 0 {
            return Ok(None);
        }

        let mut best: Option<(usize, f32)> = None;
        for (i, embedding) in index.embeddings.iter().enumerate() {
            let d = euclidean_distance(probe, embedding);
            if best.map(|(_, min)| d < min).unwrap_or(true) {
                best = Some((i, d));
            }
        }

        // len() > 0 above guarantees a candidate
        let Some((i, d_min)) = best else {
            return Ok(None);
        };
        if d_min >= self.threshold {
            return Ok(None);
        }

        Ok(Some(IdentityMatch {
            identity_key: index.keys[i].clone(),
            display_name: index.names[i].clone(),
            confidence: confidence_from_distance(d_min),
            distance: d_min,
        }))
    }
}

fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

/// Map a match distance to a confidence in [0, 1]
///
/// `exp(-2 * d)`: distance 0 maps to confidence 1, larger distances decay
/// toward 0. The mapping is an inherited calibration with no documented
/// derivation; it is preserved exactly for comparability with historical
/// attendance data and should not be treated as a probability.
pub fn confidence_from_distance(distance: f32) -> f32 {
    (-2.0 * distance).exp().clamp(0.0, 1.0)
}

/// Time-based cooldown for repeat hits on the same identity
///
/// Rate-limits redundant writes when a face lingers across many consecutive
/// frames within one burst. The session-scoped recognized set is the durable
/// dedup; this only thins the stream before it.
pub struct MatchCooldown {
    window: Duration,
    last_seen: HashMap<String, Instant>,
}

impl MatchCooldown {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_seen: HashMap::new(),
        }
    }

    /// Whether this identity may pass now; records the hit if so
    pub fn allow(&mut self, identity_key: &str) -> bool {
        let now = Instant::now();
        match self.last_seen.get(identity_key) {
            Some(last) if now.duration_since(*last) < self.window => false,
            _ => {
                self.last_seen.insert(identity_key.to_string(), now);
                true
            }
        }
    }
}
