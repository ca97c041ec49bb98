//! Shared application state
//!
//! All services are explicitly constructed and injected here, each with its
//! own internal synchronization; nothing is an ambient global, so tests can
//! build an isolated state per case and tear it down cleanly.

use sqlx::SqlitePool;
use std::sync::Arc;

use aula_common::config::LiveConfig;

use crate::identify::{EmbeddingStore, IdentificationEngine};
use crate::monitor::FrameIngest;
use crate::rooms::RoomManager;
use crate::session::SessionRegistry;

/// State shared by the HTTP surface, the scheduler, and monitoring workers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub config: Arc<LiveConfig>,
    pub registry: Arc<SessionRegistry>,
    pub rooms: Arc<RoomManager>,
    pub engine: Arc<IdentificationEngine>,
    pub ingest: Arc<FrameIngest>,
}

impl AppState {
    pub fn new(db: SqlitePool, config: LiveConfig) -> Self {
        let store = EmbeddingStore::new(db.clone(), config.embedding_dim);
        let engine = Arc::new(IdentificationEngine::new(store, config.match_threshold));
        Self {
            db,
            registry: Arc::new(SessionRegistry::new()),
            rooms: Arc::new(RoomManager::new(config.event_buffer)),
            engine,
            ingest: Arc::new(FrameIngest::new()),
            config: Arc::new(config),
        }
    }
}
