//! Configuration loading and root folder resolution
//!
//! Resolution priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. OS-dependent compiled default (fallback)
//!
//! Policy constants (grace window, tick intervals, match threshold, retry
//! budget) live in [`LiveConfig`] with serde defaults rather than inline
//! literals, so deployments can tune them without a rebuild.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Service configuration, loadable from a TOML file
///
/// Every field has a default; a missing or partial config file is valid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveConfig {
    /// HTTP bind address for the control/SSE surface
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Scheduler tick interval in seconds
    #[serde(default = "default_scheduler_interval_secs")]
    pub scheduler_interval_secs: u64,

    /// Auto-promotion grace window after scheduled start, in seconds
    #[serde(default = "default_grace_window_secs")]
    pub grace_window_secs: i64,

    /// Presence-count heartbeat interval in milliseconds
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// Euclidean distance threshold below which a match is accepted
    #[serde(default = "default_match_threshold")]
    pub match_threshold: f32,

    /// Store-wide embedding dimensionality, validated on enrollment
    #[serde(default = "default_embedding_dim")]
    pub embedding_dim: usize,

    /// Engine-level cooldown window for repeat hits on the same identity,
    /// in seconds (rate-limits within a frame-processing burst; the
    /// session-scoped recognized set is the durable dedup)
    #[serde(default = "default_cooldown_window_secs")]
    pub cooldown_window_secs: u64,

    /// Consecutive frame-read failures tolerated before the monitoring
    /// worker gives up
    #[serde(default = "default_capture_retry_max")]
    pub capture_retry_max: u32,

    /// Initial backoff between frame-read retries, in milliseconds (doubles
    /// per consecutive failure)
    #[serde(default = "default_capture_retry_backoff_ms")]
    pub capture_retry_backoff_ms: u64,

    /// Per-subscriber delivery buffer and EventBus capacity
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_bind_addr() -> String {
    "127.0.0.1:5750".to_string()
}

fn default_scheduler_interval_secs() -> u64 {
    30
}

fn default_grace_window_secs() -> i64 {
    300
}

fn default_heartbeat_interval_ms() -> u64 {
    1000
}

fn default_match_threshold() -> f32 {
    0.6
}

fn default_embedding_dim() -> usize {
    512
}

fn default_cooldown_window_secs() -> u64 {
    10
}

fn default_capture_retry_max() -> u32 {
    5
}

fn default_capture_retry_backoff_ms() -> u64 {
    500
}

fn default_event_buffer() -> usize {
    100
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            scheduler_interval_secs: default_scheduler_interval_secs(),
            grace_window_secs: default_grace_window_secs(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            match_threshold: default_match_threshold(),
            embedding_dim: default_embedding_dim(),
            cooldown_window_secs: default_cooldown_window_secs(),
            capture_retry_max: default_capture_retry_max(),
            capture_retry_backoff_ms: default_capture_retry_backoff_ms(),
            event_buffer: default_event_buffer(),
        }
    }
}

impl LiveConfig {
    /// Load configuration from a TOML file, or defaults if `path` is None
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|e| {
                    Error::Config(format!("Failed to read {}: {}", path.display(), e))
                })?;
                toml::from_str(&content)
                    .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))
            }
            None => Ok(Self::default()),
        }
    }

    /// Validate cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if self.embedding_dim == 0 {
            return Err(Error::Config("embedding_dim must be non-zero".to_string()));
        }
        if self.match_threshold <= 0.0 {
            return Err(Error::Config("match_threshold must be positive".to_string()));
        }
        if self.grace_window_secs < 0 {
            return Err(Error::Config("grace_window_secs must not be negative".to_string()));
        }
        Ok(())
    }
}

/// Resolve the service root folder (database and config live under it)
///
/// Priority: CLI argument, then environment variable, then OS default.
pub fn resolve_root_folder(cli_arg: Option<&str>, env_var_name: &str) -> PathBuf {
    if let Some(path) = cli_arg {
        return PathBuf::from(path);
    }

    if let Ok(path) = std::env::var(env_var_name) {
        return PathBuf::from(path);
    }

    get_default_root_folder()
}

/// Get OS-dependent default root folder path
fn get_default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        dirs::data_local_dir()
            .map(|d| d.join("aula"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/aula"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("aula"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/aula"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("aula"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\aula"))
    } else {
        PathBuf::from("./aula_data")
    }
}
