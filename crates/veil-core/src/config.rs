use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{VeilError, VeilResult};

/// Seven days, the lifetime of a shared snippet.
pub const DEFAULT_SNIPPET_TTL_SECS: u64 = 7 * 24 * 60 * 60;

/// Default stream chunk size (1 MiB).
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Largest chunk size the stream processor accepts (16 MiB).
pub const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;

/// Top-level configuration (loaded from veil.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VeilConfig {
    pub daemon: DaemonConfig,
    pub store: StoreConfig,
    pub crypto: CryptoConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// HTTP listen address for the snippet API (default: 127.0.0.1:8787)
    pub listen: String,
    /// Public base URL used when printing share links
    pub public_url: String,
    /// Serve Prometheus metrics on /metrics (default: true)
    pub metrics: bool,
    /// Log level (default: info)
    pub log_level: String,
    /// Log format: "json" or "text"
    pub log_format: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Process memory only; snippets vanish on restart
    Memory,
    /// JSON file flushed atomically after every create/sweep
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// JSON store path (backend = "json")
    pub path: PathBuf,
    /// Snippet lifetime in seconds (default: 7 days)
    pub ttl_secs: u64,
    /// Background sweep interval in seconds (0 disables the sweep)
    pub sweep_interval_secs: u64,
    /// Length of generated snippet ids
    pub id_length: usize,
    /// Largest accepted encryptedText, in bytes
    pub max_snippet_bytes: usize,
    /// How many fresh ids to try before giving up on a create
    pub max_create_attempts: u32,
}

/// Transform engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// Argon2id memory cost in KiB (default: 65536 = 64 MiB)
    pub argon2_mem_cost_kib: u32,
    /// Argon2id time cost (iterations, default: 3)
    pub argon2_time_cost: u32,
    /// Argon2id parallelism (default: 4)
    pub argon2_parallelism: u32,
    /// Stream processor chunk size in bytes (default: 1 MiB)
    pub chunk_size_bytes: usize,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8787".into(),
            public_url: "http://127.0.0.1:8787".into(),
            metrics: true,
            log_level: "info".into(),
            log_format: "text".into(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            path: PathBuf::from("~/.local/share/veil/snippets.json"),
            ttl_secs: DEFAULT_SNIPPET_TTL_SECS,
            sweep_interval_secs: 3600,
            id_length: 12,
            max_snippet_bytes: 1024 * 1024,
            max_create_attempts: 8,
        }
    }
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            argon2_mem_cost_kib: 65536,
            argon2_time_cost: 3,
            argon2_parallelism: 4,
            chunk_size_bytes: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl VeilConfig {
    /// Load configuration from `path`, falling back to defaults when the
    /// file does not exist.
    pub fn load(path: &Path) -> VeilResult<Self> {
        let config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .map_err(|e| VeilError::Config(format!("reading {}: {e}", path.display())))?;
            toml::from_str(&content)
                .map_err(|e| VeilError::Config(format!("parsing {}: {e}", path.display())))?
        } else {
            tracing::warn!("config file not found: {}  (using defaults)", path.display());
            VeilConfig::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> VeilResult<()> {
        if self.store.ttl_secs == 0 {
            return Err(VeilError::Config("store.ttl_secs must be positive".into()));
        }
        if !(8..=64).contains(&self.store.id_length) {
            return Err(VeilError::Config(format!(
                "store.id_length must be between 8 and 64, got {}",
                self.store.id_length
            )));
        }
        if self.store.max_create_attempts == 0 {
            return Err(VeilError::Config(
                "store.max_create_attempts must be at least 1".into(),
            ));
        }
        if self.crypto.chunk_size_bytes == 0 || self.crypto.chunk_size_bytes > MAX_CHUNK_SIZE {
            return Err(VeilError::Config(format!(
                "crypto.chunk_size_bytes must be between 1 and {MAX_CHUNK_SIZE}, got {}",
                self.crypto.chunk_size_bytes
            )));
        }
        Ok(())
    }
}

/// Expand a leading `~/` to `$HOME`.
pub fn expand_tilde(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match std::env::var_os("HOME") {
            Some(home) => PathBuf::from(home).join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}
