use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct CairnConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub index: IndexConfig,
    pub retrieval: RetrievalConfig,
    pub retention: RetentionConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub transport: String,
    pub host: String,
    pub port: u16,
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
    /// Fixed embedding dimension for this store.
    pub dimension: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: String,
}

/// HNSW graph parameters.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct IndexConfig {
    /// Max neighbors per node on layers above 0 (layer 0 keeps `2 * m`).
    pub m: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
    pub max_level: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    pub default_limit: usize,
    pub similarity_threshold: f32,
    pub rrf_k: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetentionConfig {
    /// Maximum number of live vectors.
    pub capacity: usize,
    pub retention_days: u64,
    /// Run the time-based sweep when the engine opens (the orphan sweep always runs).
    pub sweep_on_open: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            transport: "stdio".into(),
            host: "127.0.0.1".into(),
            port: 7411,
            log_level: "info".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let db_path = default_cairn_dir()
            .join("cairn.db")
            .to_string_lossy()
            .into_owned();
        Self {
            db_path,
            dimension: 384,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "hashing".into(),
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            m: 16,
            ef_construction: 100,
            ef_search: 64,
            max_level: 16,
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_limit: 10,
            similarity_threshold: 0.25,
            rrf_k: 60,
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            retention_days: 90,
            sweep_on_open: false,
        }
    }
}

/// Returns `~/.cairn/`
pub fn default_cairn_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".cairn")
}

/// Returns the default config file path: `~/.cairn/config.toml`
pub fn default_config_path() -> PathBuf {
    default_cairn_dir().join("config.toml")
}

impl CairnConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            CairnConfig::default()
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.storage.dimension == 0 {
            bail!("storage.dimension must be at least 1");
        }
        if self.index.m == 0 {
            bail!("index.m must be at least 1");
        }
        if self.retrieval.rrf_k == 0 {
            bail!("retrieval.rrf_k must be at least 1");
        }
        if !self.retrieval.similarity_threshold.is_finite() {
            bail!("retrieval.similarity_threshold must be a finite number");
        }
        Ok(())
    }

    /// Apply environment variable overrides
    /// (CAIRN_DB, CAIRN_LOG_LEVEL, CAIRN_CAPACITY, CAIRN_RETENTION_DAYS).
    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(val) = std::env::var("CAIRN_DB") {
            self.storage.db_path = val;
        }
        if let Ok(val) = std::env::var("CAIRN_LOG_LEVEL") {
            self.server.log_level = val;
        }
        if let Ok(val) = std::env::var("CAIRN_CAPACITY") {
            self.retention.capacity = val
                .parse()
                .with_context(|| format!("CAIRN_CAPACITY is not a number: {val}"))?;
        }
        if let Ok(val) = std::env::var("CAIRN_RETENTION_DAYS") {
            self.retention.retention_days = val
                .parse()
                .with_context(|| format!("CAIRN_RETENTION_DAYS is not a number: {val}"))?;
        }
        Ok(())
    }

    /// Resolve the database path, expanding `~` if needed.
    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = CairnConfig::default();
        assert_eq!(config.server.transport, "stdio");
        assert_eq!(config.server.log_level, "info");
        assert_eq!(config.storage.dimension, 384);
        assert_eq!(config.retrieval.rrf_k, 60);
        assert_eq!(config.index.m, 16);
        assert_eq!(config.index.max_level, 16);
        assert_eq!(config.retention.capacity, 10_000);
        assert!(config.storage.db_path.ends_with("cairn.db"));
    }

    #[test]
    fn parse_toml_config() {
        let toml_str = r#"
[server]
log_level = "debug"

[storage]
db_path = "/tmp/test.db"
dimension = 64

[retention]
capacity = 500
retention_days = 1
"#;
        let config: CairnConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.log_level, "debug");
        assert_eq!(config.storage.db_path, "/tmp/test.db");
        assert_eq!(config.storage.dimension, 64);
        assert_eq!(config.retention.capacity, 500);
        assert_eq!(config.retention.retention_days, 1);
        // defaults still apply for unset fields
        assert_eq!(config.retrieval.rrf_k, 60);
        assert_eq!(config.index.ef_search, 64);
    }

    #[test]
    fn zero_rrf_k_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[retrieval]\nrrf_k = 0\n").unwrap();

        let err = CairnConfig::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("rrf_k"), "{err:#}");

        let mut config = CairnConfig::default();
        assert!(config.validate().is_ok());
        config.index.m = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = CairnConfig::default();
        std::env::set_var("CAIRN_DB", "/tmp/override.db");
        std::env::set_var("CAIRN_LOG_LEVEL", "trace");
        std::env::set_var("CAIRN_CAPACITY", "42");

        config.apply_env_overrides().unwrap();

        assert_eq!(config.storage.db_path, "/tmp/override.db");
        assert_eq!(config.server.log_level, "trace");
        assert_eq!(config.retention.capacity, 42);

        // Clean up
        std::env::remove_var("CAIRN_DB");
        std::env::remove_var("CAIRN_LOG_LEVEL");
        std::env::remove_var("CAIRN_CAPACITY");
    }

    #[test]
    fn tilde_expands_to_home() {
        let expanded = expand_tilde("~/data/cairn.db");
        if dirs::home_dir().is_some() {
            assert!(!expanded.starts_with("~"));
        }
        assert!(expanded.ends_with("data/cairn.db"));
        assert_eq!(expand_tilde("/abs/path.db"), PathBuf::from("/abs/path.db"));
    }
}
