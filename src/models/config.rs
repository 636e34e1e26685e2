use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::search::OutputFormat;
use crate::error::ConfigError;

pub const DEFAULT_EMBEDDING_URL: &str = "https://api.openai.com";
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-large";
pub const DEFAULT_EMBEDDING_DIMENSION: u32 = 3072;
pub const DEFAULT_MAX_ITEM_TOKENS: usize = 8000;
pub const DEFAULT_MAX_BATCH_ITEMS: usize = 2048;
pub const DEFAULT_COST_PER_MILLION_TOKENS: f64 = 0.13;
pub const DEFAULT_QDRANT_URL: &str = "http://localhost:6334";
pub const DEFAULT_QDRANT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_SYNC_BATCH_SIZE: usize = 50;

const APP_DIR: &str = "kbsync";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub vector_store: VectorStoreConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub chunking: ChunkingConfig,

    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join(APP_DIR).join("config.toml"))
    }

    pub fn data_dir() -> Option<PathBuf> {
        dirs::data_dir().map(|p| p.join(APP_DIR))
    }

    /// Load the config file (if any), then apply `.env` and environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path)?,
            _ => Self::default(),
        };

        dotenvy::dotenv().ok();
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Apply environment overrides through `lookup` so tests need not touch
    /// process-wide state.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("OPENAI_API_KEY").filter(|v| !v.is_empty()) {
            self.embedding.api_key = Some(key);
        }
        if let Some(url) = lookup("OPENAI_BASE_URL").filter(|v| !v.is_empty()) {
            self.embedding.base_url = url;
        }
        if let Some(url) = lookup("QDRANT_URL").filter(|v| !v.is_empty()) {
            self.vector_store.url = url;
        }
        if let Some(key) = lookup("QDRANT_API_KEY").filter(|v| !v.is_empty()) {
            self.vector_store.api_key = Some(key);
        }
        if let Some(url) = lookup("KBSYNC_DATABASE_URL").filter(|v| !v.is_empty()) {
            self.store.driver = if url.starts_with("postgres://") || url.starts_with("postgresql://")
            {
                StoreDriver::PostgreSQL
            } else {
                StoreDriver::Sqlite
            };
            self.store.url = Some(url);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sync.batch_size == 0 {
            return Err(ConfigError::ValidationError(
                "sync.batch_size must be at least 1".to_string(),
            ));
        }
        if self.embedding.dimension == 0 {
            return Err(ConfigError::ValidationError(
                "embedding.dimension must be at least 1".to_string(),
            ));
        }
        if self.embedding.max_item_tokens == 0 || self.embedding.max_batch_items == 0 {
            return Err(ConfigError::ValidationError(
                "embedding limits must be at least 1".to_string(),
            ));
        }
        if self.chunking.overlap >= self.chunking.max_tokens {
            return Err(ConfigError::ValidationError(format!(
                "chunking.overlap ({}) must be smaller than chunking.max_tokens ({})",
                self.chunking.overlap, self.chunking.max_tokens
            )));
        }
        Ok(())
    }

    pub fn save(&self) -> Result<PathBuf, ConfigError> {
        let path = Self::config_path().ok_or_else(|| {
            ConfigError::PathError("could not determine config directory".to_string())
        })?;
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_url")]
    pub base_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_embedding_model")]
    pub model: String,

    #[serde(default = "default_dimension")]
    pub dimension: u32,

    #[serde(default = "default_max_item_tokens")]
    pub max_item_tokens: usize,

    #[serde(default = "default_max_batch_items")]
    pub max_batch_items: usize,

    #[serde(default = "default_cost_per_million")]
    pub cost_per_million_tokens: f64,

    /// No timeout unless set; batch-size limits bound the request instead.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

fn default_embedding_url() -> String {
    DEFAULT_EMBEDDING_URL.to_string()
}

fn default_embedding_model() -> String {
    DEFAULT_EMBEDDING_MODEL.to_string()
}

fn default_dimension() -> u32 {
    DEFAULT_EMBEDDING_DIMENSION
}

fn default_max_item_tokens() -> usize {
    DEFAULT_MAX_ITEM_TOKENS
}

fn default_max_batch_items() -> usize {
    DEFAULT_MAX_BATCH_ITEMS
}

fn default_cost_per_million() -> f64 {
    DEFAULT_COST_PER_MILLION_TOKENS
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: default_embedding_url(),
            api_key: None,
            model: default_embedding_model(),
            dimension: default_dimension(),
            max_item_tokens: default_max_item_tokens(),
            max_batch_items: default_max_batch_items(),
            cost_per_million_tokens: default_cost_per_million(),
            timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorStoreConfig {
    #[serde(default = "default_qdrant_url")]
    pub url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_qdrant_timeout")]
    pub timeout_secs: u64,
}

fn default_qdrant_url() -> String {
    DEFAULT_QDRANT_URL.to_string()
}

fn default_qdrant_timeout() -> u64 {
    DEFAULT_QDRANT_TIMEOUT_SECS
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            url: default_qdrant_url(),
            api_key: None,
            timeout_secs: default_qdrant_timeout(),
        }
    }
}

/// Relational store backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreDriver {
    #[default]
    #[serde(rename = "sqlite")]
    Sqlite,
    #[serde(rename = "postgres", alias = "postgresql")]
    PostgreSQL,
}

impl std::fmt::Display for StoreDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreDriver::Sqlite => write!(f, "sqlite"),
            StoreDriver::PostgreSQL => write!(f, "postgres"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub driver: StoreDriver,

    /// SQLite file path or PostgreSQL URL. SQLite defaults to the data dir.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default = "default_pool_max")]
    pub pool_max: u32,
}

fn default_pool_max() -> u32 {
    5
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            driver: StoreDriver::default(),
            url: None,
            pool_max: default_pool_max(),
        }
    }
}

impl StoreConfig {
    /// Resolve the SQLite database path.
    pub fn sqlite_path(&self) -> Result<PathBuf, ConfigError> {
        match self.url {
            Some(ref url) => Ok(PathBuf::from(url.trim_start_matches("sqlite://"))),
            None => Config::data_dir()
                .map(|d| d.join("kbsync.db"))
                .ok_or_else(|| ConfigError::PathError("could not determine data directory".into())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_sync_batch_size")]
    pub batch_size: usize,
}

fn default_sync_batch_size() -> usize {
    DEFAULT_SYNC_BATCH_SIZE
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: default_sync_batch_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_max_tokens")]
    pub max_tokens: usize,

    #[serde(default = "default_chunk_overlap")]
    pub overlap: usize,
}

fn default_chunk_max_tokens() -> usize {
    6000
}

fn default_chunk_overlap() -> usize {
    200
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_chunk_max_tokens(),
            overlap: default_chunk_overlap(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_limit")]
    pub default_limit: u32,

    #[serde(default)]
    pub default_format: OutputFormat,

    #[serde(default)]
    pub default_min_score: Option<f32>,
}

fn default_limit() -> u32 {
    5
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            default_format: OutputFormat::Text,
            default_min_score: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::Text,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.embedding.base_url, DEFAULT_EMBEDDING_URL);
        assert_eq!(config.embedding.model, "text-embedding-3-large");
        assert_eq!(config.embedding.dimension, 3072);
        assert_eq!(config.embedding.max_item_tokens, 8000);
        assert_eq!(config.embedding.max_batch_items, 2048);
        assert_eq!(config.vector_store.url, DEFAULT_QDRANT_URL);
        assert_eq!(config.vector_store.timeout_secs, 30);
        assert_eq!(config.sync.batch_size, 50);
        assert_eq!(config.store.driver, StoreDriver::Sqlite);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_path() {
        let path = Config::config_path();
        assert!(path.is_some());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [sync]
            batch_size = 10

            [store]
            driver = "postgres"
            url = "postgres://localhost/kb"
            "#,
        )
        .unwrap();

        assert_eq!(config.sync.batch_size, 10);
        assert_eq!(config.store.driver, StoreDriver::PostgreSQL);
        assert_eq!(config.embedding.dimension, DEFAULT_EMBEDDING_DIMENSION);
        assert_eq!(config.chunking.overlap, 200);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("OPENAI_API_KEY", "sk-test"),
            ("QDRANT_URL", "http://qdrant:6334"),
            ("QDRANT_API_KEY", "qd-key"),
            ("KBSYNC_DATABASE_URL", "postgres://db/kb"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_env(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.embedding.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.vector_store.url, "http://qdrant:6334");
        assert_eq!(config.vector_store.api_key.as_deref(), Some("qd-key"));
        assert_eq!(config.store.driver, StoreDriver::PostgreSQL);
        assert_eq!(config.store.url.as_deref(), Some("postgres://db/kb"));
    }

    #[test]
    fn test_empty_env_values_ignored() {
        let mut config = Config::default();
        config.apply_env(|k| (k == "OPENAI_API_KEY").then(String::new));
        assert!(config.embedding.api_key.is_none());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.sync.batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.chunking.overlap = config.chunking.max_tokens;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load_roundtrip_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.sync.batch_size = 7;
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.sync.batch_size, 7);
    }

    #[test]
    fn test_sqlite_path_strips_scheme() {
        let store = StoreConfig {
            url: Some("sqlite:///tmp/kb.db".to_string()),
            ..Default::default()
        };
        assert_eq!(store.sqlite_path().unwrap(), PathBuf::from("/tmp/kb.db"));
    }
}
