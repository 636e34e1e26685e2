//! Error types for the knowledge-base sync engine.
//!
//! Every component reports failures through its own enum; `kind()` maps each
//! variant onto the shared [`FailureKind`] taxonomy so callers can branch on
//! "caller-fixable" versus "provider trouble" without matching every variant.

use serde::Serialize;
use thiserror::Error;

/// Failure taxonomy shared by all components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Empty or over-limit input; the caller can fix it.
    Validation,
    /// Missing base, point or collection.
    NotFound,
    /// Embedding service, index service or database trouble.
    Provider,
    /// Explicit create of something that already exists.
    Conflict,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Validation => write!(f, "validation"),
            FailureKind::NotFound => write!(f, "not_found"),
            FailureKind::Provider => write!(f, "provider"),
            FailureKind::Conflict => write!(f, "conflict"),
        }
    }
}

/// Errors from token-window chunking.
#[derive(Debug, Error)]
pub enum ChunkingError {
    #[error("invalid chunk window: overlap {overlap} must be smaller than max_tokens {max_tokens}")]
    InvalidWindow { max_tokens: usize, overlap: usize },
}

impl ChunkingError {
    pub fn kind(&self) -> FailureKind {
        FailureKind::Validation
    }
}

/// Errors related to embedding operations.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("invalid embedding input: {0}")]
    Validation(String),

    #[error("failed to connect to embedding provider: {0}")]
    ConnectionError(String),

    #[error("embedding provider error: {0}")]
    ProviderError(String),

    #[error("invalid embedding response: {0}")]
    InvalidResponse(String),

    #[error("embedding timeout")]
    Timeout,
}

impl EmbeddingError {
    pub fn kind(&self) -> FailureKind {
        match self {
            EmbeddingError::Validation(_) => FailureKind::Validation,
            EmbeddingError::ConnectionError(_)
            | EmbeddingError::ProviderError(_)
            | EmbeddingError::InvalidResponse(_)
            | EmbeddingError::Timeout => FailureKind::Provider,
        }
    }
}

impl From<reqwest::Error> for EmbeddingError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            EmbeddingError::Timeout
        } else if e.is_connect() {
            EmbeddingError::ConnectionError(e.to_string())
        } else {
            EmbeddingError::ProviderError(e.to_string())
        }
    }
}

/// Errors related to vector index operations.
#[derive(Debug, Error)]
pub enum VectorStoreError {
    #[error("failed to connect to vector store: {0}")]
    ConnectionError(String),

    #[error("collection \"{0}\" does not exist")]
    CollectionNotFound(String),

    #[error("collection \"{0}\" already exists")]
    CollectionExists(String),

    #[error("point {id} not found in collection \"{collection}\"")]
    PointNotFound { collection: String, id: String },

    #[error("invalid vector store input: {0}")]
    InvalidInput(String),

    #[error("collection error: {0}")]
    CollectionError(String),

    #[error("upsert error: {0}")]
    UpsertError(String),

    #[error("search error: {0}")]
    SearchError(String),

    #[error("delete error: {0}")]
    DeleteError(String),

    #[error("vector store client error: {0}")]
    ClientError(String),
}

impl VectorStoreError {
    pub fn kind(&self) -> FailureKind {
        match self {
            VectorStoreError::CollectionNotFound(_) | VectorStoreError::PointNotFound { .. } => {
                FailureKind::NotFound
            }
            VectorStoreError::CollectionExists(_) => FailureKind::Conflict,
            VectorStoreError::InvalidInput(_) => FailureKind::Validation,
            VectorStoreError::ConnectionError(_)
            | VectorStoreError::CollectionError(_)
            | VectorStoreError::UpsertError(_)
            | VectorStoreError::SearchError(_)
            | VectorStoreError::DeleteError(_)
            | VectorStoreError::ClientError(_) => FailureKind::Provider,
        }
    }
}

/// Errors raised by the relational knowledge store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("database connection error: {0}")]
    ConnectionError(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("corrupt row: {0}")]
    CorruptRow(String),
}

impl StoreError {
    pub fn kind(&self) -> FailureKind {
        match self {
            StoreError::NotFound(_) => FailureKind::NotFound,
            StoreError::Conflict(_) => FailureKind::Conflict,
            StoreError::Validation(_) => FailureKind::Validation,
            StoreError::ConnectionError(_)
            | StoreError::Database(_)
            | StoreError::CorruptRow(_) => FailureKind::Provider,
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => StoreError::NotFound("row not found".to_string()),
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => {
                StoreError::ConnectionError(e.to_string())
            }
            other => StoreError::Database(other.to_string()),
        }
    }
}

/// Run-fatal sync failures. Batch-level failures never surface here; they are
/// aggregated into the sync result instead.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("failed to prepare collection \"{collection}\": {source}")]
    Collection {
        collection: String,
        #[source]
        source: VectorStoreError,
    },

    #[error("invalid sync configuration: {0}")]
    InvalidConfig(String),

    #[error(
        "knowledge base \"{base}\" was created for {expected_model} ({expected_dimension} dims), \
         but the configured embedding model is {actual_model} ({actual_dimension} dims)"
    )]
    ModelMismatch {
        base: String,
        expected_model: String,
        expected_dimension: u32,
        actual_model: String,
        actual_dimension: u32,
    },
}

impl SyncError {
    pub fn kind(&self) -> FailureKind {
        match self {
            SyncError::Store(e) => e.kind(),
            SyncError::Collection { source, .. } => source.kind(),
            SyncError::InvalidConfig(_) | SyncError::ModelMismatch { .. } => {
                FailureKind::Validation
            }
        }
    }
}

/// Errors from knowledge-base and point management.
#[derive(Debug, Error)]
pub enum KnowledgeError {
    #[error("{0}")]
    Validation(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("vector store error: {0}")]
    VectorStore(#[from] VectorStoreError),

    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),
}

impl KnowledgeError {
    pub fn kind(&self) -> FailureKind {
        match self {
            KnowledgeError::Validation(_) => FailureKind::Validation,
            KnowledgeError::Store(e) => e.kind(),
            KnowledgeError::VectorStore(e) => e.kind(),
            KnowledgeError::Embedding(e) => e.kind(),
        }
    }
}

/// Errors related to configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParseError(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),

    #[error("path error: {0}")]
    PathError(String),

    #[error("validation error: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_error_kinds() {
        assert_eq!(
            EmbeddingError::Validation("empty".into()).kind(),
            FailureKind::Validation
        );
        assert_eq!(EmbeddingError::Timeout.kind(), FailureKind::Provider);
        assert_eq!(
            EmbeddingError::ProviderError("429".into()).kind(),
            FailureKind::Provider
        );
    }

    #[test]
    fn test_vector_store_error_kinds() {
        assert_eq!(
            VectorStoreError::CollectionNotFound("kb".into()).kind(),
            FailureKind::NotFound
        );
        assert_eq!(
            VectorStoreError::CollectionExists("kb".into()).kind(),
            FailureKind::Conflict
        );
        assert_eq!(
            VectorStoreError::PointNotFound {
                collection: "kb".into(),
                id: "1".into()
            }
            .kind(),
            FailureKind::NotFound
        );
    }

    #[test]
    fn test_sync_error_kind_follows_source() {
        let err = SyncError::Collection {
            collection: "kb".into(),
            source: VectorStoreError::ConnectionError("refused".into()),
        };
        assert_eq!(err.kind(), FailureKind::Provider);

        let err = SyncError::from(StoreError::NotFound("knowledge base x not found".into()));
        assert_eq!(err.kind(), FailureKind::NotFound);
    }

    #[test]
    fn test_model_mismatch_names_both_sides() {
        let err = SyncError::ModelMismatch {
            base: "FAQ".into(),
            expected_model: "text-embedding-3-large".into(),
            expected_dimension: 3072,
            actual_model: "text-embedding-3-small".into(),
            actual_dimension: 1536,
        };
        assert_eq!(err.kind(), FailureKind::Validation);
        let message = err.to_string();
        assert!(message.contains("text-embedding-3-large (3072 dims)"));
        assert!(message.contains("text-embedding-3-small (1536 dims)"));
    }

    #[test]
    fn test_failure_kind_display() {
        assert_eq!(FailureKind::NotFound.to_string(), "not_found");
        assert_eq!(FailureKind::Conflict.to_string(), "conflict");
    }
}
