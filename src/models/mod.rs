mod config;
mod knowledge;
mod search;
mod sync;

pub use config::{
    ChunkingConfig, Config, DEFAULT_COST_PER_MILLION_TOKENS, DEFAULT_EMBEDDING_DIMENSION,
    DEFAULT_EMBEDDING_MODEL, DEFAULT_EMBEDDING_URL, DEFAULT_MAX_BATCH_ITEMS,
    DEFAULT_MAX_ITEM_TOKENS, DEFAULT_QDRANT_URL, DEFAULT_SYNC_BATCH_SIZE, EmbeddingConfig,
    LogFormat, LoggingConfig, SearchConfig, StoreConfig, StoreDriver, SyncConfig,
    VectorStoreConfig,
};
pub use knowledge::{
    KnowledgeBase, KnowledgePoint, Metadata, NewKnowledgeBase, NewKnowledgePoint, PointPage,
    PointQuery, SyncState, derive_collection_name, new_id,
};
pub use search::{OutputFormat, ScoredPoint, SearchResults};
pub use sync::{CostEstimate, ModelInfo, SyncResult};
