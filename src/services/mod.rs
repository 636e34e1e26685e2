mod embedding;
mod knowledge;
mod sync;
mod tokenizer;
pub mod vector_store;

#[cfg(test)]
mod testing;

pub use embedding::{
    Embedding, EmbeddingBatch, EmbeddingGenerator, EmbeddingProvider, OpenAiEmbeddingClient,
};
pub use knowledge::KnowledgeService;
pub use sync::SyncOrchestrator;
pub use tokenizer::{Tokenizer, estimate_tokens};
pub use vector_store::{
    CollectionInfo, InMemoryBackend, IndexPoint, QdrantBackend, StoredPoint, VectorBackend,
    VectorIndexManager,
};
