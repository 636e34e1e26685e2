//! Vector index abstraction layer.
//!
//! [`VectorBackend`] is the raw per-service contract; [`VectorIndexManager`]
//! layers the lifecycle rules on top (lazy collection creation, existence
//! checks that never fail, explicit not-found errors for deletes). Deletes
//! only report not-found when the service answered; an unreachable service
//! is a provider error.

mod memory;
mod qdrant;

pub use memory::InMemoryBackend;
pub use qdrant::QdrantBackend;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::VectorStoreError;
use crate::models::{ScoredPoint, VectorStoreConfig};

/// A vector to write, keyed by the owning point id.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: serde_json::Value,
}

/// A point read back from the index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredPoint {
    pub id: String,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionInfo {
    pub name: String,
    pub points_count: u64,
}

/// Operations every index service must provide.
#[async_trait]
pub trait VectorBackend: Send + Sync {
    async fn health_check(&self) -> Result<bool, VectorStoreError>;

    async fn collection_exists(&self, name: &str) -> Result<bool, VectorStoreError>;

    /// Create a cosine collection. Fails with `CollectionExists` if present.
    async fn create_collection(&self, name: &str, vector_size: u64)
    -> Result<(), VectorStoreError>;

    async fn delete_collection(&self, name: &str) -> Result<(), VectorStoreError>;

    async fn collection_info(&self, name: &str) -> Result<CollectionInfo, VectorStoreError>;

    async fn list_collections(&self) -> Result<Vec<String>, VectorStoreError>;

    /// Write points into an existing collection, overwriting by id.
    async fn upsert(&self, name: &str, points: Vec<IndexPoint>)
    -> Result<usize, VectorStoreError>;

    async fn delete_points(&self, name: &str, ids: &[String]) -> Result<usize, VectorStoreError>;

    async fn search(
        &self,
        name: &str,
        vector: Vec<f32>,
        limit: u64,
        score_threshold: Option<f32>,
    ) -> Result<Vec<ScoredPoint>, VectorStoreError>;

    async fn get_point(&self, name: &str, id: &str) -> Result<StoredPoint, VectorStoreError>;

    async fn count_points(&self, name: &str) -> Result<u64, VectorStoreError>;
}

/// Collection lifecycle and point operations over one backend.
#[derive(Clone)]
pub struct VectorIndexManager {
    backend: Arc<dyn VectorBackend>,
}

impl VectorIndexManager {
    pub fn new(backend: Arc<dyn VectorBackend>) -> Self {
        Self { backend }
    }

    /// Manager over a Qdrant backend built from configuration.
    pub fn from_config(config: &VectorStoreConfig) -> Result<Self, VectorStoreError> {
        Ok(Self::new(Arc::new(QdrantBackend::new(config)?)))
    }

    pub async fn health_check(&self) -> Result<bool, VectorStoreError> {
        self.backend.health_check().await
    }

    /// Any error while checking counts as "does not exist".
    pub async fn collection_exists(&self, name: &str) -> bool {
        match self.backend.collection_exists(name).await {
            Ok(exists) => exists,
            Err(e) => {
                tracing::warn!(collection = name, error = %e, "collection check failed");
                false
            }
        }
    }

    pub async fn create_collection(
        &self,
        name: &str,
        vector_size: u64,
    ) -> Result<(), VectorStoreError> {
        if vector_size == 0 {
            return Err(VectorStoreError::InvalidInput(
                "vector size must be at least 1".to_string(),
            ));
        }
        self.backend.create_collection(name, vector_size).await?;
        tracing::info!(collection = name, vector_size, "created collection");
        Ok(())
    }

    /// Create the collection unless it exists. A concurrent creator winning
    /// the race is not an error.
    pub async fn ensure_collection(
        &self,
        name: &str,
        vector_size: u64,
    ) -> Result<(), VectorStoreError> {
        if self.collection_exists(name).await {
            return Ok(());
        }
        match self.create_collection(name, vector_size).await {
            Ok(()) | Err(VectorStoreError::CollectionExists(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub async fn delete_collection(&self, name: &str) -> Result<(), VectorStoreError> {
        self.backend.delete_collection(name).await?;
        tracing::info!(collection = name, "deleted collection");
        Ok(())
    }

    pub async fn collection_info(&self, name: &str) -> Result<CollectionInfo, VectorStoreError> {
        self.backend.collection_info(name).await
    }

    pub async fn list_collections(&self) -> Result<Vec<String>, VectorStoreError> {
        self.backend.list_collections().await
    }

    /// Upsert points, creating the collection (sized to the first vector)
    /// when it is missing. Returns the number of points written.
    pub async fn upsert_points_batch(
        &self,
        collection: &str,
        points: Vec<IndexPoint>,
    ) -> Result<usize, VectorStoreError> {
        let Some(first) = points.first() else {
            return Ok(0);
        };

        let vector_size = first.vector.len() as u64;
        self.ensure_collection(collection, vector_size).await?;

        let written = self.backend.upsert(collection, points).await?;
        tracing::debug!(collection, written, "upserted points");
        Ok(written)
    }

    pub async fn delete_point(&self, collection: &str, id: &str) -> Result<usize, VectorStoreError> {
        self.delete_points_batch(collection, &[id.to_string()]).await
    }

    pub async fn delete_points_batch(
        &self,
        collection: &str,
        ids: &[String],
    ) -> Result<usize, VectorStoreError> {
        if !self.backend.collection_exists(collection).await? {
            return Err(VectorStoreError::CollectionNotFound(collection.to_string()));
        }
        if ids.is_empty() {
            return Ok(0);
        }
        self.backend.delete_points(collection, ids).await
    }

    /// Ranked hits, highest similarity first.
    pub async fn search_similar(
        &self,
        collection: &str,
        query_vector: Vec<f32>,
        limit: u64,
        score_threshold: Option<f32>,
    ) -> Result<Vec<ScoredPoint>, VectorStoreError> {
        self.backend
            .search(collection, query_vector, limit, score_threshold)
            .await
    }

    pub async fn get_point(&self, collection: &str, id: &str) -> Result<StoredPoint, VectorStoreError> {
        self.backend.get_point(collection, id).await
    }

    pub async fn count_points(&self, collection: &str) -> Result<u64, VectorStoreError> {
        self.backend.count_points(collection).await
    }
}

/// The payload stored alongside each vector.
pub fn point_payload(content: &str, metadata: &crate::models::Metadata) -> serde_json::Value {
    serde_json::json!({
        "page_content": content,
        "metadata": metadata,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use crate::models::Metadata;

    fn manager() -> VectorIndexManager {
        VectorIndexManager::new(Arc::new(InMemoryBackend::new()))
    }

    fn point(id: &str, vector: Vec<f32>, text: &str) -> IndexPoint {
        IndexPoint {
            id: id.to_string(),
            vector,
            payload: point_payload(text, &Metadata::new()),
        }
    }

    #[tokio::test]
    async fn test_upsert_auto_creates_collection() {
        let manager = manager();
        assert!(!manager.collection_exists("faq").await);

        let written = manager
            .upsert_points_batch("faq", vec![point("a", vec![1.0, 0.0, 0.0], "alpha")])
            .await
            .unwrap();

        assert_eq!(written, 1);
        assert!(manager.collection_exists("faq").await);
        assert_eq!(manager.count_points("faq").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_upsert_empty_is_noop() {
        let manager = manager();
        assert_eq!(manager.upsert_points_batch("faq", Vec::new()).await.unwrap(), 0);
        assert!(!manager.collection_exists("faq").await);
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let manager = manager();
        let points = vec![point("a", vec![1.0, 0.0], "one"), point("b", vec![0.0, 1.0], "two")];
        manager.upsert_points_batch("kb", points.clone()).await.unwrap();
        manager.upsert_points_batch("kb", points).await.unwrap();
        manager
            .upsert_points_batch("kb", vec![point("a", vec![1.0, 0.0], "one, edited")])
            .await
            .unwrap();

        assert_eq!(manager.count_points("kb").await.unwrap(), 2);
        let stored = manager.get_point("kb", "a").await.unwrap();
        assert_eq!(stored.payload["page_content"], "one, edited");
    }

    #[tokio::test]
    async fn test_create_collection_conflict() {
        let manager = manager();
        manager.create_collection("kb", 3).await.unwrap();
        let err = manager.create_collection("kb", 3).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::Conflict);

        manager.ensure_collection("kb", 3).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_on_missing_collection_is_not_found() {
        let manager = manager();
        let err = manager.delete_point("ghost", "a").await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::NotFound);

        let err = manager.delete_collection("ghost").await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::NotFound);
    }

    #[tokio::test]
    async fn test_delete_on_unreachable_service_is_provider_error() {
        let backend = Arc::new(InMemoryBackend::new());
        let manager = VectorIndexManager::new(backend.clone());
        manager
            .upsert_points_batch("kb", vec![point("a", vec![1.0, 0.0], "a")])
            .await
            .unwrap();

        backend.set_offline(true);
        let err = manager.delete_point("kb", "a").await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::Provider);
        assert!(!manager.collection_exists("kb").await);

        backend.set_offline(false);
        assert_eq!(manager.count_points("kb").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_points_counts() {
        let manager = manager();
        manager
            .upsert_points_batch(
                "kb",
                vec![point("a", vec![1.0, 0.0], "a"), point("b", vec![0.0, 1.0], "b")],
            )
            .await
            .unwrap();

        let deleted = manager
            .delete_points_batch("kb", &["a".to_string(), "zzz".to_string()])
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(manager.count_points("kb").await.unwrap(), 1);

        let err = manager.get_point("kb", "a").await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::NotFound);
    }

    #[tokio::test]
    async fn test_search_ranked_with_threshold() {
        let manager = manager();
        manager
            .upsert_points_batch(
                "kb",
                vec![
                    point("x", vec![1.0, 0.0], "x axis"),
                    point("y", vec![0.0, 1.0], "y axis"),
                    point("xy", vec![1.0, 1.0], "diagonal"),
                ],
            )
            .await
            .unwrap();

        let hits = manager
            .search_similar("kb", vec![1.0, 0.1], 10, None)
            .await
            .unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["x", "xy", "y"]);
        assert_eq!(hits[0].page_content(), Some("x axis"));

        let hits = manager
            .search_similar("kb", vec![1.0, 0.1], 10, Some(0.5))
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);

        let hits = manager
            .search_similar("kb", vec![1.0, 0.1], 1, None)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn test_search_missing_collection() {
        let manager = manager();
        let err = manager
            .search_similar("ghost", vec![1.0], 5, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::NotFound);
    }

    #[tokio::test]
    async fn test_collection_info_and_listing() {
        let manager = manager();
        manager.create_collection("b_kb", 2).await.unwrap();
        manager.create_collection("a_kb", 2).await.unwrap();

        let info = manager.collection_info("a_kb").await.unwrap();
        assert_eq!(info.points_count, 0);
        assert_eq!(manager.list_collections().await.unwrap(), vec!["a_kb", "b_kb"]);
        assert!(manager.health_check().await.unwrap());
    }

    #[test]
    fn test_point_payload_shape() {
        let mut metadata = Metadata::new();
        metadata.insert("source".into(), "faq".into());
        let payload = point_payload("hello", &metadata);
        assert_eq!(payload["page_content"], "hello");
        assert_eq!(payload["metadata"]["source"], "faq");
    }
}
