//! Knowledge base and point management on top of the store and the index.

use std::sync::Arc;
use std::time::Instant;

use super::embedding::EmbeddingGenerator;
use super::vector_store::VectorIndexManager;
use crate::error::{FailureKind, KnowledgeError, StoreError};
use crate::models::{
    KnowledgeBase, KnowledgePoint, Metadata, NewKnowledgeBase, NewKnowledgePoint, PointPage,
    PointQuery, SearchResults,
};
use crate::store::KnowledgeStore;

#[derive(Clone)]
pub struct KnowledgeService {
    store: Arc<dyn KnowledgeStore>,
    generator: EmbeddingGenerator,
    index: VectorIndexManager,
}

impl KnowledgeService {
    pub fn new(
        store: Arc<dyn KnowledgeStore>,
        generator: EmbeddingGenerator,
        index: VectorIndexManager,
    ) -> Self {
        Self {
            store,
            generator,
            index,
        }
    }

    pub fn store(&self) -> &Arc<dyn KnowledgeStore> {
        &self.store
    }

    pub fn generator(&self) -> &EmbeddingGenerator {
        &self.generator
    }

    pub fn index(&self) -> &VectorIndexManager {
        &self.index
    }

    /// Trimmed content, rejected when blank or over the per-item token limit.
    fn validate_content(&self, content: &str) -> Result<String, KnowledgeError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(KnowledgeError::Validation(
                "point content must not be empty".to_string(),
            ));
        }

        let tokens = self.generator.count_tokens(content);
        let limit = self.generator.max_item_tokens();
        if tokens > limit {
            return Err(KnowledgeError::Validation(format!(
                "point content has {tokens} tokens, limit is {limit}"
            )));
        }
        Ok(content.to_string())
    }

    /// Create a base using the configured model and dimension.
    pub async fn create_base(
        &self,
        name: &str,
        description: &str,
        collection_name: Option<&str>,
    ) -> Result<KnowledgeBase, KnowledgeError> {
        if name.trim().is_empty() {
            return Err(KnowledgeError::Validation(
                "knowledge base name must not be empty".to_string(),
            ));
        }

        let info = self.generator.model_info();
        let mut new = NewKnowledgeBase::new(name.trim(), info.dimension, info.model)
            .with_description(description.trim());
        if let Some(collection) = collection_name {
            new = new.with_collection(collection);
        }

        if new.resolved_collection_name().is_empty() {
            return Err(KnowledgeError::Validation(format!(
                "cannot derive a collection name from {name:?}; pass one explicitly"
            )));
        }

        let base = self.store.create_base(&new).await?;
        tracing::info!(id = %base.id, collection = %base.collection_name, "created knowledge base");
        Ok(base)
    }

    /// Look a base up by id, then by name.
    pub async fn resolve_base(&self, key: &str) -> Result<KnowledgeBase, KnowledgeError> {
        match self.store.get_base(key).await {
            Err(StoreError::NotFound(_)) => Ok(self.store.get_base_by_name(key).await?),
            other => Ok(other?),
        }
    }

    pub async fn list_bases(&self) -> Result<Vec<KnowledgeBase>, KnowledgeError> {
        Ok(self.store.list_bases().await?)
    }

    /// Drop the base's collection, then the base and its points. A missing
    /// collection is fine; any other index failure keeps the base.
    pub async fn delete_base(&self, key: &str) -> Result<KnowledgeBase, KnowledgeError> {
        let base = self.resolve_base(key).await?;

        match self.index.delete_collection(&base.collection_name).await {
            Ok(()) => {}
            Err(e) if e.kind() == FailureKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        self.store.delete_base(&base.id).await?;
        tracing::info!(id = %base.id, "deleted knowledge base");
        Ok(base)
    }

    pub async fn add_point(
        &self,
        base_key: &str,
        point: NewKnowledgePoint,
    ) -> Result<KnowledgePoint, KnowledgeError> {
        let mut created = self.import_points(base_key, vec![point]).await?;
        created
            .pop()
            .ok_or_else(|| KnowledgeError::Validation("no point was created".to_string()))
    }

    /// Validate every point, then insert them all or none.
    pub async fn import_points(
        &self,
        base_key: &str,
        points: Vec<NewKnowledgePoint>,
    ) -> Result<Vec<KnowledgePoint>, KnowledgeError> {
        let base = self.resolve_base(base_key).await?;

        let points = points
            .into_iter()
            .enumerate()
            .map(|(i, point)| {
                let content = self.validate_content(&point.content).map_err(|e| {
                    KnowledgeError::Validation(format!("point {}: {e}", i + 1))
                })?;
                Ok(NewKnowledgePoint {
                    content,
                    metadata: point.metadata,
                })
            })
            .collect::<Result<Vec<_>, KnowledgeError>>()?;

        if points.is_empty() {
            return Ok(Vec::new());
        }

        let created = self.store.create_points(&base.id, &points).await?;
        tracing::info!(base = %base.id, count = created.len(), "added points");
        Ok(created)
    }

    pub async fn get_point(&self, id: &str) -> Result<KnowledgePoint, KnowledgeError> {
        Ok(self.store.get_point(id).await?)
    }

    pub async fn list_points(
        &self,
        base_key: &str,
        query: &PointQuery,
    ) -> Result<PointPage, KnowledgeError> {
        let base = self.resolve_base(base_key).await?;
        Ok(self.store.list_points(&base.id, query).await?)
    }

    /// Replace content and/or metadata. The point becomes pending again; the
    /// index keeps its previous vector until the next sync.
    pub async fn update_point(
        &self,
        id: &str,
        content: Option<&str>,
        metadata: Option<Metadata>,
    ) -> Result<KnowledgePoint, KnowledgeError> {
        let current = self.store.get_point(id).await?;

        let content = match content {
            Some(content) => self.validate_content(content)?,
            None => current.content,
        };
        let metadata = metadata.unwrap_or(current.metadata);

        Ok(self.store.update_point(id, &content, &metadata).await?)
    }

    /// Remove the point's vector (if it was ever synced), then the point.
    pub async fn delete_point(&self, id: &str) -> Result<KnowledgePoint, KnowledgeError> {
        let point = self.store.get_point(id).await?;

        if let Some(ref vector_id) = point.vector_point_id {
            let base = self.store.get_base(&point.knowledge_base_id).await?;
            match self.index.delete_point(&base.collection_name, vector_id).await {
                Ok(_) => {}
                Err(e) if e.kind() == FailureKind::NotFound => {
                    tracing::debug!(point = id, error = %e, "vector already gone");
                }
                Err(e) => return Err(e.into()),
            }
        }

        self.store.delete_point(id).await?;
        Ok(point)
    }

    /// Embed `query` and rank the base's synced points against it.
    pub async fn search(
        &self,
        base_key: &str,
        query: &str,
        limit: u64,
        min_score: Option<f32>,
    ) -> Result<SearchResults, KnowledgeError> {
        let started = Instant::now();
        let base = self.resolve_base(base_key).await?;
        let embedding = self.generator.generate_embedding(query).await?;

        let results = self
            .index
            .search_similar(&base.collection_name, embedding.vector, limit, min_score)
            .await?;

        Ok(SearchResults {
            query: query.to_string(),
            knowledge_base: base.name,
            collection: base.collection_name,
            results,
            query_tokens: embedding.token_count,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }
}
