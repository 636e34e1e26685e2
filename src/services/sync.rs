//! Reconciles a base's unsynced points into its vector collection.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;

use super::embedding::EmbeddingGenerator;
use super::vector_store::{IndexPoint, VectorIndexManager, point_payload};
use crate::error::SyncError;
use crate::models::{KnowledgePoint, SyncResult};
use crate::store::{KnowledgeStore, PointVersion};

/// Drives pending points through embedding and upsert, one batch at a time.
///
/// Batch failures (embedding or upsert) are recorded in the result and the
/// run moves on; store failures and a collection that cannot be prepared
/// end the run with an error.
#[derive(Clone)]
pub struct SyncOrchestrator {
    store: Arc<dyn KnowledgeStore>,
    generator: EmbeddingGenerator,
    index: VectorIndexManager,
    batch_size: usize,
}

impl SyncOrchestrator {
    pub fn new(
        store: Arc<dyn KnowledgeStore>,
        generator: EmbeddingGenerator,
        index: VectorIndexManager,
        batch_size: usize,
    ) -> Result<Self, SyncError> {
        if batch_size == 0 {
            return Err(SyncError::InvalidConfig(
                "batch size must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            store,
            generator,
            index,
            batch_size,
        })
    }

    #[tracing::instrument(skip(self))]
    pub async fn sync(&self, knowledge_base_id: &str) -> Result<SyncResult, SyncError> {
        let started = Instant::now();
        let base = self.store.get_base(knowledge_base_id).await?;
        let pending = self.store.pending_points(&base.id).await?;

        let mut result = SyncResult::new(&base.id);
        result.total_pending = pending.len();

        if pending.is_empty() {
            tracing::info!("nothing to sync");
            result.duration_ms = started.elapsed().as_millis() as u64;
            return Ok(result);
        }

        let info = self.generator.model_info();
        if info.dimension != base.vector_dimension || info.model != base.embedding_model {
            return Err(SyncError::ModelMismatch {
                base: base.name.clone(),
                expected_model: base.embedding_model.clone(),
                expected_dimension: base.vector_dimension,
                actual_model: info.model,
                actual_dimension: info.dimension,
            });
        }

        self.index
            .ensure_collection(&base.collection_name, u64::from(base.vector_dimension))
            .await
            .map_err(|source| SyncError::Collection {
                collection: base.collection_name.clone(),
                source,
            })?;

        tracing::info!(
            pending = pending.len(),
            batch_size = self.batch_size,
            collection = %base.collection_name,
            "starting sync"
        );

        let mut billed_tokens = 0;
        for (i, batch) in pending.chunks(self.batch_size).enumerate() {
            let number = i + 1;
            result.batches += 1;
            billed_tokens += self
                .sync_batch(&base.collection_name, number, batch, &mut result)
                .await?;
        }

        self.store.stamp_synced(&base.id, Utc::now()).await?;

        result.cost = (billed_tokens > 0).then(|| self.generator.estimate_cost(billed_tokens));
        result.duration_ms = started.elapsed().as_millis() as u64;

        tracing::info!(
            synced = result.synced_count,
            errors = result.error_count,
            batches = result.batches,
            cost = ?result.cost,
            duration_ms = result.duration_ms,
            "sync finished"
        );

        Ok(result)
    }

    /// Process one batch, returning the tokens billed for it.
    async fn sync_batch(
        &self,
        collection: &str,
        number: usize,
        batch: &[KnowledgePoint],
        result: &mut SyncResult,
    ) -> Result<usize, SyncError> {
        let (points, blank): (Vec<&KnowledgePoint>, Vec<&KnowledgePoint>) =
            batch.iter().partition(|p| !p.content.trim().is_empty());

        for point in &blank {
            result.record_failure(1, format!("batch {number}: point {} has empty content", point.id));
        }
        if points.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = points.iter().map(|p| p.content.clone()).collect();
        let embeddings = match self.generator.generate_embeddings_batch(&texts).await {
            Ok(embeddings) => embeddings,
            Err(e) => {
                tracing::warn!(batch = number, error = %e, "embedding failed");
                result.record_failure(
                    points.len(),
                    format!("batch {number}: failed to generate embeddings: {e}"),
                );
                return Ok(0);
            }
        };

        let index_points: Vec<IndexPoint> = points
            .iter()
            .zip(embeddings.vectors)
            .map(|(point, vector)| IndexPoint {
                id: point.id.clone(),
                vector,
                payload: point_payload(&point.content, &point.metadata),
            })
            .collect();

        match self.index.upsert_points_batch(collection, index_points).await {
            Ok(_) => {
                let versions: Vec<PointVersion> =
                    points.iter().map(|p| PointVersion::from(*p)).collect();
                let marked = self.store.mark_synced(&versions).await?;
                result.synced_count += marked;
                if marked < versions.len() {
                    result.record_failure(
                        versions.len() - marked,
                        format!(
                            "batch {number}: {} points changed during sync and stay pending",
                            versions.len() - marked
                        ),
                    );
                }
                tracing::debug!(batch = number, synced = marked, "batch synced");
            }
            Err(e) => {
                tracing::warn!(batch = number, error = %e, "upsert failed");
                result.record_failure(
                    points.len(),
                    format!("batch {number}: failed to upsert points: {e}"),
                );
            }
        }

        Ok(embeddings.total_tokens)
    }
}
