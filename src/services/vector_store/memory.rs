//! In-process vector backend with exact cosine search.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{CollectionInfo, IndexPoint, StoredPoint, VectorBackend};
use crate::error::VectorStoreError;
use crate::models::ScoredPoint;

#[derive(Debug)]
struct Collection {
    vector_size: usize,
    points: HashMap<String, (Vec<f32>, serde_json::Value)>,
}

#[derive(Debug, Default)]
pub struct InMemoryBackend {
    collections: RwLock<BTreeMap<String, Collection>>,
    offline: AtomicBool,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// While offline, every call fails with `ConnectionError` and no data changes.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<(), VectorStoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(VectorStoreError::ConnectionError(
                "in-memory backend is offline".to_string(),
            ));
        }
        Ok(())
    }
}

fn not_found(name: &str) -> VectorStoreError {
    VectorStoreError::CollectionNotFound(name.to_string())
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[async_trait]
impl VectorBackend for InMemoryBackend {
    async fn health_check(&self) -> Result<bool, VectorStoreError> {
        self.check_online()?;
        Ok(true)
    }

    async fn collection_exists(&self, name: &str) -> Result<bool, VectorStoreError> {
        self.check_online()?;
        Ok(self.collections.read().await.contains_key(name))
    }

    async fn create_collection(
        &self,
        name: &str,
        vector_size: u64,
    ) -> Result<(), VectorStoreError> {
        self.check_online()?;
        let mut collections = self.collections.write().await;
        if collections.contains_key(name) {
            return Err(VectorStoreError::CollectionExists(name.to_string()));
        }
        collections.insert(
            name.to_string(),
            Collection {
                vector_size: vector_size as usize,
                points: HashMap::new(),
            },
        );
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> Result<(), VectorStoreError> {
        self.check_online()?;
        self.collections
            .write()
            .await
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| not_found(name))
    }

    async fn collection_info(&self, name: &str) -> Result<CollectionInfo, VectorStoreError> {
        self.check_online()?;
        let collections = self.collections.read().await;
        let collection = collections.get(name).ok_or_else(|| not_found(name))?;
        Ok(CollectionInfo {
            name: name.to_string(),
            points_count: collection.points.len() as u64,
        })
    }

    async fn list_collections(&self) -> Result<Vec<String>, VectorStoreError> {
        self.check_online()?;
        Ok(self.collections.read().await.keys().cloned().collect())
    }

    async fn upsert(
        &self,
        name: &str,
        points: Vec<IndexPoint>,
    ) -> Result<usize, VectorStoreError> {
        self.check_online()?;
        let mut collections = self.collections.write().await;
        let collection = collections.get_mut(name).ok_or_else(|| not_found(name))?;

        if let Some(bad) = points
            .iter()
            .find(|p| p.vector.len() != collection.vector_size)
        {
            return Err(VectorStoreError::UpsertError(format!(
                "point {} has dimension {}, collection expects {}",
                bad.id,
                bad.vector.len(),
                collection.vector_size
            )));
        }

        let written = points.len();
        for point in points {
            collection
                .points
                .insert(point.id, (point.vector, point.payload));
        }
        Ok(written)
    }

    async fn delete_points(&self, name: &str, ids: &[String]) -> Result<usize, VectorStoreError> {
        self.check_online()?;
        let mut collections = self.collections.write().await;
        let collection = collections.get_mut(name).ok_or_else(|| not_found(name))?;
        Ok(ids
            .iter()
            .filter(|id| collection.points.remove(id.as_str()).is_some())
            .count())
    }

    async fn search(
        &self,
        name: &str,
        vector: Vec<f32>,
        limit: u64,
        score_threshold: Option<f32>,
    ) -> Result<Vec<ScoredPoint>, VectorStoreError> {
        self.check_online()?;
        let collections = self.collections.read().await;
        let collection = collections.get(name).ok_or_else(|| not_found(name))?;

        let mut hits: Vec<ScoredPoint> = collection
            .points
            .iter()
            .map(|(id, (v, payload))| ScoredPoint {
                id: id.clone(),
                score: cosine(&vector, v),
                payload: payload.clone(),
            })
            .filter(|hit| score_threshold.is_none_or(|t| hit.score >= t))
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        hits.truncate(limit as usize);
        Ok(hits)
    }

    async fn get_point(&self, name: &str, id: &str) -> Result<StoredPoint, VectorStoreError> {
        self.check_online()?;
        let collections = self.collections.read().await;
        let collection = collections.get(name).ok_or_else(|| not_found(name))?;
        collection
            .points
            .get(id)
            .map(|(_, payload)| StoredPoint {
                id: id.to_string(),
                payload: payload.clone(),
            })
            .ok_or_else(|| VectorStoreError::PointNotFound {
                collection: name.to_string(),
                id: id.to_string(),
            })
    }

    async fn count_points(&self, name: &str) -> Result<u64, VectorStoreError> {
        self.check_online()?;
        let collections = self.collections.read().await;
        let collection = collections.get(name).ok_or_else(|| not_found(name))?;
        Ok(collection.points.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine() {
        assert!((cosine(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_rejected() {
        let backend = InMemoryBackend::new();
        backend.create_collection("kb", 3).await.unwrap();

        let err = backend
            .upsert(
                "kb",
                vec![IndexPoint {
                    id: "a".into(),
                    vector: vec![1.0, 2.0],
                    payload: serde_json::Value::Null,
                }],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, VectorStoreError::UpsertError(_)));
        assert_eq!(backend.count_points("kb").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_offline_fails_without_changes() {
        let backend = InMemoryBackend::new();
        backend.create_collection("kb", 2).await.unwrap();
        backend.set_offline(true);

        let err = backend.collection_exists("kb").await.unwrap_err();
        assert!(matches!(err, VectorStoreError::ConnectionError(_)));
        assert!(backend.delete_collection("kb").await.is_err());

        backend.set_offline(false);
        assert!(backend.collection_exists("kb").await.unwrap());
    }
}
