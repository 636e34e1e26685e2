//! Qdrant vector backend.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use qdrant_client::qdrant::point_id::PointIdOptions;
use qdrant_client::qdrant::value::Kind;
use qdrant_client::qdrant::{
    CountPointsBuilder, CreateCollectionBuilder, DeletePointsBuilder, Distance,
    GetPointsBuilder, PointId, PointStruct, PointsIdsList, SearchPointsBuilder,
    UpsertPointsBuilder, Value, VectorParamsBuilder,
};
use qdrant_client::{Payload, Qdrant};

use super::{CollectionInfo, IndexPoint, StoredPoint, VectorBackend};
use crate::error::VectorStoreError;
use crate::models::{ScoredPoint, VectorStoreConfig};

pub struct QdrantBackend {
    client: Qdrant,
}

impl QdrantBackend {
    pub fn new(config: &VectorStoreConfig) -> Result<Self, VectorStoreError> {
        let mut builder =
            Qdrant::from_url(&config.url).timeout(Duration::from_secs(config.timeout_secs));

        if let Some(ref api_key) = config.api_key {
            builder = builder.api_key(api_key.clone());
        }

        let client = builder
            .build()
            .map_err(|e| VectorStoreError::ConnectionError(e.to_string()))?;

        Ok(Self { client })
    }
}

fn is_not_found(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("not found") || lower.contains("doesn't exist")
}

/// Map a client error, turning "collection missing" into `CollectionNotFound`.
fn client_err(
    name: &str,
    wrap: fn(String) -> VectorStoreError,
) -> impl FnOnce(qdrant_client::QdrantError) -> VectorStoreError {
    move |e| {
        let message = e.to_string();
        if is_not_found(&message) {
            VectorStoreError::CollectionNotFound(name.to_string())
        } else {
            wrap(message)
        }
    }
}

fn point_id_string(id: Option<PointId>) -> String {
    match id.and_then(|id| id.point_id_options) {
        Some(PointIdOptions::Uuid(uuid)) => uuid,
        Some(PointIdOptions::Num(num)) => num.to_string(),
        None => String::new(),
    }
}

fn value_to_json(value: Value) -> serde_json::Value {
    match value.kind {
        Some(Kind::NullValue(_)) | None => serde_json::Value::Null,
        Some(Kind::BoolValue(b)) => serde_json::Value::Bool(b),
        Some(Kind::IntegerValue(n)) => serde_json::Value::from(n),
        Some(Kind::DoubleValue(d)) => serde_json::Number::from_f64(d)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Some(Kind::StringValue(s)) => serde_json::Value::String(s),
        Some(Kind::ListValue(list)) => {
            serde_json::Value::Array(list.values.into_iter().map(value_to_json).collect())
        }
        Some(Kind::StructValue(s)) => payload_to_json(s.fields),
    }
}

fn payload_to_json(fields: HashMap<String, Value>) -> serde_json::Value {
    serde_json::Value::Object(
        fields
            .into_iter()
            .map(|(k, v)| (k, value_to_json(v)))
            .collect(),
    )
}

#[async_trait]
impl VectorBackend for QdrantBackend {
    async fn health_check(&self) -> Result<bool, VectorStoreError> {
        self.client
            .health_check()
            .await
            .map(|_| true)
            .map_err(|e| VectorStoreError::ConnectionError(e.to_string()))
    }

    async fn collection_exists(&self, name: &str) -> Result<bool, VectorStoreError> {
        self.client
            .collection_exists(name)
            .await
            .map_err(|e| VectorStoreError::CollectionError(e.to_string()))
    }

    async fn create_collection(
        &self,
        name: &str,
        vector_size: u64,
    ) -> Result<(), VectorStoreError> {
        if self.collection_exists(name).await? {
            return Err(VectorStoreError::CollectionExists(name.to_string()));
        }

        let create = CreateCollectionBuilder::new(name)
            .vectors_config(VectorParamsBuilder::new(vector_size, Distance::Cosine));

        self.client.create_collection(create).await.map_err(|e| {
            let message = e.to_string();
            if message.contains("already exists") {
                VectorStoreError::CollectionExists(name.to_string())
            } else {
                VectorStoreError::CollectionError(message)
            }
        })?;

        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> Result<(), VectorStoreError> {
        if !self.collection_exists(name).await? {
            return Err(VectorStoreError::CollectionNotFound(name.to_string()));
        }

        self.client
            .delete_collection(name)
            .await
            .map_err(client_err(name, VectorStoreError::DeleteError))?;
        Ok(())
    }

    async fn collection_info(&self, name: &str) -> Result<CollectionInfo, VectorStoreError> {
        let info = self
            .client
            .collection_info(name)
            .await
            .map_err(client_err(name, VectorStoreError::CollectionError))?;

        Ok(CollectionInfo {
            name: name.to_string(),
            points_count: info.result.and_then(|r| r.points_count).unwrap_or(0),
        })
    }

    async fn list_collections(&self) -> Result<Vec<String>, VectorStoreError> {
        let response = self
            .client
            .list_collections()
            .await
            .map_err(|e| VectorStoreError::CollectionError(e.to_string()))?;

        let mut names: Vec<String> = response.collections.into_iter().map(|c| c.name).collect();
        names.sort();
        Ok(names)
    }

    async fn upsert(
        &self,
        name: &str,
        points: Vec<IndexPoint>,
    ) -> Result<usize, VectorStoreError> {
        let count = points.len();
        let points = points
            .into_iter()
            .map(|point| {
                let payload = Payload::try_from(point.payload)
                    .map_err(|e| VectorStoreError::InvalidInput(e.to_string()))?;
                Ok(PointStruct::new(point.id, point.vector, payload))
            })
            .collect::<Result<Vec<_>, VectorStoreError>>()?;

        self.client
            .upsert_points(UpsertPointsBuilder::new(name, points).wait(true))
            .await
            .map_err(client_err(name, VectorStoreError::UpsertError))?;

        Ok(count)
    }

    /// Qdrant does not report how many ids matched, so the requested count
    /// is returned.
    async fn delete_points(&self, name: &str, ids: &[String]) -> Result<usize, VectorStoreError> {
        let selector = PointsIdsList {
            ids: ids.iter().cloned().map(PointId::from).collect(),
        };

        self.client
            .delete_points(DeletePointsBuilder::new(name).points(selector).wait(true))
            .await
            .map_err(client_err(name, VectorStoreError::DeleteError))?;

        Ok(ids.len())
    }

    async fn search(
        &self,
        name: &str,
        vector: Vec<f32>,
        limit: u64,
        score_threshold: Option<f32>,
    ) -> Result<Vec<ScoredPoint>, VectorStoreError> {
        let mut search = SearchPointsBuilder::new(name, vector, limit).with_payload(true);
        if let Some(threshold) = score_threshold {
            search = search.score_threshold(threshold);
        }

        let response = self
            .client
            .search_points(search)
            .await
            .map_err(client_err(name, VectorStoreError::SearchError))?;

        Ok(response
            .result
            .into_iter()
            .map(|point| ScoredPoint {
                id: point_id_string(point.id),
                score: point.score,
                payload: payload_to_json(point.payload),
            })
            .collect())
    }

    async fn get_point(&self, name: &str, id: &str) -> Result<StoredPoint, VectorStoreError> {
        let request = GetPointsBuilder::new(name, vec![PointId::from(id.to_string())])
            .with_payload(true);

        let response = self
            .client
            .get_points(request)
            .await
            .map_err(client_err(name, VectorStoreError::SearchError))?;

        response
            .result
            .into_iter()
            .next()
            .map(|point| StoredPoint {
                id: point_id_string(point.id),
                payload: payload_to_json(point.payload),
            })
            .ok_or_else(|| VectorStoreError::PointNotFound {
                collection: name.to_string(),
                id: id.to_string(),
            })
    }

    async fn count_points(&self, name: &str) -> Result<u64, VectorStoreError> {
        let response = self
            .client
            .count(CountPointsBuilder::new(name).exact(true))
            .await
            .map_err(client_err(name, VectorStoreError::SearchError))?;

        Ok(response.result.map(|r| r.count).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_to_json() {
        let payload = Payload::try_from(serde_json::json!({
            "page_content": "hello",
            "metadata": {"tags": ["a", "b"], "rank": 3, "score": 0.5, "draft": false}
        }))
        .unwrap();
        let fields: HashMap<String, Value> = payload.into();

        let json = payload_to_json(fields);
        assert_eq!(json["page_content"], "hello");
        assert_eq!(json["metadata"]["tags"], serde_json::json!(["a", "b"]));
        assert_eq!(json["metadata"]["rank"], 3);
        assert_eq!(json["metadata"]["score"], 0.5);
        assert_eq!(json["metadata"]["draft"], false);
    }

    #[test]
    fn test_point_id_string() {
        let id = PointId::from("5f0c1e0a-1111-4222-8333-444455556666".to_string());
        assert_eq!(point_id_string(Some(id)), "5f0c1e0a-1111-4222-8333-444455556666");
        assert_eq!(point_id_string(Some(PointId::from(7u64))), "7");
        assert_eq!(point_id_string(None), "");
    }

    #[test]
    fn test_not_found_detection() {
        assert!(is_not_found("Not found: Collection `kb` doesn't exist!"));
        assert!(!is_not_found("connection refused"));
    }
}
