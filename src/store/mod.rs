//! Relational store of knowledge bases and their points.
//!
//! Base counters are never stored: every backend derives `total_points` and
//! `synced_points` from the point rows when a base is read, so they cannot
//! drift from point state.

mod postgres;
mod sqlite;

pub use postgres::PostgresStore;
pub use sqlite::SqliteStore;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::models::{
    KnowledgeBase, KnowledgePoint, Metadata, NewKnowledgeBase, NewKnowledgePoint, PointPage,
    PointQuery, StoreConfig, StoreDriver,
};

/// A point as it was when read for embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct PointVersion {
    pub id: String,
    pub updated_at: DateTime<Utc>,
}

impl From<&KnowledgePoint> for PointVersion {
    fn from(point: &KnowledgePoint) -> Self {
        Self {
            id: point.id.clone(),
            updated_at: point.updated_at,
        }
    }
}

#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    async fn health_check(&self) -> Result<bool, StoreError>;

    /// Insert a base. A collection name already owned by another base is a
    /// `Conflict`.
    async fn create_base(&self, base: &NewKnowledgeBase) -> Result<KnowledgeBase, StoreError>;

    async fn get_base(&self, id: &str) -> Result<KnowledgeBase, StoreError>;

    async fn get_base_by_name(&self, name: &str) -> Result<KnowledgeBase, StoreError>;

    async fn list_bases(&self) -> Result<Vec<KnowledgeBase>, StoreError>;

    /// Delete a base and, by cascade, all of its points.
    async fn delete_base(&self, id: &str) -> Result<(), StoreError>;

    /// Insert unsynced points in order, all or nothing.
    async fn create_points(
        &self,
        knowledge_base_id: &str,
        points: &[NewKnowledgePoint],
    ) -> Result<Vec<KnowledgePoint>, StoreError>;

    async fn get_point(&self, id: &str) -> Result<KnowledgePoint, StoreError>;

    /// One page of a base's points, newest first, optionally filtered by a
    /// case-insensitive substring of content or metadata.
    async fn list_points(
        &self,
        knowledge_base_id: &str,
        query: &PointQuery,
    ) -> Result<PointPage, StoreError>;

    /// Replace content and metadata. Always resets the point to unsynced;
    /// `vector_point_id` is kept because the old vector is still indexed.
    async fn update_point(
        &self,
        id: &str,
        content: &str,
        metadata: &Metadata,
    ) -> Result<KnowledgePoint, StoreError>;

    async fn delete_point(&self, id: &str) -> Result<(), StoreError>;

    /// Unsynced points of a base, oldest first.
    async fn pending_points(&self, knowledge_base_id: &str)
    -> Result<Vec<KnowledgePoint>, StoreError>;

    /// Mark the given point versions as synced, recording each id as its
    /// vector id. A point edited since its version was read stays unsynced.
    async fn mark_synced(&self, points: &[PointVersion]) -> Result<usize, StoreError>;

    async fn stamp_synced(
        &self,
        knowledge_base_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}

/// Open the configured backend, creating its schema if needed.
pub async fn create_store(config: &StoreConfig) -> Result<Arc<dyn KnowledgeStore>, StoreError> {
    match config.driver {
        StoreDriver::Sqlite => {
            let path = config
                .sqlite_path()
                .map_err(|e| StoreError::ConnectionError(e.to_string()))?;
            Ok(Arc::new(SqliteStore::open(&path)?))
        }
        StoreDriver::PostgreSQL => {
            let url = config.url.as_deref().ok_or_else(|| {
                StoreError::ConnectionError("store.url is required for postgres".to_string())
            })?;
            Ok(Arc::new(PostgresStore::connect(url, config.pool_max).await?))
        }
    }
}

pub(crate) fn base_not_found(id: &str) -> StoreError {
    StoreError::NotFound(format!("knowledge base {id} not found"))
}

pub(crate) fn point_not_found(id: &str) -> StoreError {
    StoreError::NotFound(format!("point {id} not found"))
}

pub(crate) fn collection_conflict(collection: &str, owner: &str) -> StoreError {
    StoreError::Conflict(format!(
        "collection \"{collection}\" is already used by knowledge base \"{owner}\""
    ))
}

/// `LIKE` pattern matching `needle` anywhere, with wildcards escaped by `\`.
pub(crate) fn like_pattern(needle: &str) -> String {
    let escaped = needle
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("faq"), "%faq%");
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
    }

    #[tokio::test]
    async fn test_create_store_sqlite_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig {
            url: Some(dir.path().join("kb.db").display().to_string()),
            ..Default::default()
        };

        let store = create_store(&config).await.unwrap();
        assert!(store.health_check().await.unwrap());
        assert!(store.list_bases().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_store_postgres_requires_url() {
        let config = StoreConfig {
            driver: StoreDriver::PostgreSQL,
            ..Default::default()
        };
        let err = create_store(&config).await.err().unwrap();
        assert!(matches!(err, StoreError::ConnectionError(_)));
    }
}
