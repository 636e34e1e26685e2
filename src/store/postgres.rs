use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use uuid::Uuid;

use super::{
    KnowledgeStore, PointVersion, base_not_found, collection_conflict, like_pattern,
    point_not_found,
};
use crate::error::StoreError;
use crate::models::{
    KnowledgeBase, KnowledgePoint, Metadata, NewKnowledgeBase, NewKnowledgePoint, PointPage,
    PointQuery,
};

const SCHEMA: [&str; 3] = [
    r#"
    CREATE TABLE IF NOT EXISTS knowledge_bases (
        id UUID PRIMARY KEY,
        name TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        collection_name TEXT NOT NULL UNIQUE,
        vector_dimension INTEGER NOT NULL,
        embedding_model TEXT NOT NULL,
        last_synced_at TIMESTAMPTZ,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS knowledge_points (
        seq BIGSERIAL,
        id UUID PRIMARY KEY,
        knowledge_base_id UUID NOT NULL REFERENCES knowledge_bases(id) ON DELETE CASCADE,
        content TEXT NOT NULL,
        metadata JSONB NOT NULL DEFAULT '{}'::jsonb,
        synced BOOLEAN NOT NULL DEFAULT FALSE,
        vector_point_id TEXT,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_points_base_synced
        ON knowledge_points (knowledge_base_id, synced, created_at)",
];

const BASE_COLUMNS: &str = r#"
    b.id, b.name, b.description, b.collection_name, b.vector_dimension, b.embedding_model,
    (SELECT COUNT(*) FROM knowledge_points p WHERE p.knowledge_base_id = b.id) AS total_points,
    (SELECT COUNT(*) FROM knowledge_points p
        WHERE p.knowledge_base_id = b.id AND p.synced) AS synced_points,
    b.last_synced_at, b.created_at, b.updated_at
"#;

const POINT_COLUMNS: &str = "id, knowledge_base_id, content, metadata::text AS metadata, \
     synced, vector_point_id, created_at, updated_at";

/// PostgreSQL store over an sqlx connection pool.
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn connect(url: &str, pool_max: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(pool_max)
            .acquire_timeout(Duration::from_secs(30))
            .connect(url)
            .await
            .map_err(|e| StoreError::ConnectionError(e.to_string()))?;

        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    async fn ensure_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn fetch_base(&self, clause: &str, key: &str) -> Result<Option<KnowledgeBase>, StoreError> {
        let sql = format!("SELECT {BASE_COLUMNS} FROM knowledge_bases b WHERE {clause}");
        let row = sqlx::query(&sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(base_from_row).transpose()
    }
}

/// Ids that are not UUIDs cannot exist in this store.
fn parse_id(id: &str, missing: fn(&str) -> StoreError) -> Result<Uuid, StoreError> {
    Uuid::parse_str(id).map_err(|_| missing(id))
}

fn encode_metadata(metadata: &Metadata) -> Result<String, StoreError> {
    serde_json::to_string(metadata).map_err(|e| StoreError::Validation(e.to_string()))
}

fn base_from_row(row: &PgRow) -> Result<KnowledgeBase, StoreError> {
    Ok(KnowledgeBase {
        id: row.try_get::<Uuid, _>("id")?.to_string(),
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        collection_name: row.try_get("collection_name")?,
        vector_dimension: row.try_get::<i32, _>("vector_dimension")? as u32,
        embedding_model: row.try_get("embedding_model")?,
        total_points: row.try_get::<i64, _>("total_points")? as u64,
        synced_points: row.try_get::<i64, _>("synced_points")? as u64,
        last_synced_at: row.try_get("last_synced_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn point_from_row(row: &PgRow) -> Result<KnowledgePoint, StoreError> {
    let id = row.try_get::<Uuid, _>("id")?.to_string();
    let raw: String = row.try_get("metadata")?;
    let metadata: Metadata = serde_json::from_str(&raw)
        .map_err(|e| StoreError::CorruptRow(format!("bad metadata for {id}: {e}")))?;

    Ok(KnowledgePoint {
        knowledge_base_id: row.try_get::<Uuid, _>("knowledge_base_id")?.to_string(),
        content: row.try_get("content")?,
        metadata,
        synced: row.try_get("synced")?,
        vector_point_id: row.try_get("vector_point_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        id,
    })
}

#[async_trait]
impl KnowledgeStore for PostgresStore {
    async fn health_check(&self) -> Result<bool, StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| true)
            .map_err(|e| StoreError::ConnectionError(e.to_string()))
    }

    async fn create_base(&self, base: &NewKnowledgeBase) -> Result<KnowledgeBase, StoreError> {
        let collection = base.resolved_collection_name();
        if let Some(owner) = self.fetch_base("b.collection_name = $1", &collection).await? {
            return Err(collection_conflict(&collection, &owner.name));
        }

        let id = Uuid::new_v4();
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO knowledge_bases
                (id, name, description, collection_name, vector_dimension, embedding_model,
                 created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $7)",
        )
        .bind(id)
        .bind(base.name.trim())
        .bind(&base.description)
        .bind(&collection)
        .bind(base.vector_dimension as i32)
        .bind(&base.embedding_model)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                collection_conflict(&collection, base.name.trim())
            }
            other => other.into(),
        })?;

        self.get_base(&id.to_string()).await
    }

    async fn get_base(&self, id: &str) -> Result<KnowledgeBase, StoreError> {
        let uuid = parse_id(id, base_not_found)?;
        self.fetch_base("b.id = $1::uuid", &uuid.to_string())
            .await?
            .ok_or_else(|| base_not_found(id))
    }

    async fn get_base_by_name(&self, name: &str) -> Result<KnowledgeBase, StoreError> {
        self.fetch_base("b.name = $1", name)
            .await?
            .ok_or_else(|| base_not_found(name))
    }

    async fn list_bases(&self) -> Result<Vec<KnowledgeBase>, StoreError> {
        let sql = format!("SELECT {BASE_COLUMNS} FROM knowledge_bases b ORDER BY b.created_at DESC");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(base_from_row).collect()
    }

    async fn delete_base(&self, id: &str) -> Result<(), StoreError> {
        let uuid = parse_id(id, base_not_found)?;
        let result = sqlx::query("DELETE FROM knowledge_bases WHERE id = $1")
            .bind(uuid)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(base_not_found(id));
        }
        Ok(())
    }

    async fn create_points(
        &self,
        knowledge_base_id: &str,
        points: &[NewKnowledgePoint],
    ) -> Result<Vec<KnowledgePoint>, StoreError> {
        let base = self.get_base(knowledge_base_id).await?;
        let base_id = parse_id(&base.id, base_not_found)?;

        let mut tx = self.pool.begin().await?;
        let mut ids = Vec::with_capacity(points.len());
        for point in points {
            let id = Uuid::new_v4();
            sqlx::query(
                "INSERT INTO knowledge_points
                    (id, knowledge_base_id, content, metadata, synced, created_at, updated_at)
                 VALUES ($1, $2, $3, $4::jsonb, FALSE, $5, $5)",
            )
            .bind(id)
            .bind(base_id)
            .bind(&point.content)
            .bind(encode_metadata(&point.metadata)?)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;
            ids.push(id);
        }
        sqlx::query("UPDATE knowledge_bases SET updated_at = $2 WHERE id = $1")
            .bind(base_id)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        let sql = format!(
            "SELECT {POINT_COLUMNS} FROM knowledge_points WHERE id = ANY($1) ORDER BY seq ASC"
        );
        let rows = sqlx::query(&sql).bind(&ids).fetch_all(&self.pool).await?;
        rows.iter().map(point_from_row).collect()
    }

    async fn get_point(&self, id: &str) -> Result<KnowledgePoint, StoreError> {
        let uuid = parse_id(id, point_not_found)?;
        let sql = format!("SELECT {POINT_COLUMNS} FROM knowledge_points WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(uuid)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| point_not_found(id))?;
        point_from_row(&row)
    }

    async fn list_points(
        &self,
        knowledge_base_id: &str,
        query: &PointQuery,
    ) -> Result<PointPage, StoreError> {
        let base_id = parse_id(knowledge_base_id, base_not_found)?;
        let pattern = query
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(like_pattern);

        let filter = "knowledge_base_id = $1
            AND ($2::text IS NULL OR content ILIKE $2 ESCAPE '\\' OR metadata::text ILIKE $2 ESCAPE '\\')";

        let total: i64 = sqlx::query(&format!(
            "SELECT COUNT(*) AS total FROM knowledge_points WHERE {filter}"
        ))
        .bind(base_id)
        .bind(&pattern)
        .fetch_one(&self.pool)
        .await?
        .try_get("total")?;

        let sql = format!(
            "SELECT {POINT_COLUMNS} FROM knowledge_points WHERE {filter}
             ORDER BY created_at DESC, seq DESC LIMIT $3 OFFSET $4"
        );
        let rows = sqlx::query(&sql)
            .bind(base_id)
            .bind(&pattern)
            .bind(i64::from(query.page_size.max(1)))
            .bind(query.offset() as i64)
            .fetch_all(&self.pool)
            .await?;
        let points = rows
            .iter()
            .map(point_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(PointPage::new(points, total as u64, query))
    }

    async fn update_point(
        &self,
        id: &str,
        content: &str,
        metadata: &Metadata,
    ) -> Result<KnowledgePoint, StoreError> {
        let uuid = parse_id(id, point_not_found)?;
        let result = sqlx::query(
            "UPDATE knowledge_points
             SET content = $2, metadata = $3::jsonb, synced = FALSE, updated_at = $4
             WHERE id = $1",
        )
        .bind(uuid)
        .bind(content)
        .bind(encode_metadata(metadata)?)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(point_not_found(id));
        }
        self.get_point(id).await
    }

    async fn delete_point(&self, id: &str) -> Result<(), StoreError> {
        let uuid = parse_id(id, point_not_found)?;
        let result = sqlx::query("DELETE FROM knowledge_points WHERE id = $1")
            .bind(uuid)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(point_not_found(id));
        }
        Ok(())
    }

    async fn pending_points(
        &self,
        knowledge_base_id: &str,
    ) -> Result<Vec<KnowledgePoint>, StoreError> {
        let base_id = parse_id(knowledge_base_id, base_not_found)?;
        let sql = format!(
            "SELECT {POINT_COLUMNS} FROM knowledge_points
             WHERE knowledge_base_id = $1 AND NOT synced
             ORDER BY created_at ASC, seq ASC"
        );
        let rows = sqlx::query(&sql).bind(base_id).fetch_all(&self.pool).await?;
        rows.iter().map(point_from_row).collect()
    }

    async fn mark_synced(&self, points: &[PointVersion]) -> Result<usize, StoreError> {
        let (uuids, versions): (Vec<Uuid>, Vec<DateTime<Utc>>) = points
            .iter()
            .filter_map(|p| Uuid::parse_str(&p.id).ok().map(|id| (id, p.updated_at)))
            .unzip();
        if uuids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            "UPDATE knowledge_points AS p SET synced = TRUE, vector_point_id = p.id::text
             FROM UNNEST($1::uuid[], $2::timestamptz[]) AS v(id, updated_at)
             WHERE p.id = v.id AND p.updated_at = v.updated_at",
        )
        .bind(&uuids)
        .bind(&versions)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn stamp_synced(
        &self,
        knowledge_base_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let base_id = parse_id(knowledge_base_id, base_not_found)?;
        let result = sqlx::query(
            "UPDATE knowledge_bases SET last_synced_at = $2, updated_at = $2 WHERE id = $1",
        )
        .bind(base_id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(base_not_found(knowledge_base_id));
        }
        Ok(())
    }
}
