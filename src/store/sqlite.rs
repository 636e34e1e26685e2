use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};

use super::{
    KnowledgeStore, PointVersion, base_not_found, collection_conflict, like_pattern,
    point_not_found,
};
use crate::error::StoreError;
use crate::models::{
    KnowledgeBase, KnowledgePoint, Metadata, NewKnowledgeBase, NewKnowledgePoint, PointPage,
    PointQuery, new_id,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS knowledge_bases (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    collection_name TEXT NOT NULL UNIQUE,
    vector_dimension INTEGER NOT NULL,
    embedding_model TEXT NOT NULL,
    last_synced_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS knowledge_points (
    id TEXT PRIMARY KEY,
    knowledge_base_id TEXT NOT NULL REFERENCES knowledge_bases(id) ON DELETE CASCADE,
    content TEXT NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}',
    synced INTEGER NOT NULL DEFAULT 0,
    vector_point_id TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_points_base_synced
    ON knowledge_points(knowledge_base_id, synced, created_at);
"#;

const BASE_COLUMNS: &str = r#"
    b.id, b.name, b.description, b.collection_name, b.vector_dimension, b.embedding_model,
    (SELECT COUNT(*) FROM knowledge_points p WHERE p.knowledge_base_id = b.id),
    (SELECT COUNT(*) FROM knowledge_points p WHERE p.knowledge_base_id = b.id AND p.synced = 1),
    b.last_synced_at, b.created_at, b.updated_at
"#;

const POINT_COLUMNS: &str =
    "id, knowledge_base_id, content, metadata, synced, vector_point_id, created_at, updated_at";

/// Embedded store over a single SQLite connection.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::ConnectionError(e.to_string()))?;
        }
        let conn = Connection::open(path)
            .map_err(|e| StoreError::ConnectionError(e.to_string()))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StoreError::ConnectionError(e.to_string()))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Database("connection lock poisoned".to_string()))
    }

    fn query_base(
        conn: &Connection,
        clause: &str,
        key: &str,
    ) -> Result<Option<KnowledgeBase>, StoreError> {
        let sql = format!("SELECT {BASE_COLUMNS} FROM knowledge_bases b WHERE {clause}");
        let raw = conn
            .query_row(&sql, params![key], RawBase::from_row)
            .optional()?;
        raw.map(RawBase::into_base).transpose()
    }

    fn query_point(conn: &Connection, id: &str) -> Result<KnowledgePoint, StoreError> {
        let sql = format!("SELECT {POINT_COLUMNS} FROM knowledge_points WHERE id = ?1");
        conn.query_row(&sql, params![id], RawPoint::from_row)
            .optional()?
            .ok_or_else(|| point_not_found(id))?
            .into_point()
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::CorruptRow(format!("bad timestamp {value:?}: {e}")))
}

fn encode_metadata(metadata: &Metadata) -> Result<String, StoreError> {
    serde_json::to_string(metadata).map_err(|e| StoreError::Validation(e.to_string()))
}

struct RawBase {
    id: String,
    name: String,
    description: String,
    collection_name: String,
    vector_dimension: i64,
    embedding_model: String,
    total_points: i64,
    synced_points: i64,
    last_synced_at: Option<String>,
    created_at: String,
    updated_at: String,
}

impl RawBase {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            collection_name: row.get(3)?,
            vector_dimension: row.get(4)?,
            embedding_model: row.get(5)?,
            total_points: row.get(6)?,
            synced_points: row.get(7)?,
            last_synced_at: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }

    fn into_base(self) -> Result<KnowledgeBase, StoreError> {
        Ok(KnowledgeBase {
            id: self.id,
            name: self.name,
            description: self.description,
            collection_name: self.collection_name,
            vector_dimension: self.vector_dimension as u32,
            embedding_model: self.embedding_model,
            total_points: self.total_points as u64,
            synced_points: self.synced_points as u64,
            last_synced_at: self
                .last_synced_at
                .as_deref()
                .map(parse_timestamp)
                .transpose()?,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

struct RawPoint {
    id: String,
    knowledge_base_id: String,
    content: String,
    metadata: String,
    synced: bool,
    vector_point_id: Option<String>,
    created_at: String,
    updated_at: String,
}

impl RawPoint {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            knowledge_base_id: row.get(1)?,
            content: row.get(2)?,
            metadata: row.get(3)?,
            synced: row.get(4)?,
            vector_point_id: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }

    fn into_point(self) -> Result<KnowledgePoint, StoreError> {
        let metadata: Metadata = serde_json::from_str(&self.metadata)
            .map_err(|e| StoreError::CorruptRow(format!("bad metadata for {}: {e}", self.id)))?;
        Ok(KnowledgePoint {
            metadata,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
            id: self.id,
            knowledge_base_id: self.knowledge_base_id,
            content: self.content,
            synced: self.synced,
            vector_point_id: self.vector_point_id,
        })
    }
}

#[async_trait]
impl KnowledgeStore for SqliteStore {
    async fn health_check(&self) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        conn.query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(true)
    }

    async fn create_base(&self, base: &NewKnowledgeBase) -> Result<KnowledgeBase, StoreError> {
        let collection = base.resolved_collection_name();
        let conn = self.conn()?;

        if let Some(owner) = Self::query_base(&conn, "b.collection_name = ?1", &collection)? {
            return Err(collection_conflict(&collection, &owner.name));
        }

        let id = new_id();
        let now = timestamp(Utc::now());
        conn.execute(
            "INSERT INTO knowledge_bases
                (id, name, description, collection_name, vector_dimension, embedding_model,
                 created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            params![
                id,
                base.name.trim(),
                base.description,
                collection,
                i64::from(base.vector_dimension),
                base.embedding_model,
                now
            ],
        )?;

        Self::query_base(&conn, "b.id = ?1", &id)?.ok_or_else(|| base_not_found(&id))
    }

    async fn get_base(&self, id: &str) -> Result<KnowledgeBase, StoreError> {
        let conn = self.conn()?;
        Self::query_base(&conn, "b.id = ?1", id)?.ok_or_else(|| base_not_found(id))
    }

    async fn get_base_by_name(&self, name: &str) -> Result<KnowledgeBase, StoreError> {
        let conn = self.conn()?;
        Self::query_base(&conn, "b.name = ?1", name)?.ok_or_else(|| base_not_found(name))
    }

    async fn list_bases(&self) -> Result<Vec<KnowledgeBase>, StoreError> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {BASE_COLUMNS} FROM knowledge_bases b ORDER BY b.created_at DESC, b.rowid DESC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let raws = stmt
            .query_map([], RawBase::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        raws.into_iter().map(RawBase::into_base).collect()
    }

    async fn delete_base(&self, id: &str) -> Result<(), StoreError> {
        let conn = self.conn()?;
        let deleted = conn.execute("DELETE FROM knowledge_bases WHERE id = ?1", params![id])?;
        if deleted == 0 {
            return Err(base_not_found(id));
        }
        Ok(())
    }

    async fn create_points(
        &self,
        knowledge_base_id: &str,
        points: &[NewKnowledgePoint],
    ) -> Result<Vec<KnowledgePoint>, StoreError> {
        let mut conn = self.conn()?;
        if Self::query_base(&conn, "b.id = ?1", knowledge_base_id)?.is_none() {
            return Err(base_not_found(knowledge_base_id));
        }

        let tx = conn.transaction()?;
        let mut ids = Vec::with_capacity(points.len());
        {
            let mut stmt = tx.prepare(
                "INSERT INTO knowledge_points
                    (id, knowledge_base_id, content, metadata, synced, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, 0, ?5, ?5)",
            )?;
            for point in points {
                let id = new_id();
                let now = timestamp(Utc::now());
                stmt.execute(params![
                    id,
                    knowledge_base_id,
                    point.content,
                    encode_metadata(&point.metadata)?,
                    now
                ])?;
                ids.push(id);
            }
        }
        tx.execute(
            "UPDATE knowledge_bases SET updated_at = ?2 WHERE id = ?1",
            params![knowledge_base_id, timestamp(Utc::now())],
        )?;
        tx.commit()?;

        ids.iter().map(|id| Self::query_point(&conn, id)).collect()
    }

    async fn get_point(&self, id: &str) -> Result<KnowledgePoint, StoreError> {
        let conn = self.conn()?;
        Self::query_point(&conn, id)
    }

    async fn list_points(
        &self,
        knowledge_base_id: &str,
        query: &PointQuery,
    ) -> Result<PointPage, StoreError> {
        let conn = self.conn()?;
        let pattern = query
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(like_pattern);

        let filter = "knowledge_base_id = ?1
            AND (?2 IS NULL OR content LIKE ?2 ESCAPE '\\' OR metadata LIKE ?2 ESCAPE '\\')";

        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM knowledge_points WHERE {filter}"),
            params![knowledge_base_id, pattern],
            |row| row.get(0),
        )?;

        let sql = format!(
            "SELECT {POINT_COLUMNS} FROM knowledge_points WHERE {filter}
             ORDER BY created_at DESC, rowid DESC LIMIT ?3 OFFSET ?4"
        );
        let mut stmt = conn.prepare(&sql)?;
        let raws = stmt
            .query_map(
                params![
                    knowledge_base_id,
                    pattern,
                    i64::from(query.page_size.max(1)),
                    query.offset() as i64
                ],
                RawPoint::from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        let points = raws
            .into_iter()
            .map(RawPoint::into_point)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(PointPage::new(points, total as u64, query))
    }

    async fn update_point(
        &self,
        id: &str,
        content: &str,
        metadata: &Metadata,
    ) -> Result<KnowledgePoint, StoreError> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE knowledge_points
             SET content = ?2, metadata = ?3, synced = 0, updated_at = ?4
             WHERE id = ?1",
            params![id, content, encode_metadata(metadata)?, timestamp(Utc::now())],
        )?;
        if updated == 0 {
            return Err(point_not_found(id));
        }
        Self::query_point(&conn, id)
    }

    async fn delete_point(&self, id: &str) -> Result<(), StoreError> {
        let conn = self.conn()?;
        let deleted = conn.execute("DELETE FROM knowledge_points WHERE id = ?1", params![id])?;
        if deleted == 0 {
            return Err(point_not_found(id));
        }
        Ok(())
    }

    async fn pending_points(
        &self,
        knowledge_base_id: &str,
    ) -> Result<Vec<KnowledgePoint>, StoreError> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {POINT_COLUMNS} FROM knowledge_points
             WHERE knowledge_base_id = ?1 AND synced = 0
             ORDER BY created_at ASC, rowid ASC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let raws = stmt
            .query_map(params![knowledge_base_id], RawPoint::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        raws.into_iter().map(RawPoint::into_point).collect()
    }

    async fn mark_synced(&self, points: &[PointVersion]) -> Result<usize, StoreError> {
        if points.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut marked = 0;
        {
            let mut stmt = tx.prepare(
                "UPDATE knowledge_points SET synced = 1, vector_point_id = id
                 WHERE id = ?1 AND updated_at = ?2",
            )?;
            for point in points {
                marked += stmt.execute(params![point.id, timestamp(point.updated_at)])?;
            }
        }
        tx.commit()?;
        Ok(marked)
    }

    async fn stamp_synced(
        &self,
        knowledge_base_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let conn = self.conn()?;
        let stamp = timestamp(at);
        let updated = conn.execute(
            "UPDATE knowledge_bases SET last_synced_at = ?2, updated_at = ?2 WHERE id = ?1",
            params![knowledge_base_id, stamp],
        )?;
        if updated == 0 {
            return Err(base_not_found(knowledge_base_id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;

    fn store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    async fn seeded(store: &SqliteStore, n: usize) -> (KnowledgeBase, Vec<KnowledgePoint>) {
        let base = store
            .create_base(&NewKnowledgeBase::new("Preguntas Frecuentes", 3072, "m"))
            .await
            .unwrap();
        let new: Vec<NewKnowledgePoint> = (0..n)
            .map(|i| NewKnowledgePoint::new(format!("point number {i}")))
            .collect();
        let points = store.create_points(&base.id, &new).await.unwrap();
        (base, points)
    }

    #[tokio::test]
    async fn test_create_and_get_base() {
        let store = store();
        let base = store
            .create_base(
                &NewKnowledgeBase::new("Preguntas Frecuentes", 3072, "text-embedding-3-large")
                    .with_description("faq"),
            )
            .await
            .unwrap();

        assert_eq!(base.collection_name, "preguntas_frecuentes");
        assert_eq!(base.total_points, 0);
        assert!(base.last_synced_at.is_none());

        let fetched = store.get_base(&base.id).await.unwrap();
        assert_eq!(fetched, base);
        let by_name = store.get_base_by_name("Preguntas Frecuentes").await.unwrap();
        assert_eq!(by_name.id, base.id);
    }

    #[tokio::test]
    async fn test_duplicate_collection_conflicts() {
        let store = store();
        store
            .create_base(&NewKnowledgeBase::new("FAQ", 3072, "m"))
            .await
            .unwrap();
        let err = store
            .create_base(&NewKnowledgeBase::new("other", 3072, "m").with_collection("faq"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::Conflict);
    }

    #[tokio::test]
    async fn test_missing_rows_are_not_found() {
        let store = store();
        assert_eq!(store.get_base("nope").await.unwrap_err().kind(), FailureKind::NotFound);
        assert_eq!(store.get_point("nope").await.unwrap_err().kind(), FailureKind::NotFound);
        assert_eq!(store.delete_point("nope").await.unwrap_err().kind(), FailureKind::NotFound);
        let err = store
            .create_points("nope", &[NewKnowledgePoint::new("x")])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::NotFound);
    }

    #[tokio::test]
    async fn test_counters_follow_point_state() {
        let store = store();
        let (base, points) = seeded(&store, 4).await;

        let base = store.get_base(&base.id).await.unwrap();
        assert_eq!((base.total_points, base.synced_points), (4, 0));

        let versions: Vec<PointVersion> = points[..3].iter().map(PointVersion::from).collect();
        assert_eq!(store.mark_synced(&versions).await.unwrap(), 3);
        let base = store.get_base(&base.id).await.unwrap();
        assert_eq!((base.total_points, base.synced_points), (4, 3));

        store.delete_point(&points[0].id).await.unwrap();
        let base = store.get_base(&base.id).await.unwrap();
        assert_eq!((base.total_points, base.synced_points), (3, 2));
    }

    #[tokio::test]
    async fn test_pending_points_fifo() {
        let store = store();
        let (base, points) = seeded(&store, 5).await;

        store.mark_synced(&[PointVersion::from(&points[1])]).await.unwrap();
        let pending = store.pending_points(&base.id).await.unwrap();
        let ids: Vec<&str> = pending.iter().map(|p| p.id.as_str()).collect();
        let expected: Vec<&str> = [0, 2, 3, 4].iter().map(|&i| points[i].id.as_str()).collect();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn test_mark_synced_sets_vector_id() {
        let store = store();
        let (_, points) = seeded(&store, 1).await;
        assert!(points[0].vector_point_id.is_none());

        store.mark_synced(&[PointVersion::from(&points[0])]).await.unwrap();
        let point = store.get_point(&points[0].id).await.unwrap();
        assert!(point.synced);
        assert_eq!(point.vector_point_id.as_deref(), Some(point.id.as_str()));
    }

    #[tokio::test]
    async fn test_mark_synced_skips_points_edited_since_read() {
        let store = store();
        let (base, points) = seeded(&store, 2).await;
        let read = store.pending_points(&base.id).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        store
            .update_point(&points[0].id, "edited mid-run", &Metadata::new())
            .await
            .unwrap();

        let versions: Vec<PointVersion> = read.iter().map(PointVersion::from).collect();
        assert_eq!(store.mark_synced(&versions).await.unwrap(), 1);

        let pending = store.pending_points(&base.id).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, points[0].id);
        assert_eq!(pending[0].content, "edited mid-run");
    }

    #[tokio::test]
    async fn test_update_resets_synced() {
        let store = store();
        let (_, points) = seeded(&store, 1).await;
        store.mark_synced(&[PointVersion::from(&points[0])]).await.unwrap();

        let mut metadata = Metadata::new();
        metadata.insert("lang".into(), "es".into());
        let point = store
            .update_point(&points[0].id, "edited", &metadata)
            .await
            .unwrap();

        assert!(!point.synced);
        // The old vector stays in the index until the next sync overwrites it.
        assert_eq!(point.vector_point_id.as_deref(), Some(point.id.as_str()));
        assert_eq!(point.content, "edited");
        assert_eq!(point.metadata["lang"], "es");
    }

    #[tokio::test]
    async fn test_list_points_paginates_newest_first() {
        let store = store();
        let (base, points) = seeded(&store, 5).await;

        let page = store
            .list_points(
                &base.id,
                &PointQuery {
                    page: 1,
                    page_size: 2,
                    search: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.points[0].id, points[4].id);
        assert_eq!(page.points[1].id, points[3].id);

        let last = store
            .list_points(
                &base.id,
                &PointQuery {
                    page: 3,
                    page_size: 2,
                    search: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(last.points.len(), 1);
        assert_eq!(last.points[0].id, points[0].id);
    }

    #[tokio::test]
    async fn test_list_points_search() {
        let store = store();
        let base = store
            .create_base(&NewKnowledgeBase::new("kb", 3, "m"))
            .await
            .unwrap();
        let mut tagged = Metadata::new();
        tagged.insert("topic".into(), "Admissions".into());
        store
            .create_points(
                &base.id,
                &[
                    NewKnowledgePoint::new("Tuition is due in March"),
                    NewKnowledgePoint::new("Campus map").with_metadata(tagged),
                    NewKnowledgePoint::new("100% online courses"),
                ],
            )
            .await
            .unwrap();

        let search = |s: &str| PointQuery {
            search: Some(s.to_string()),
            ..Default::default()
        };

        let page = store.list_points(&base.id, &search("TUITION")).await.unwrap();
        assert_eq!(page.total, 1);

        let page = store.list_points(&base.id, &search("admissions")).await.unwrap();
        assert_eq!(page.points[0].content, "Campus map");

        let page = store.list_points(&base.id, &search("0%")).await.unwrap();
        assert_eq!(page.total, 1);
    }

    #[tokio::test]
    async fn test_delete_base_cascades() {
        let store = store();
        let (base, points) = seeded(&store, 2).await;

        store.delete_base(&base.id).await.unwrap();
        assert_eq!(
            store.get_point(&points[0].id).await.unwrap_err().kind(),
            FailureKind::NotFound
        );
        assert!(store.list_bases().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stamp_synced() {
        let store = store();
        let (base, _) = seeded(&store, 0).await;
        let at = Utc::now();

        store.stamp_synced(&base.id, at).await.unwrap();
        let base = store.get_base(&base.id).await.unwrap();
        let stamped = base.last_synced_at.unwrap();
        assert!((stamped - at).num_milliseconds().abs() < 1);
    }
}
