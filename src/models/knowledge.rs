use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::truncate_chars;

/// Free-form point metadata.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// A logical group of points mapped onto one vector collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeBase {
    pub id: String,
    pub name: String,
    pub description: String,
    pub collection_name: String,
    pub vector_dimension: u32,
    pub embedding_model: String,
    /// Derived from point rows; never written directly.
    pub total_points: u64,
    /// Derived from point rows; never written directly.
    pub synced_points: u64,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl KnowledgeBase {
    pub fn pending_points(&self) -> u64 {
        self.total_points.saturating_sub(self.synced_points)
    }

    pub fn sync_state(&self) -> SyncState {
        if self.total_points == 0 {
            SyncState::Empty
        } else if self.synced_points >= self.total_points {
            SyncState::Synced
        } else if self.synced_points > 0 {
            SyncState::Partial
        } else {
            SyncState::Pending
        }
    }
}

/// Display state of a base, derived from its counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    Empty,
    Synced,
    Partial,
    Pending,
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncState::Empty => write!(f, "empty"),
            SyncState::Synced => write!(f, "synced"),
            SyncState::Partial => write!(f, "partial"),
            SyncState::Pending => write!(f, "pending"),
        }
    }
}

/// One text + metadata unit, the unit of embedding and indexing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgePoint {
    /// Also used as the vector point id.
    pub id: String,
    pub knowledge_base_id: String,
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
    pub synced: bool,
    pub vector_point_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl KnowledgePoint {
    pub fn preview(&self, max_chars: usize) -> String {
        truncate_chars(&self.content, max_chars)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewKnowledgeBase {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub collection_name: Option<String>,
    pub vector_dimension: u32,
    pub embedding_model: String,
}

impl NewKnowledgeBase {
    pub fn new(
        name: impl Into<String>,
        vector_dimension: u32,
        embedding_model: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            collection_name: None,
            vector_dimension,
            embedding_model: embedding_model.into(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_collection(mut self, collection_name: impl Into<String>) -> Self {
        self.collection_name = Some(collection_name.into());
        self
    }

    /// The explicit collection name, or one derived from the base name.
    pub fn resolved_collection_name(&self) -> String {
        self.collection_name
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| derive_collection_name(&self.name))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewKnowledgePoint {
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl NewKnowledgePoint {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Listing request for the points of one base.
#[derive(Debug, Clone)]
pub struct PointQuery {
    pub page: u32,
    pub page_size: u32,
    pub search: Option<String>,
}

impl Default for PointQuery {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: 50,
            search: None,
        }
    }
}

impl PointQuery {
    pub fn offset(&self) -> u64 {
        u64::from(self.page.max(1) - 1) * u64::from(self.page_size)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointPage {
    pub points: Vec<KnowledgePoint>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
    pub total_pages: u64,
}

impl PointPage {
    pub fn new(points: Vec<KnowledgePoint>, total: u64, query: &PointQuery) -> Self {
        let page_size = query.page_size.max(1);
        Self {
            points,
            total,
            page: query.page.max(1),
            page_size,
            total_pages: total.div_ceil(u64::from(page_size)),
        }
    }
}

/// Collection name derived from a base name: lowercase, spaces to `_`,
/// accented vowels folded, anything else non-alphanumeric dropped.
pub fn derive_collection_name(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .chars()
        .map(|c| match c {
            ' ' => '_',
            'á' | 'à' | 'ä' | 'â' => 'a',
            'é' | 'è' | 'ë' | 'ê' => 'e',
            'í' | 'ì' | 'ï' | 'î' => 'i',
            'ó' | 'ò' | 'ö' | 'ô' => 'o',
            'ú' | 'ù' | 'ü' | 'û' => 'u',
            'ñ' => 'n',
            other => other,
        })
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect()
}

pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base(total: u64, synced: u64) -> KnowledgeBase {
        let now = Utc::now();
        KnowledgeBase {
            id: new_id(),
            name: "kb".into(),
            description: String::new(),
            collection_name: "kb".into(),
            vector_dimension: 3072,
            embedding_model: "text-embedding-3-large".into(),
            total_points: total,
            synced_points: synced,
            last_synced_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_sync_state() {
        assert_eq!(base(0, 0).sync_state(), SyncState::Empty);
        assert_eq!(base(5, 5).sync_state(), SyncState::Synced);
        assert_eq!(base(5, 2).sync_state(), SyncState::Partial);
        assert_eq!(base(5, 0).sync_state(), SyncState::Pending);
        assert_eq!(base(5, 2).pending_points(), 3);
    }

    #[test]
    fn test_derive_collection_name() {
        assert_eq!(derive_collection_name("Preguntas Frecuentes"), "preguntas_frecuentes");
        assert_eq!(derive_collection_name("Política de Admisión"), "politica_de_admision");
        assert_eq!(derive_collection_name("  FAQ v2.0! "), "faq_v20");
    }

    #[test]
    fn test_resolved_collection_name_prefers_explicit() {
        let new = NewKnowledgeBase::new("My Base", 3072, "m").with_collection("custom_col");
        assert_eq!(new.resolved_collection_name(), "custom_col");

        let derived = NewKnowledgeBase::new("My Base", 3072, "m").with_collection("   ");
        assert_eq!(derived.resolved_collection_name(), "my_base");
    }

    #[test]
    fn test_point_page_math() {
        let query = PointQuery {
            page: 3,
            page_size: 20,
            search: None,
        };
        assert_eq!(query.offset(), 40);

        let page = PointPage::new(Vec::new(), 41, &query);
        assert_eq!(page.total_pages, 3);
    }

    #[test]
    fn test_preview_truncates_on_chars() {
        let now = Utc::now();
        let point = KnowledgePoint {
            id: new_id(),
            knowledge_base_id: new_id(),
            content: "ñandú ".repeat(10),
            metadata: Metadata::new(),
            synced: false,
            vector_point_id: None,
            created_at: now,
            updated_at: now,
        };
        assert_eq!(point.preview(5), "ñandú...");
    }
}
