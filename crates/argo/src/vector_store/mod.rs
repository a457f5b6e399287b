//! Vector index store: (id, embedding, document, metadata) tuples with similarity search.

pub mod sqlite_index;

pub use sqlite_index::SqliteVectorIndex;

use crate::error::{ArgoError, Result};
use crate::memory_db::open_pool;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

pub type Metadata = BTreeMap<String, String>;

pub mod keys {
    pub const CONTACT_ID: &str = "contact_id";
    pub const DISPLAY_NAME: &str = "display_name";
    pub const TS: &str = "ts";
    pub const DIRECTION: &str = "direction";
    pub const DISCUSSION_ID: &str = "discussion_id";
    pub const ROLE: &str = "role";
}

pub const MESSAGES_COLLECTION: &str = "messages";
pub const DISCUSSIONS_COLLECTION: &str = "discussions";

#[derive(Debug, Clone, PartialEq)]
pub struct IndexedDocument {
    pub id: String,
    pub document: String,
    pub embedding: Vec<f32>,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct QueryHit {
    pub id: String,
    pub document: String,
    pub metadata: Metadata,
    /// `1 - cosine similarity`; smaller is closer.
    pub distance: f32,
}

/// Single-key equality filter over document metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataFilter {
    key: String,
    value: String,
}

impl MetadataFilter {
    pub fn eq(key: impl Into<String>, value: impl Into<String>) -> Result<Self> {
        let key = key.into();
        if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(ArgoError::validation(format!("invalid metadata key {:?}", key)));
        }
        Ok(Self { key, value: value.into() })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn matches(&self, metadata: &Metadata) -> bool {
        metadata.get(&self.key).map(|v| v == &self.value).unwrap_or(false)
    }
}

pub trait VectorIndex: Send + Sync {
    /// Insert documents; an existing id is replaced. Returns the number written.
    fn add(&self, documents: Vec<IndexedDocument>) -> Result<usize>;

    /// Closest `top_k` documents, optionally restricted by an equality filter.
    fn query(
        &self,
        embedding: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<QueryHit>>;

    fn get_all_ids(&self) -> Result<HashSet<String>>;

    fn delete_where(&self, filter: &MetadataFilter) -> Result<usize>;

    fn delete_all(&self) -> Result<usize>;

    fn count(&self) -> Result<usize>;
}

const VECTOR_MIGRATIONS: &[(i32, &str)] = &[(1, "
CREATE TABLE IF NOT EXISTS vector_documents (
    collection TEXT NOT NULL,
    id TEXT NOT NULL,
    document TEXT NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}',
    embedding BLOB NOT NULL,
    dimension INTEGER NOT NULL,
    PRIMARY KEY (collection, id)
);
")];

#[derive(Debug, Clone, Serialize)]
pub struct VectorStats {
    pub messages: usize,
    pub discussions: usize,
}

/// Both collections, backed by one SQLite file.
pub struct VectorStore {
    pub messages: Arc<dyn VectorIndex>,
    pub discussions: Arc<dyn VectorIndex>,
}

impl VectorStore {
    pub fn open(path: &Path) -> Result<Self> {
        info!("Opening vector store at: {}", path.display());
        let pool = open_pool(path, VECTOR_MIGRATIONS)?;
        Ok(Self {
            messages: Arc::new(SqliteVectorIndex::new(Arc::clone(&pool), MESSAGES_COLLECTION)),
            discussions: Arc::new(SqliteVectorIndex::new(pool, DISCUSSIONS_COLLECTION)),
        })
    }

    pub fn get_stats(&self) -> Result<VectorStats> {
        Ok(VectorStats {
            messages: self.messages.count()?,
            discussions: self.discussions.count()?,
        })
    }
}

pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_rejects_injection() {
        assert!(MetadataFilter::eq("contact_id", "1").is_ok());
        assert!(MetadataFilter::eq("x') OR 1=1 --", "1").is_err());
        assert!(MetadataFilter::eq("", "1").is_err());
    }

    #[test]
    fn test_filter_matches() {
        let filter = MetadataFilter::eq(keys::ROLE, "user").unwrap();
        let mut metadata = Metadata::new();
        assert!(!filter.matches(&metadata));
        metadata.insert(keys::ROLE.into(), "user".into());
        assert!(filter.matches(&metadata));
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn test_collections_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let store = VectorStore::open(&dir.path().join("vectors.db")).unwrap();
        store
            .messages
            .add(vec![IndexedDocument {
                id: "a".into(),
                document: "doc".into(),
                embedding: vec![1.0, 0.0],
                metadata: Metadata::new(),
            }])
            .unwrap();

        let stats = store.get_stats().unwrap();
        assert_eq!(stats.messages, 1);
        assert_eq!(stats.discussions, 0);
        assert!(store.discussions.get_all_ids().unwrap().is_empty());
    }
}
