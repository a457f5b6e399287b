//! SQLite-backed vector collection with exact cosine search
use super::{cosine_similarity, IndexedDocument, Metadata, MetadataFilter, QueryHit, VectorIndex};
use crate::error::Result;
use crate::memory_db::SqlitePool;
use rusqlite::params;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

pub struct SqliteVectorIndex {
    pool: Arc<SqlitePool>,
    collection: &'static str,
}

impl SqliteVectorIndex {
    pub fn new(pool: Arc<SqlitePool>, collection: &'static str) -> Self {
        Self { pool, collection }
    }

    pub fn collection(&self) -> &str {
        self.collection
    }

    fn get_conn(&self) -> Result<r2d2::PooledConnection<r2d2_sqlite::SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }
}

impl VectorIndex for SqliteVectorIndex {
    fn add(&self, documents: Vec<IndexedDocument>) -> Result<usize> {
        if documents.is_empty() {
            return Ok(0);
        }
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO vector_documents
                     (collection, id, document, metadata, embedding, dimension)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for doc in &documents {
                let metadata = serde_json::to_string(&doc.metadata)?;
                let embedding = bincode::serialize(&doc.embedding)?;
                stmt.execute(params![
                    self.collection,
                    &doc.id,
                    &doc.document,
                    metadata,
                    embedding,
                    doc.embedding.len() as i64,
                ])?;
            }
        }
        tx.commit()?;
        debug!("Added {} documents to collection {}", documents.len(), self.collection);
        Ok(documents.len())
    }

    fn query(
        &self,
        embedding: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<QueryHit>> {
        if top_k == 0 || embedding.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.get_conn()?;
        let dimension = embedding.len() as i64;

        let mut hits = Vec::new();
        let mut push_row = |row: &rusqlite::Row| -> Result<()> {
            let blob: Vec<u8> = row.get(3)?;
            let stored: Vec<f32> = bincode::deserialize(&blob)?;
            let metadata: Metadata = serde_json::from_str(&row.get::<_, String>(2)?)?;
            hits.push(QueryHit {
                id: row.get(0)?,
                document: row.get(1)?,
                metadata,
                distance: 1.0 - cosine_similarity(embedding, &stored),
            });
            Ok(())
        };

        match filter {
            Some(filter) => {
                let mut stmt = conn.prepare(
                    "SELECT id, document, metadata, embedding FROM vector_documents
                     WHERE collection = ?1 AND dimension = ?2 AND json_extract(metadata, ?3) = ?4",
                )?;
                let path = format!("$.{}", filter.key());
                let mut rows = stmt.query(params![self.collection, dimension, path, filter.value()])?;
                while let Some(row) = rows.next()? {
                    push_row(row)?;
                }
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT id, document, metadata, embedding FROM vector_documents
                     WHERE collection = ?1 AND dimension = ?2",
                )?;
                let mut rows = stmt.query(params![self.collection, dimension])?;
                while let Some(row) = rows.next()? {
                    push_row(row)?;
                }
            }
        }

        hits.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap_or(Ordering::Equal));
        hits.truncate(top_k);
        Ok(hits)
    }

    fn get_all_ids(&self) -> Result<HashSet<String>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare("SELECT id FROM vector_documents WHERE collection = ?1")?;
        let ids = stmt
            .query_map([self.collection], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<HashSet<_>>>()?;
        Ok(ids)
    }

    fn delete_where(&self, filter: &MetadataFilter) -> Result<usize> {
        let conn = self.get_conn()?;
        let removed = conn.execute(
            "DELETE FROM vector_documents WHERE collection = ?1 AND json_extract(metadata, ?2) = ?3",
            params![self.collection, format!("$.{}", filter.key()), filter.value()],
        )?;
        info!(
            "Deleted {} documents from {} where {} = {}",
            removed,
            self.collection,
            filter.key(),
            filter.value()
        );
        Ok(removed)
    }

    fn delete_all(&self) -> Result<usize> {
        let conn = self.get_conn()?;
        let removed = conn.execute("DELETE FROM vector_documents WHERE collection = ?1", [self.collection])?;
        info!("Cleared {} documents from collection {}", removed, self.collection);
        Ok(removed)
    }

    fn count(&self) -> Result<usize> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM vector_documents WHERE collection = ?1",
            [self.collection],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector_store::{keys, VectorStore};

    fn doc(id: &str, embedding: Vec<f32>, contact: &str) -> IndexedDocument {
        let mut metadata = Metadata::new();
        metadata.insert(keys::CONTACT_ID.into(), contact.into());
        IndexedDocument {
            id: id.into(),
            document: format!("document {}", id),
            embedding,
            metadata,
        }
    }

    fn open() -> (tempfile::TempDir, VectorStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = VectorStore::open(&dir.path().join("vectors.db")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_query_ranks_by_cosine_distance() {
        let (_dir, store) = open();
        store
            .messages
            .add(vec![
                doc("far", vec![0.0, 1.0], "1"),
                doc("near", vec![1.0, 0.1], "1"),
                doc("exact", vec![1.0, 0.0], "2"),
            ])
            .unwrap();

        let hits = store.messages.query(&[1.0, 0.0], 2, None).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "exact");
        assert!(hits[0].distance.abs() < 1e-6);
        assert_eq!(hits[1].id, "near");
    }

    #[test]
    fn test_query_with_filter() {
        let (_dir, store) = open();
        store
            .messages
            .add(vec![doc("a", vec![1.0, 0.0], "1"), doc("b", vec![1.0, 0.0], "2")])
            .unwrap();

        let filter = MetadataFilter::eq(keys::CONTACT_ID, "2").unwrap();
        let hits = store.messages.query(&[1.0, 0.0], 10, Some(&filter)).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "b");
        assert_eq!(hits[0].metadata[keys::CONTACT_ID], "2");
    }

    #[test]
    fn test_re_adding_replaces() {
        let (_dir, store) = open();
        store.messages.add(vec![doc("a", vec![1.0, 0.0], "1")]).unwrap();
        store.messages.add(vec![doc("a", vec![0.0, 1.0], "1")]).unwrap();
        assert_eq!(store.messages.count().unwrap(), 1);

        let hits = store.messages.query(&[0.0, 1.0], 1, None).unwrap();
        assert!(hits[0].distance.abs() < 1e-6);
    }

    #[test]
    fn test_delete_where_and_delete_all() {
        let (_dir, store) = open();
        store
            .messages
            .add(vec![
                doc("a", vec![1.0], "1"),
                doc("b", vec![1.0], "1"),
                doc("c", vec![1.0], "2"),
            ])
            .unwrap();

        let filter = MetadataFilter::eq(keys::CONTACT_ID, "1").unwrap();
        assert_eq!(store.messages.delete_where(&filter).unwrap(), 2);
        assert_eq!(store.messages.get_all_ids().unwrap(), HashSet::from(["c".to_string()]));
        assert_eq!(store.messages.delete_all().unwrap(), 1);
        assert_eq!(store.messages.count().unwrap(), 0);
    }

    #[test]
    fn test_mismatched_dimensions_are_ignored() {
        let (_dir, store) = open();
        store
            .messages
            .add(vec![doc("small", vec![1.0, 0.0], "1"), doc("big", vec![1.0, 0.0, 0.0], "1")])
            .unwrap();
        let hits = store.messages.query(&[1.0, 0.0, 0.0], 5, None).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "big");
    }
}
