//! Discussion and discussion-message persistence
use crate::error::{ArgoError, Result};
use crate::memory_db::schema::*;
use crate::memory_db::SqlitePool;
use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub struct DiscussionStore {
    pool: Arc<SqlitePool>,
}

impl DiscussionStore {
    pub fn new(pool: Arc<SqlitePool>) -> Self {
        Self { pool }
    }

    fn get_conn(&self) -> Result<r2d2::PooledConnection<r2d2_sqlite::SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    pub fn create(&self, title: &str, tags: &[String]) -> Result<Discussion> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO discussions (id, title, tags, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![&id, title, join_tags(tags), now.to_rfc3339()],
        )?;

        info!("Created discussion {} ({:?})", id, title);
        Ok(Discussion {
            id,
            title: title.to_string(),
            tags: split_tags(&join_tags(tags)),
            created_at: now,
        })
    }

    pub fn get(&self, discussion_id: &str) -> Result<Option<Discussion>> {
        let conn = self.get_conn()?;
        let discussion = conn
            .query_row(
                "SELECT id, title, tags, created_at FROM discussions WHERE id = ?1",
                [discussion_id],
                |row| Ok(Self::row_to_discussion(row)),
            )
            .optional()?;
        discussion.transpose()
    }

    pub fn exists(&self, discussion_id: &str) -> Result<bool> {
        let conn = self.get_conn()?;
        let found = conn
            .query_row("SELECT 1 FROM discussions WHERE id = ?1", [discussion_id], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }

    /// All discussions, oldest first.
    pub fn list(&self) -> Result<Vec<Discussion>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, title, tags, created_at FROM discussions ORDER BY created_at ASC, id ASC",
        )?;
        let mut rows = stmt.query([])?;
        let mut discussions = Vec::new();
        while let Some(row) = rows.next()? {
            discussions.push(Self::row_to_discussion(row)?);
        }
        Ok(discussions)
    }

    pub fn append_message(
        &self,
        discussion_id: &str,
        role: DiscussionRole,
        text: &str,
    ) -> Result<DiscussionMessage> {
        let now = Utc::now();
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO discussion_messages (discussion_id, role, text, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![discussion_id, role.as_str(), text, now.to_rfc3339()],
        )?;
        let id = conn.last_insert_rowid();

        debug!("Stored {} turn #{} ({} chars) in discussion {}", role, id, text.len(), discussion_id);
        Ok(DiscussionMessage {
            id,
            discussion_id: discussion_id.to_string(),
            role,
            text: text.to_string(),
            created_at: now,
        })
    }

    /// Messages of one discussion in insertion order.
    pub fn messages(&self, discussion_id: &str) -> Result<Vec<DiscussionMessage>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, discussion_id, role, text, created_at
             FROM discussion_messages WHERE discussion_id = ?1 ORDER BY id ASC",
        )?;
        let mut rows = stmt.query([discussion_id])?;
        let mut messages = Vec::new();
        while let Some(row) = rows.next()? {
            messages.push(Self::row_to_message(row)?);
        }
        Ok(messages)
    }

    pub fn message_count(&self, discussion_id: &str) -> Result<usize> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM discussion_messages WHERE discussion_id = ?1",
            [discussion_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Delete the child messages, then the discussion row, in one transaction.
    /// Returns the number of message rows removed.
    pub fn delete(&self, discussion_id: &str) -> Result<usize> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        let exists = tx
            .query_row("SELECT 1 FROM discussions WHERE id = ?1", [discussion_id], |_| Ok(()))
            .optional()?
            .is_some();
        if !exists {
            return Err(ArgoError::not_found(format!("discussion {}", discussion_id)));
        }

        let removed_messages = tx.execute(
            "DELETE FROM discussion_messages WHERE discussion_id = ?1",
            [discussion_id],
        )?;
        tx.execute("DELETE FROM discussions WHERE id = ?1", [discussion_id])?;
        tx.commit()?;

        info!("Deleted discussion {} and {} messages", discussion_id, removed_messages);
        Ok(removed_messages)
    }

    fn parse_datetime_safe(datetime_str: &str) -> Option<DateTime<Utc>> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(datetime_str) {
            return Some(dt.with_timezone(&Utc));
        }
        if let Ok(dt) = NaiveDateTime::parse_from_str(datetime_str, "%Y-%m-%d %H:%M:%S") {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
        None
    }

    fn row_to_discussion(row: &Row) -> Result<Discussion> {
        let tags: String = row.get(2)?;
        let created_at = Self::parse_datetime_safe(&row.get::<_, String>(3)?)
            .unwrap_or_else(|| { warn!("Failed parse discussion created_at"); Utc::now() });
        Ok(Discussion {
            id: row.get(0)?,
            title: row.get(1)?,
            tags: split_tags(&tags),
            created_at,
        })
    }

    fn row_to_message(row: &Row) -> Result<DiscussionMessage> {
        let role: String = row.get(2)?;
        let created_at = Self::parse_datetime_safe(&row.get::<_, String>(4)?)
            .unwrap_or_else(|| { warn!("Failed parse message created_at"); Utc::now() });
        Ok(DiscussionMessage {
            id: row.get(0)?,
            discussion_id: row.get(1)?,
            role: role.parse()?,
            text: row.get(3)?,
            created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::memory_db::{Database, DiscussionRole};

    fn open() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("argo.db")).unwrap();
        (dir, db)
    }

    #[test]
    fn test_create_and_get() {
        let (_dir, db) = open();
        let created = db
            .discussions
            .create("Trip planning", &["travel".to_string(), "2025".to_string()])
            .unwrap();

        let fetched = db.discussions.get(&created.id).unwrap().unwrap();
        assert_eq!(fetched.title, "Trip planning");
        assert_eq!(fetched.tags, vec!["travel", "2025"]);
        assert!(db.discussions.get("missing").unwrap().is_none());
    }

    #[test]
    fn test_ids_are_unique() {
        let (_dir, db) = open();
        let a = db.discussions.create("a", &[]).unwrap();
        let b = db.discussions.create("a", &[]).unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(db.discussions.list().unwrap().len(), 2);
    }

    #[test]
    fn test_messages_keep_order() {
        let (_dir, db) = open();
        let d = db.discussions.create("chat", &[]).unwrap();
        db.discussions.append_message(&d.id, DiscussionRole::User, "hi").unwrap();
        db.discussions.append_message(&d.id, DiscussionRole::Assistant, "hello").unwrap();

        let messages = db.discussions.messages(&d.id).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, DiscussionRole::User);
        assert_eq!(messages[1].text, "hello");
        assert!(messages[0].id < messages[1].id);
    }

    #[test]
    fn test_delete_removes_children_then_parent() {
        let (_dir, db) = open();
        let d = db.discussions.create("chat", &[]).unwrap();
        let other = db.discussions.create("other", &[]).unwrap();
        for i in 0..3 {
            db.discussions.append_message(&d.id, DiscussionRole::User, &format!("m{}", i)).unwrap();
        }
        db.discussions.append_message(&other.id, DiscussionRole::User, "keep").unwrap();

        assert_eq!(db.discussions.delete(&d.id).unwrap(), 3);
        assert!(db.discussions.get(&d.id).unwrap().is_none());
        assert_eq!(db.discussions.message_count(&d.id).unwrap(), 0);
        assert_eq!(db.discussions.message_count(&other.id).unwrap(), 1);
    }

    #[test]
    fn test_delete_unknown_is_not_found() {
        let (_dir, db) = open();
        let err = db.discussions.delete("nope").unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[test]
    fn test_append_to_unknown_discussion_violates_foreign_key() {
        let (_dir, db) = open();
        assert!(db
            .discussions
            .append_message("nope", DiscussionRole::User, "orphan")
            .is_err());
    }
}
