//! Relational store - SQLite-backed discussions, discussion messages and read watermarks
pub mod schema;
pub mod migration;
pub mod discussion_store;
pub mod unread_store;
pub use schema::*;
pub use migration::MigrationManager;
pub use discussion_store::DiscussionStore;
pub use unread_store::UnreadStore;
use std::path::Path;
use std::sync::Arc;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use serde::Serialize;
use tracing::info;

use crate::error::Result;

pub type SqlitePool = Pool<SqliteConnectionManager>;

/// Open (creating if needed) a pooled SQLite file and bring its schema up to date.
pub(crate) fn open_pool(db_path: &Path, migrations: &[(i32, &str)]) -> Result<Arc<SqlitePool>> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                crate::error::ArgoError::storage(format!(
                    "cannot create directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }
    }
    let manager = SqliteConnectionManager::file(db_path)
        .with_flags(
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
            | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
            | rusqlite::OpenFlags::SQLITE_OPEN_FULL_MUTEX,
        )
        // Per-connection pragmas; journal_mode is persisted in the file itself.
        .with_init(|conn| {
            conn.execute_batch(
                "PRAGMA foreign_keys = ON;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA busy_timeout = 5000;",
            )
        });
    let pool = Pool::builder().max_size(10).build(manager)?;

    {
        let mut conn = pool.get()?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        let mut migrator = MigrationManager::new(&mut conn);
        migrator.initialize_database(migrations)?;
    }
    Ok(Arc::new(pool))
}

#[derive(Debug, Clone, Serialize)]
pub struct DatabaseStats {
    pub discussions: i64,
    pub discussion_messages: i64,
    pub watermarks: i64,
}

/// The relational store. Every operation checks a connection out of the pool for its own
/// duration and commits before returning it.
pub struct Database {
    pub discussions: DiscussionStore,
    pub watermarks: UnreadStore,
    pool: Arc<SqlitePool>,
}

impl Database {
    pub fn open(db_path: &Path) -> Result<Self> {
        info!("Opening relational store at: {}", db_path.display());
        let pool = open_pool(db_path, schema::MIGRATIONS)?;
        info!("Relational store initialized successfully");
        Ok(Self {
            discussions: DiscussionStore::new(Arc::clone(&pool)),
            watermarks: UnreadStore::new(Arc::clone(&pool)),
            pool,
        })
    }

    pub fn get_stats(&self) -> Result<DatabaseStats> {
        let conn = self.pool.get()?;
        let count = |table: &str| -> Result<i64> {
            Ok(conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?)
        };
        Ok(DatabaseStats {
            discussions: count("discussions")?,
            discussion_messages: count("discussion_messages")?,
            watermarks: count("unread_state")?,
        })
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if let Ok(conn) = self.pool.get() {
            let _ = conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("argo.db");
        let db = Database::open(&path).unwrap();
        assert!(path.exists());

        let stats = db.get_stats().unwrap();
        assert_eq!(stats.discussions, 0);
        assert_eq!(stats.watermarks, 0);
    }

    #[test]
    fn test_reopen_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("argo.db");
        {
            let db = Database::open(&path).unwrap();
            db.watermarks.advance("7", 12).unwrap();
        }
        let db = Database::open(&path).unwrap();
        assert_eq!(db.watermarks.get("7").unwrap(), Some(12));
    }
}
