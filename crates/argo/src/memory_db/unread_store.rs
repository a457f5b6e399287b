//! Per-contact read watermarks

use crate::error::{ArgoError, Result};
use crate::memory_db::SqlitePool;
use rusqlite::{params, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Upsert that only ever raises the stored value.
const ADVANCE_SQL: &str = "INSERT INTO unread_state (contact_id, last_seen_message_id) VALUES (?1, ?2)
     ON CONFLICT(contact_id) DO UPDATE SET
         last_seen_message_id = MAX(last_seen_message_id, excluded.last_seen_message_id)";

pub struct UnreadStore {
    pool: Arc<SqlitePool>,
}

impl UnreadStore {
    pub fn new(pool: Arc<SqlitePool>) -> Self {
        Self { pool }
    }

    /// Raise the watermark of `contact_id` to `message_id`, creating the row if needed.
    /// A lower id than the stored one leaves the row untouched.
    pub fn advance(&self, contact_id: &str, message_id: i64) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute(ADVANCE_SQL, params![contact_id, message_id])?;
        debug!("Watermark for contact {} advanced to >= {}", contact_id, message_id);
        Ok(())
    }

    /// Apply many watermark advances in one transaction.
    pub fn advance_many<'a, I>(&self, entries: I) -> Result<usize>
    where
        I: IntoIterator<Item = (&'a str, i64)>,
    {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        let mut written = 0;
        {
            let mut stmt = tx.prepare(ADVANCE_SQL)?;
            for (contact_id, message_id) in entries {
                stmt.execute(params![contact_id, message_id])?;
                written += 1;
            }
        }
        tx.commit()?;
        Ok(written)
    }

    pub fn get(&self, contact_id: &str) -> Result<Option<i64>> {
        let conn = self.pool.get()?;
        Ok(conn
            .query_row(
                "SELECT last_seen_message_id FROM unread_state WHERE contact_id = ?1",
                [contact_id],
                |row| row.get(0),
            )
            .optional()?)
    }

    pub fn load_all(&self) -> Result<HashMap<String, i64>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare("SELECT contact_id, last_seen_message_id FROM unread_state")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;

        let mut state = HashMap::new();
        for row in rows {
            let (contact_id, last_seen) = row?;
            state.insert(contact_id, last_seen);
        }
        Ok(state)
    }

    pub fn count(&self) -> Result<usize> {
        let conn = self.pool.get()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM unread_state", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Remove every watermark row. Returns how many were removed.
    pub fn clear(&self) -> Result<usize> {
        let conn = self.pool.get()?;
        let removed = conn.execute("DELETE FROM unread_state", [])?;
        info!("Cleared {} unread state records", removed);
        Ok(removed)
    }

    /// One-time import of the JSON watermark file (`{"<contact_id>": <message_id>, ...}`) used
    /// before watermarks lived in SQLite. Only runs while the table is empty; the file is renamed
    /// to `<name>.backup` afterwards. Returns the number of imported contacts.
    pub fn import_legacy_json(&self, path: &Path) -> Result<usize> {
        if !path.exists() {
            return Ok(0);
        }

        let raw = std::fs::read_to_string(path)
            .map_err(|e| ArgoError::storage(format!("cannot read {}: {}", path.display(), e)))?;
        let legacy: HashMap<String, i64> = serde_json::from_str(&raw)?;
        if legacy.is_empty() {
            return Ok(0);
        }

        if self.count()? > 0 {
            info!("Watermarks already present, skipping legacy import from {}", path.display());
            return Ok(0);
        }

        let imported = self.advance_many(legacy.iter().map(|(k, v)| (k.as_str(), *v)))?;
        info!("Migrated unread state for {} contacts from {}", imported, path.display());

        let mut backup = path.as_os_str().to_owned();
        backup.push(".backup");
        let backup = std::path::PathBuf::from(backup);
        if backup.exists() {
            warn!("Backup {} already exists, leaving {} in place", backup.display(), path.display());
        } else if let Err(e) = std::fs::rename(path, &backup) {
            warn!("Failed to rename {} to {}: {}", path.display(), backup.display(), e);
        }

        Ok(imported)
    }
}
