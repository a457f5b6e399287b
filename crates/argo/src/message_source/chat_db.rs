//! iMessage `chat.db` reader

use super::{
    apple_to_iso, resolve_display_name, Direction, MessageSource, SourceMessage, Thread,
    ThreadSummary,
};
use crate::error::{ArgoError, Result};
use crate::utils::text_utils::snippet;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

const SNIPPET_CHARS: usize = 80;

/// Opens the database read-only for every call so a replaced or re-synced export is picked up
/// without restarting.
pub struct ChatDbSource {
    path: PathBuf,
}

impl ChatDbSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> Result<Connection> {
        if !self.path.exists() {
            return Err(ArgoError::SourceUnavailable(format!(
                "{} does not exist",
                self.path.display()
            )));
        }
        Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| ArgoError::SourceUnavailable(format!("{}: {}", self.path.display(), e)))
    }

    /// Maps `(ROWID, text, date, is_from_me, handle)` with a fallback sender.
    fn row_to_message(row: &Row, fallback_sender: &str) -> rusqlite::Result<SourceMessage> {
        let is_from_me: i64 = row.get(3)?;
        let handle: Option<String> = row.get(4)?;
        Ok(SourceMessage {
            id: row.get(0)?,
            direction: Direction::from_is_from_me(is_from_me != 0),
            text: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
            timestamp: row
                .get::<_, Option<i64>>(2)?
                .and_then(apple_to_iso)
                .unwrap_or_default(),
            sender: handle
                .filter(|h| !h.is_empty())
                .unwrap_or_else(|| fallback_sender.to_string()),
        })
    }
}

impl MessageSource for ChatDbSource {
    fn list_threads(&self, limit: Option<usize>) -> Result<Vec<ThreadSummary>> {
        let conn = self.connect()?;
        // SQLite returns bare columns from the row holding MAX(m.date).
        let mut stmt = conn.prepare(
            "SELECT c.ROWID, c.display_name,
                    COALESCE(h.id, (SELECT h2.id FROM chat_handle_join chj
                                    JOIN handle h2 ON h2.ROWID = chj.handle_id
                                    WHERE chj.chat_id = c.ROWID LIMIT 1)),
                    m.text, MAX(m.date) AS last_date, COUNT(m.ROWID)
             FROM chat c
             JOIN chat_message_join cmj ON cmj.chat_id = c.ROWID
             JOIN message m ON m.ROWID = cmj.message_id
             LEFT JOIN handle h ON h.ROWID = m.handle_id
             WHERE m.text IS NOT NULL
             GROUP BY c.ROWID
             ORDER BY last_date DESC
             LIMIT ?1",
        )?;

        // SQLite treats a negative LIMIT as unbounded.
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let rows = stmt.query_map([limit], |row| {
            let chat_id: i64 = row.get(0)?;
            let chat_name: Option<String> = row.get(1)?;
            let handle: Option<String> = row.get(2)?;
            let text: Option<String> = row.get(3)?;
            let date: Option<i64> = row.get(4)?;
            let total: i64 = row.get(5)?;
            Ok(ThreadSummary {
                contact_id: chat_id.to_string(),
                display_name: resolve_display_name(chat_name.as_deref(), handle.as_deref()),
                last_message_ts: date.and_then(apple_to_iso),
                last_message_snippet: text.map(|t| snippet(&t, SNIPPET_CHARS)),
                total_messages: total as usize,
            })
        })?;

        let threads = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        debug!("Listed {} threads from {}", threads.len(), self.path.display());
        Ok(threads)
    }

    fn get_thread(&self, thread_id: i64) -> Result<Thread> {
        let conn = self.connect()?;
        let meta: Option<(Option<String>, Option<String>)> = conn
            .query_row(
                "SELECT c.display_name, h.id
                 FROM chat c
                 LEFT JOIN chat_handle_join chj ON chj.chat_id = c.ROWID
                 LEFT JOIN handle h ON h.ROWID = chj.handle_id
                 WHERE c.ROWID = ?1
                 LIMIT 1",
                [thread_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let (chat_name, handle) =
            meta.ok_or_else(|| ArgoError::not_found(format!("contact {}", thread_id)))?;
        let display_name = resolve_display_name(chat_name.as_deref(), handle.as_deref());

        let mut stmt = conn.prepare(
            "SELECT m.ROWID, m.text, m.date, m.is_from_me, h.id
             FROM chat_message_join cmj
             JOIN message m ON m.ROWID = cmj.message_id
             LEFT JOIN handle h ON h.ROWID = m.handle_id
             WHERE cmj.chat_id = ?1
             ORDER BY m.date ASC, m.ROWID ASC",
        )?;
        let messages = stmt
            .query_map([thread_id], |row| Self::row_to_message(row, &display_name))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(Thread {
            contact_id: thread_id.to_string(),
            display_name,
            messages,
        })
    }

    fn max_message_ids(&self) -> Result<HashMap<i64, i64>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT cmj.chat_id, MAX(m.ROWID)
             FROM message m
             JOIN chat_message_join cmj ON cmj.message_id = m.ROWID
             WHERE m.text IS NOT NULL
             GROUP BY cmj.chat_id",
        )?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)))?;
        Ok(rows.collect::<rusqlite::Result<HashMap<_, _>>>()?)
    }

    fn latest_incoming_after(
        &self,
        thread_id: i64,
        after: i64,
    ) -> Result<Option<(String, SourceMessage)>> {
        let conn = self.connect()?;
        let found = conn
            .query_row(
                "SELECT m.ROWID, m.text, m.date, m.is_from_me, h.id, c.display_name
                 FROM message m
                 JOIN chat_message_join cmj ON cmj.message_id = m.ROWID
                 JOIN chat c ON c.ROWID = cmj.chat_id
                 LEFT JOIN handle h ON h.ROWID = m.handle_id
                 WHERE cmj.chat_id = ?1
                   AND m.text IS NOT NULL
                   AND m.is_from_me = 0
                   AND m.ROWID > ?2
                 ORDER BY m.date DESC, m.ROWID DESC
                 LIMIT 1",
                params![thread_id, after],
                |row| {
                    let chat_name: Option<String> = row.get(5)?;
                    let handle: Option<String> = row.get(4)?;
                    let name = resolve_display_name(chat_name.as_deref(), handle.as_deref());
                    let message = Self::row_to_message(row, &name)?;
                    Ok((name, message))
                },
            )
            .optional()?;
        Ok(found)
    }

    fn messages_after(&self, thread_id: i64, after: i64) -> Result<Vec<SourceMessage>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT m.ROWID, m.text, m.date, m.is_from_me, h.id, c.display_name
             FROM message m
             JOIN chat_message_join cmj ON cmj.message_id = m.ROWID
             JOIN chat c ON c.ROWID = cmj.chat_id
             LEFT JOIN handle h ON h.ROWID = m.handle_id
             WHERE cmj.chat_id = ?1
               AND m.text IS NOT NULL
               AND m.ROWID > ?2
             ORDER BY m.date ASC, m.ROWID ASC",
        )?;
        let messages = stmt
            .query_map(params![thread_id, after], |row| {
                let chat_name: Option<String> = row.get(5)?;
                let name = resolve_display_name(chat_name.as_deref(), None);
                Self::row_to_message(row, &name)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(messages)
    }
}
