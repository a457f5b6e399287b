//! Row types and schema migrations for the relational store
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ArgoError;

/// A discussion thread. Messages are not held here; they are fetched by
/// `discussion_id` from `discussion_messages`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Discussion {
    pub id: String,
    pub title: String,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DiscussionRole {
    User,
    Assistant,
}

impl DiscussionRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for DiscussionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DiscussionRole {
    type Err = ArgoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            other => Err(ArgoError::storage(format!("unknown discussion role {:?}", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscussionMessage {
    pub id: i64,
    /// Foreign key into `discussions`; used for joins only.
    pub discussion_id: String,
    pub role: DiscussionRole,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// Tags are stored comma-joined.
pub fn join_tags(tags: &[String]) -> String {
    tags.iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(",")
}

pub fn split_tags(stored: &str) -> Vec<String> {
    stored
        .split(',')
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Relational store migrations, applied in order by `MigrationManager`.
pub const MIGRATIONS: &[(i32, &str)] = &[
    (1, "
-- Discussions table
CREATE TABLE IF NOT EXISTS discussions (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    tags TEXT NOT NULL DEFAULT '',
    created_at TIMESTAMP NOT NULL
);
-- Discussion messages table
CREATE TABLE IF NOT EXISTS discussion_messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    discussion_id TEXT NOT NULL,
    role TEXT NOT NULL,
    text TEXT NOT NULL,
    created_at TIMESTAMP NOT NULL,
    FOREIGN KEY (discussion_id) REFERENCES discussions(id)
);
CREATE INDEX IF NOT EXISTS idx_discussion_messages_discussion ON discussion_messages (discussion_id);
"),
    (2, "
-- Per-contact read watermarks
CREATE TABLE IF NOT EXISTS unread_state (
    contact_id TEXT PRIMARY KEY,
    last_seen_message_id INTEGER NOT NULL
);
"),
];
