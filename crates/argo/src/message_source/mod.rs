//! Read-only access to the external message store.
//!
//! Threads are keyed by the integer row id the store assigns; `contact_id` is that id rendered
//! as a string. Implementations must report a missing/unopenable store as
//! [`ArgoError::SourceUnavailable`](crate::error::ArgoError::SourceUnavailable) and an unknown
//! thread as `NotFound`.

pub mod chat_db;

pub use chat_db::ChatDbSource;

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Seconds between the Unix epoch and 2001-01-01T00:00:00Z.
const APPLE_EPOCH_OFFSET: i64 = 978_307_200;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Incoming,
    Outgoing,
}

impl Direction {
    pub fn from_is_from_me(is_from_me: bool) -> Self {
        if is_from_me {
            Self::Outgoing
        } else {
            Self::Incoming
        }
    }

    /// Short form stored in index metadata.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Incoming => "in",
            Self::Outgoing => "out",
        }
    }

    /// Label used in normalized documents and prompt transcripts.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Incoming => "IN",
            Self::Outgoing => "OUT",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceMessage {
    /// Row id in the external store; monotonically increasing within the store.
    pub id: i64,
    pub direction: Direction,
    pub text: String,
    pub timestamp: String,
    pub sender: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Thread {
    pub contact_id: String,
    pub display_name: String,
    pub messages: Vec<SourceMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ThreadSummary {
    pub contact_id: String,
    pub display_name: String,
    pub last_message_ts: Option<String>,
    pub last_message_snippet: Option<String>,
    pub total_messages: usize,
}

pub trait MessageSource: Send + Sync {
    /// Threads with at least one text message, most recently active first.
    fn list_threads(&self, limit: Option<usize>) -> Result<Vec<ThreadSummary>>;

    /// Every message of one thread, oldest first.
    fn get_thread(&self, thread_id: i64) -> Result<Thread>;

    /// Highest text-bearing message id per thread, both directions.
    fn max_message_ids(&self) -> Result<HashMap<i64, i64>>;

    /// Most recent incoming message of `thread_id` with an id strictly greater than `after`,
    /// paired with the display name it should be reported under.
    fn latest_incoming_after(&self, thread_id: i64, after: i64) -> Result<Option<(String, SourceMessage)>>;

    /// All text messages of `thread_id` with an id strictly greater than `after`, oldest first.
    fn messages_after(&self, thread_id: i64, after: i64) -> Result<Vec<SourceMessage>>;
}

/// Convert an Apple Core Data timestamp (seconds or nanoseconds since 2001) to
/// `YYYY-MM-DDTHH:MM:SSZ`. Zero/absent values have no timestamp.
pub fn apple_to_iso(apple_time: i64) -> Option<String> {
    if apple_time == 0 {
        return None;
    }
    let seconds = if apple_time > 1_000_000_000_000 {
        apple_time / 1_000_000_000
    } else {
        apple_time
    };
    DateTime::<Utc>::from_timestamp(seconds + APPLE_EPOCH_OFFSET, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
}

/// Chat name, else handle, else `Unknown`. Empty strings count as absent.
pub fn resolve_display_name(chat_name: Option<&str>, handle: Option<&str>) -> String {
    chat_name
        .filter(|s| !s.trim().is_empty())
        .or_else(|| handle.filter(|s| !s.trim().is_empty()))
        .unwrap_or("Unknown")
        .to_string()
}

/// Parse a `contact_id` back into the store's thread id.
pub fn parse_thread_id(contact_id: &str) -> Result<i64> {
    contact_id
        .trim()
        .parse()
        .map_err(|_| crate::error::ArgoError::not_found(format!("contact {}", contact_id)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apple_seconds_and_nanoseconds_agree() {
        assert_eq!(apple_to_iso(0), None);
        assert_eq!(apple_to_iso(1).as_deref(), Some("2001-01-01T00:00:01Z"));
        // 2024-01-01T00:00:00Z
        let seconds = 1_704_067_200 - APPLE_EPOCH_OFFSET;
        assert_eq!(apple_to_iso(seconds).as_deref(), Some("2024-01-01T00:00:00Z"));
        assert_eq!(
            apple_to_iso(seconds * 1_000_000_000).as_deref(),
            Some("2024-01-01T00:00:00Z")
        );
    }

    #[test]
    fn test_display_name_fallbacks() {
        assert_eq!(resolve_display_name(Some("Family"), Some("+1555")), "Family");
        assert_eq!(resolve_display_name(Some(""), Some("+1555")), "+1555");
        assert_eq!(resolve_display_name(None, None), "Unknown");
    }

    #[test]
    fn test_direction_labels() {
        assert_eq!(Direction::from_is_from_me(true).label(), "OUT");
        assert_eq!(Direction::from_is_from_me(false).as_str(), "in");
        assert_eq!(serde_json::to_string(&Direction::Outgoing).unwrap(), "\"outgoing\"");
    }

    #[test]
    fn test_parse_thread_id() {
        assert_eq!(parse_thread_id("42").unwrap(), 42);
        assert_eq!(parse_thread_id("abc").unwrap_err().kind(), "not_found");
    }
}
