//! Unread detection against per-contact watermarks, plus the index sync it drives.
//!
//! A contact with no watermark row is unseen; the first observation stores its current maximum
//! message id, so only messages arriving afterwards can be unread. Watermarks only move through
//! [`UnreadTracker::mark_as_read`] (and the bootstrap/reset paths); indexing new messages never
//! advances them.

use super::{index_in_batches, retain_new, PendingDocument};
use crate::context_engine::AnalysisCache;
use crate::error::{ArgoError, Result};
use crate::memory_db::Database;
use crate::message_source::MessageSource;
use crate::metrics;
use crate::provider::LanguageModel;
use crate::vector_store::VectorIndex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UnreadMessage {
    pub contact_id: String,
    pub display_name: String,
    pub message: String,
    pub timestamp: String,
    pub message_id: i64,
}

pub struct UnreadTracker {
    source: Arc<dyn MessageSource>,
    database: Arc<Database>,
    index: Arc<dyn VectorIndex>,
    model: Arc<dyn LanguageModel>,
    analysis_cache: Arc<AnalysisCache>,
    batch_size: usize,
}

impl UnreadTracker {
    pub fn new(
        source: Arc<dyn MessageSource>,
        database: Arc<Database>,
        index: Arc<dyn VectorIndex>,
        model: Arc<dyn LanguageModel>,
        analysis_cache: Arc<AnalysisCache>,
        batch_size: usize,
    ) -> Self {
        Self { source, database, index, model, analysis_cache, batch_size }
    }

    /// Latest unread incoming message per contact, newest first.
    ///
    /// With no watermarks at all this is a first run: every contact is initialized to its
    /// current maximum and nothing is reported. Otherwise new messages are synced into the
    /// index after the unread set is computed; a sync failure is logged only.
    pub async fn get_unread(&self) -> Result<Vec<UnreadMessage>> {
        let maxima = self.source.max_message_ids()?;
        let state = self.database.watermarks.load_all()?;

        if state.is_empty() {
            info!("Unread state is empty, initializing with current messages");
            self.initialize(&maxima)?;
            return Ok(Vec::new());
        }

        let mut unread = Vec::new();
        for (&thread_id, &max_id) in &maxima {
            let contact_id = thread_id.to_string();
            let last_seen = match state.get(&contact_id) {
                Some(&last_seen) => last_seen,
                None => {
                    self.database.watermarks.advance(&contact_id, max_id)?;
                    debug!("Initialized new contact {} at message {}", contact_id, max_id);
                    continue;
                }
            };
            if max_id <= last_seen {
                continue;
            }
            if let Some((display_name, message)) =
                self.source.latest_incoming_after(thread_id, last_seen)?
            {
                unread.push(UnreadMessage {
                    contact_id,
                    display_name,
                    message: message.text,
                    timestamp: message.timestamp,
                    message_id: message.id,
                });
            }
        }
        unread.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        if let Err(e) = self.sync_new_messages().await {
            warn!("Failed to sync new messages to index: {}", e);
        }

        Ok(unread)
    }

    fn initialize(&self, maxima: &HashMap<i64, i64>) -> Result<usize> {
        let entries: Vec<(String, i64)> =
            maxima.iter().map(|(thread, max)| (thread.to_string(), *max)).collect();
        let written = self
            .database
            .watermarks
            .advance_many(entries.iter().map(|(c, m)| (c.as_str(), *m)))?;
        info!("Initialized unread state for {} contacts", written);
        Ok(written)
    }

    /// Raise the contact's watermark to `message_id`; lower ids are ignored.
    pub fn mark_as_read(&self, contact_id: &str, message_id: i64) -> Result<()> {
        let contact_id = contact_id.trim();
        if contact_id.is_empty() {
            return Err(ArgoError::validation("contact_id must not be empty"));
        }
        if message_id < 0 {
            return Err(ArgoError::validation("message_id must not be negative"));
        }
        self.database.watermarks.advance(contact_id, message_id)?;
        debug!("Marked contact {} as read up to message {}", contact_id, message_id);
        Ok(())
    }

    /// Drop every watermark and re-initialize all contacts to their current maximum.
    pub fn reset(&self) -> Result<HashMap<String, i64>> {
        info!("Resetting unread state");
        self.database.watermarks.clear()?;
        let maxima = self.source.max_message_ids()?;
        self.initialize(&maxima)?;
        self.database.watermarks.load_all()
    }

    /// Index every message (both directions) newer than each contact's watermark that is not
    /// already present. Returns the number of documents added.
    pub async fn sync_new_messages(&self) -> Result<usize> {
        let state = self.database.watermarks.load_all()?;
        if state.is_empty() {
            debug!("No unread state found, skipping index sync");
            return Ok(0);
        }

        let maxima = self.source.max_message_ids()?;
        let candidates: Vec<(i64, String, i64)> = maxima
            .iter()
            .filter_map(|(&thread_id, &max_id)| {
                let contact_id = thread_id.to_string();
                let last_seen = *state.get(&contact_id)?;
                (max_id > last_seen).then_some((thread_id, contact_id, last_seen))
            })
            .collect();
        if candidates.is_empty() {
            return Ok(0);
        }

        let names: HashMap<String, String> = self
            .source
            .list_threads(None)?
            .into_iter()
            .map(|t| (t.contact_id, t.display_name))
            .collect();

        let mut pending = Vec::new();
        for (thread_id, contact_id, last_seen) in &candidates {
            let display_name = names.get(contact_id).map(String::as_str).unwrap_or("Unknown");
            let messages = self.source.messages_after(*thread_id, *last_seen)?;
            pending.extend(
                messages
                    .iter()
                    .filter_map(|m| PendingDocument::from_message(contact_id, display_name, m)),
            );
        }

        let existing = self.index.get_all_ids()?;
        retain_new(&mut pending, &existing);
        if pending.is_empty() {
            debug!("No new messages to sync");
            return Ok(0);
        }

        info!("Syncing {} new messages to index", pending.len());
        let outcome =
            index_in_batches(self.model.as_ref(), self.index.as_ref(), pending, self.batch_size, "history")
                .await;
        for contact_id in &outcome.indexed_contacts {
            self.analysis_cache.invalidate(contact_id);
        }
        if outcome.added > 0 {
            info!("Synced {} new messages to index", outcome.added);
        }
        Ok(outcome.added)
    }

    /// Run [`get_unread`](Self::get_unread) every `interval` until the task is aborted. A failed
    /// tick is logged and the next one runs as scheduled.
    pub fn spawn_poller(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        info!("Starting unread poller every {:?}", interval);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match self.get_unread().await {
                    Ok(unread) => {
                        metrics::inc_unread_poll_tick("ok");
                        if !unread.is_empty() {
                            debug!("{} contacts with unread messages", unread.len());
                        }
                    }
                    Err(ArgoError::SourceUnavailable(reason)) => {
                        metrics::inc_unread_poll_tick("source_unavailable");
                        debug!("Unread check skipped: {}", reason);
                    }
                    Err(e) => {
                        metrics::inc_unread_poll_tick("error");
                        warn!("Unread check failed: {}", e);
                    }
                }
            }
        })
    }
}
