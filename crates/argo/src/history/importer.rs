//! Bulk import of the external message store into the `messages` collection.
use super::{index_in_batches, retain_new, PendingDocument};
use crate::context_engine::AnalysisCache;
use crate::error::Result;
use crate::message_source::{parse_thread_id, MessageSource};
use crate::provider::LanguageModel;
use crate::vector_store::VectorIndex;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ImportMode {
    /// Clear the collection, then index everything.
    Full,
    /// Index only messages whose id is not yet present.
    Incremental,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ImportReport {
    pub mode: ImportMode,
    pub contacts: usize,
    /// Non-blank messages seen across all contacts.
    pub processed: usize,
    pub added: usize,
    pub skipped: usize,
    pub failed_batches: usize,
    /// Documents removed before a full import.
    pub cleared: usize,
}

pub struct HistoryImporter {
    source: Arc<dyn MessageSource>,
    index: Arc<dyn VectorIndex>,
    model: Arc<dyn LanguageModel>,
    analysis_cache: Arc<AnalysisCache>,
    batch_size: usize,
}

impl HistoryImporter {
    pub fn new(
        source: Arc<dyn MessageSource>,
        index: Arc<dyn VectorIndex>,
        model: Arc<dyn LanguageModel>,
        analysis_cache: Arc<AnalysisCache>,
        batch_size: usize,
    ) -> Self {
        Self { source, index, model, analysis_cache, batch_size }
    }

    pub async fn import(&self, mode: ImportMode) -> Result<ImportReport> {
        info!("Starting {:?} import of message history", mode);

        let cleared = match mode {
            ImportMode::Full => {
                let removed = self.index.delete_all()?;
                info!("Cleared {} messages before full import", removed);
                removed
            }
            ImportMode::Incremental => 0,
        };

        let existing: HashSet<String> = match mode {
            ImportMode::Incremental => {
                let ids = self.index.get_all_ids()?;
                info!("Found {} existing messages in index", ids.len());
                ids
            }
            ImportMode::Full => HashSet::new(),
        };

        let threads = self.source.list_threads(None)?;
        info!("Found {} contacts", threads.len());

        let mut pending = Vec::new();
        for summary in &threads {
            let thread = match parse_thread_id(&summary.contact_id)
                .and_then(|id| self.source.get_thread(id))
            {
                Ok(thread) => thread,
                Err(e) => {
                    warn!("Error processing contact {}: {}", summary.contact_id, e);
                    continue;
                }
            };
            pending.extend(thread.messages.iter().filter_map(|m| {
                PendingDocument::from_message(&summary.contact_id, &summary.display_name, m)
            }));
        }

        let processed = pending.len();
        let skipped = retain_new(&mut pending, &existing);
        if pending.is_empty() {
            info!("No new messages to import; index is up to date");
        } else {
            info!("Found {} new messages to import (skipped {})", pending.len(), skipped);
        }

        let outcome = index_in_batches(
            self.model.as_ref(),
            self.index.as_ref(),
            pending,
            self.batch_size,
            "history",
        )
        .await;

        for contact_id in &outcome.indexed_contacts {
            self.analysis_cache.invalidate(contact_id);
        }

        let report = ImportReport {
            mode,
            contacts: threads.len(),
            processed,
            added: outcome.added,
            skipped,
            failed_batches: outcome.failed_batches,
            cleared,
        };
        info!(
            "Imported {} messages from {} contacts ({} skipped, {} failed batches)",
            report.added, report.contacts, report.skipped, report.failed_batches
        );
        Ok(report)
    }
}
