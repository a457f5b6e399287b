//! Message history indexing.
//!
//! Both the bulk importer and the unread tracker's sync turn source messages into
//! [`PendingDocument`]s with content-derived ids, then push them through
//! [`index_in_batches`]. Identical logical messages always map to the same id, so repeated or
//! concurrent runs only ever overwrite a document with itself.

pub mod importer;
pub mod unread_tracker;

pub use importer::{HistoryImporter, ImportMode, ImportReport};
pub use unread_tracker::{UnreadMessage, UnreadTracker};

use crate::error::Result;
use crate::message_source::{Direction, SourceMessage};
use crate::metrics;
use crate::provider::LanguageModel;
use crate::utils::TextUtils;
use crate::vector_store::{keys, IndexedDocument, Metadata, VectorIndex};
use std::collections::{BTreeSet, HashSet};
use tracing::{debug, error, info};

/// Characters of message text that feed the deterministic id.
pub const ID_PREFIX_CHARS: usize = 50;
pub const ID_HASH_HEX_CHARS: usize = 12;

/// `"[ts] OUT: text"` / `"[ts] IN: text"`
pub fn normalize_message(timestamp: &str, direction: Direction, text: &str) -> String {
    format!("[{}] {}: {}", timestamp, direction.label(), text.trim())
}

/// `contact_id::ts::<12 hex chars>`, hashing contact, timestamp and the first 50 characters of
/// the trimmed text.
pub fn document_id(contact_id: &str, timestamp: &str, text: &str) -> String {
    let prefix = TextUtils::char_prefix(text.trim(), ID_PREFIX_CHARS);
    let content = format!("{}::{}::{}", contact_id, timestamp, prefix);
    let hash = blake3::hash(content.as_bytes()).to_hex();
    format!("{}::{}::{}", contact_id, timestamp, &hash[..ID_HASH_HEX_CHARS])
}

#[derive(Debug, Clone)]
pub struct PendingDocument {
    pub id: String,
    pub document: String,
    pub metadata: Metadata,
}

impl PendingDocument {
    /// `None` for messages with no text after trimming.
    pub fn from_message(contact_id: &str, display_name: &str, message: &SourceMessage) -> Option<Self> {
        let text = message.text.trim();
        if text.is_empty() {
            return None;
        }
        let mut metadata = Metadata::new();
        metadata.insert(keys::CONTACT_ID.into(), contact_id.to_string());
        metadata.insert(keys::DISPLAY_NAME.into(), display_name.to_string());
        metadata.insert(keys::TS.into(), message.timestamp.clone());
        metadata.insert(keys::DIRECTION.into(), message.direction.as_str().to_string());
        Some(Self {
            id: document_id(contact_id, &message.timestamp, text),
            document: normalize_message(&message.timestamp, message.direction, text),
            metadata,
        })
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    pub added: usize,
    pub failed_batches: usize,
    /// Contacts with at least one document written.
    pub indexed_contacts: BTreeSet<String>,
}

/// Embed and insert `pending` in chunks of `batch_size`. A failing batch is logged and skipped.
/// `source` labels the indexed-documents counter.
pub async fn index_in_batches(
    model: &dyn LanguageModel,
    index: &dyn VectorIndex,
    pending: Vec<PendingDocument>,
    batch_size: usize,
    source: &'static str,
) -> BatchOutcome {
    let mut outcome = BatchOutcome::default();
    if pending.is_empty() {
        return outcome;
    }
    let total = pending.len();
    let batch_size = batch_size.max(1);
    info!("Embedding {} messages in batches of {}", total, batch_size);

    for (batch_no, batch) in pending.chunks(batch_size).enumerate() {
        match index_batch(model, index, batch).await {
            Ok(added) => {
                outcome.added += added;
                outcome.indexed_contacts.extend(
                    batch.iter().filter_map(|d| d.metadata.get(keys::CONTACT_ID).cloned()),
                );
                metrics::inc_documents_indexed(source, added);
                debug!("Indexed {}/{} messages", outcome.added, total);
            }
            Err(e) => {
                outcome.failed_batches += 1;
                metrics::inc_index_batch_failures();
                error!("Error processing batch {}: {}", batch_no, e);
            }
        }
    }
    outcome
}

async fn index_batch(
    model: &dyn LanguageModel,
    index: &dyn VectorIndex,
    batch: &[PendingDocument],
) -> Result<usize> {
    let texts: Vec<String> = batch.iter().map(|d| d.document.clone()).collect();
    let embeddings = model.embed(&texts).await?;
    let documents = batch
        .iter()
        .zip(embeddings)
        .map(|(doc, embedding)| IndexedDocument {
            id: doc.id.clone(),
            document: doc.document.clone(),
            embedding,
            metadata: doc.metadata.clone(),
        })
        .collect();
    index.add(documents)
}

/// Drop documents already present in `existing` and duplicates within `pending` itself.
pub(crate) fn retain_new(pending: &mut Vec<PendingDocument>, existing: &HashSet<String>) -> usize {
    let before = pending.len();
    let mut seen = HashSet::new();
    pending.retain(|d| !existing.contains(&d.id) && seen.insert(d.id.clone()));
    before - pending.len()
}
