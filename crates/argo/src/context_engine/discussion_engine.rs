//! Discussion threads and chat turns.
//!
//! A chat turn persists the user message, gathers context from the discussion's own index and
//! from the imported message history, asks the model for a reply and persists it. Streaming turns
//! hand the assistant text to an [`AssistantTurnGuard`] so partial output survives errors and
//! client disconnects.

use super::context_builder::ContextBuilder;
use crate::error::{ArgoError, Result};
use crate::history::{index_in_batches, BatchOutcome, PendingDocument};
use crate::memory_db::{Database, DiscussionRole};
use crate::metrics;
use crate::provider::{ChatMessage, LanguageModel};
use crate::vector_store::{keys, IndexedDocument, Metadata, MetadataFilter, QueryHit, VectorIndex};
use async_stream::stream;
use chrono::Utc;
use futures::stream::{BoxStream, StreamExt};
use rand::RngCore;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub const MAX_MESSAGE_CHARS: usize = 8000;
const REBUILD_BATCH_SIZE: usize = 64;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DiscussionSummary {
    pub id: String,
    pub title: String,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DetailMessage {
    pub role: DiscussionRole,
    pub text: String,
}

/// Returned for unknown ids as `{title: "", tags: [], messages: []}`.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct DiscussionDetail {
    pub title: String,
    pub tags: Vec<String>,
    pub messages: Vec<DetailMessage>,
}

/// One server-sent event of a streamed chat turn.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum ChatEvent {
    Chunk {
        chunk: String,
        full_text: String,
    },
    Error {
        error: String,
        #[serde(rename = "type")]
        kind: String,
    },
    Done {
        done: bool,
    },
}

impl ChatEvent {
    fn from_error(e: &ArgoError) -> Self {
        Self::Error { error: e.to_string(), kind: e.kind().to_string() }
    }

    fn done() -> Self {
        Self::Done { done: true }
    }
}

pub type ChatEventStream = BoxStream<'static, ChatEvent>;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RebuildReport {
    pub discussions: usize,
    pub messages: usize,
    pub added: usize,
    pub failed_batches: usize,
    pub cleared: usize,
}

#[derive(Clone)]
pub struct DiscussionEngine {
    database: Arc<Database>,
    discussion_index: Arc<dyn VectorIndex>,
    history_index: Arc<dyn VectorIndex>,
    model: Arc<dyn LanguageModel>,
    builder: ContextBuilder,
}

impl DiscussionEngine {
    pub fn new(
        database: Arc<Database>,
        discussion_index: Arc<dyn VectorIndex>,
        history_index: Arc<dyn VectorIndex>,
        model: Arc<dyn LanguageModel>,
    ) -> Self {
        Self {
            database,
            discussion_index,
            history_index,
            model,
            builder: ContextBuilder::default(),
        }
    }

    pub fn with_builder(mut self, builder: ContextBuilder) -> Self {
        self.builder = builder;
        self
    }

    pub fn create(&self, title: &str, tags: &[String]) -> Result<String> {
        let title = title.trim();
        if title.is_empty() {
            return Err(ArgoError::validation("title must not be empty"));
        }
        let discussion = self.database.discussions.create(title, tags)?;
        info!("Started discussion {} ({:?})", discussion.id, discussion.title);
        Ok(discussion.id)
    }

    pub fn list(&self) -> Result<Vec<DiscussionSummary>> {
        Ok(self
            .database
            .discussions
            .list()?
            .into_iter()
            .map(|d| DiscussionSummary { id: d.id, title: d.title, tags: d.tags })
            .collect())
    }

    pub fn get(&self, discussion_id: &str) -> Result<DiscussionDetail> {
        let Some(discussion) = self.database.discussions.get(discussion_id)? else {
            return Ok(DiscussionDetail::default());
        };
        let messages = self
            .database
            .discussions
            .messages(discussion_id)?
            .into_iter()
            .map(|m| DetailMessage { role: m.role, text: m.text })
            .collect();
        Ok(DiscussionDetail { title: discussion.title, tags: discussion.tags, messages })
    }

    /// Delete the discussion and its messages, then drop its index entries. Index cleanup
    /// failures are logged only.
    pub fn delete(&self, discussion_id: &str) -> Result<usize> {
        let removed = self.database.discussions.delete(discussion_id)?;
        info!("Deleted discussion {} with {} messages", discussion_id, removed);

        match MetadataFilter::eq(keys::DISCUSSION_ID, discussion_id)
            .and_then(|filter| self.discussion_index.delete_where(&filter))
        {
            Ok(n) => info!("Deleted {} index entries for discussion {}", n, discussion_id),
            Err(e) => warn!("Index cleanup for discussion {} failed: {}", discussion_id, e),
        }
        Ok(removed)
    }

    pub async fn chat(&self, discussion_id: &str, user_text: &str) -> Result<String> {
        let messages = self.prepare_turn(discussion_id, user_text).await?;
        let reply = self.model.complete(&messages).await?;
        self.persist_assistant_turn(discussion_id, &reply).await?;
        Ok(reply)
    }

    /// Validation and the unknown-id check happen before the stream is returned; everything
    /// after that is reported in-band and always ends with a `done` event.
    pub async fn chat_stream(&self, discussion_id: &str, user_text: &str) -> Result<ChatEventStream> {
        let messages = self.prepare_turn(discussion_id, user_text).await?;
        let engine = self.clone();
        let discussion_id = discussion_id.to_string();

        Ok(Box::pin(stream! {
            let mut guard = AssistantTurnGuard::new(engine.clone(), discussion_id);
            match engine.model.complete_stream(&messages).await {
                Ok(mut chunks) => {
                    let mut failed = false;
                    while let Some(item) = chunks.next().await {
                        match item {
                            Ok(c) => {
                                guard.record(&c.full_text);
                                yield ChatEvent::Chunk { chunk: c.chunk, full_text: c.full_text };
                            }
                            Err(e) => {
                                error!("Stream error: {}", e);
                                yield ChatEvent::from_error(&e);
                                failed = true;
                                break;
                            }
                        }
                    }
                    if !failed {
                        guard.completed();
                    }
                }
                Err(e) => {
                    error!("Failed to start completion stream: {}", e);
                    yield ChatEvent::from_error(&e);
                }
            }
            guard.finish().await;
            yield ChatEvent::done();
        }))
    }

    /// Clear the discussion index and re-embed every stored discussion message.
    pub async fn rebuild_index(&self) -> Result<RebuildReport> {
        let cleared = self.discussion_index.delete_all()?;
        let discussions = self.database.discussions.list()?;

        let mut pending = Vec::new();
        for discussion in &discussions {
            for message in self.database.discussions.messages(&discussion.id)? {
                if message.text.trim().is_empty() {
                    continue;
                }
                pending.push(PendingDocument {
                    id: turn_document_id(&discussion.id),
                    document: message.text,
                    metadata: turn_metadata(&discussion.id, message.role),
                });
            }
        }
        let messages = pending.len();
        info!("Rebuilding discussion index: {} messages across {} discussions", messages, discussions.len());

        let BatchOutcome { added, failed_batches, .. } = index_in_batches(
            self.model.as_ref(),
            self.discussion_index.as_ref(),
            pending,
            REBUILD_BATCH_SIZE,
            "discussion",
        )
        .await;
        Ok(RebuildReport { discussions: discussions.len(), messages, added, failed_batches, cleared })
    }

    /// Validate, persist and index the user turn, then assemble the prompt.
    async fn prepare_turn(&self, discussion_id: &str, user_text: &str) -> Result<Vec<ChatMessage>> {
        let user_text = validate_message(user_text)?;
        if !self.database.discussions.exists(discussion_id)? {
            return Err(ArgoError::not_found(format!("discussion {}", discussion_id)));
        }
        self.database
            .discussions
            .append_message(discussion_id, DiscussionRole::User, user_text)?;

        let embedding = match self.model.embed_one(user_text).await {
            Ok(embedding) => embedding,
            Err(e) => {
                warn!("Embedding user turn failed, continuing without context: {}", e);
                return Ok(self.builder.build_messages("", user_text));
            }
        };

        let own_id = match self.index_turn_with_embedding(
            discussion_id,
            DiscussionRole::User,
            user_text,
            embedding.clone(),
        ) {
            Ok(id) => Some(id),
            Err(e) => {
                warn!("Indexing user turn for discussion {} failed: {}", discussion_id, e);
                None
            }
        };

        // Discussion context is scoped to this discussion; history context spans every contact.
        let discussion_context = self.discussion_context(discussion_id, &embedding, own_id.as_deref());
        let history_context = self.history_context(&embedding);
        let combined = self.builder.combine(&discussion_context, &history_context);
        Ok(self.builder.build_messages(&combined, user_text))
    }

    /// Turns from this discussion only, never the user turn just indexed under `exclude`.
    /// Asks for one extra hit so excluding that turn still leaves `discussion_top_k`.
    fn discussion_context(&self, discussion_id: &str, embedding: &[f32], exclude: Option<&str>) -> String {
        let top_k = self.builder.config().discussion_top_k;
        let hits = MetadataFilter::eq(keys::DISCUSSION_ID, discussion_id)
            .and_then(|filter| self.discussion_index.query(embedding, top_k + 1, Some(&filter)));
        match hits {
            Ok(hits) => {
                let hits: Vec<QueryHit> = hits
                    .into_iter()
                    .filter(|h| Some(h.id.as_str()) != exclude)
                    .take(top_k)
                    .collect();
                debug!("Discussion context: {} hits", hits.len());
                self.builder.truncate_discussion(&ContextBuilder::join_hits(&hits))
            }
            Err(e) => {
                warn!("Discussion context retrieval failed: {}", e);
                String::new()
            }
        }
    }

    fn history_context(&self, embedding: &[f32]) -> String {
        match self.history_index.query(embedding, self.builder.config().history_top_k, None) {
            Ok(hits) => {
                debug!("History context: {} hits", hits.len());
                self.builder.truncate_history(&ContextBuilder::join_hits(&hits))
            }
            Err(e) => {
                warn!("History context retrieval failed: {}", e);
                String::new()
            }
        }
    }

    /// Store the assistant turn, empty or not. Blank replies are not embedded.
    async fn persist_assistant_turn(&self, discussion_id: &str, text: &str) -> Result<()> {
        self.database
            .discussions
            .append_message(discussion_id, DiscussionRole::Assistant, text)?;
        if text.trim().is_empty() {
            debug!("Empty assistant reply for discussion {}, stored but not indexed", discussion_id);
            return Ok(());
        }
        self.index_turn(discussion_id, DiscussionRole::Assistant, text).await;
        Ok(())
    }

    async fn index_turn(&self, discussion_id: &str, role: DiscussionRole, text: &str) {
        let indexed = match self.model.embed_one(text).await {
            Ok(embedding) => self.index_turn_with_embedding(discussion_id, role, text, embedding),
            Err(e) => Err(e),
        };
        if let Err(e) = indexed {
            warn!("Indexing {} turn for discussion {} failed: {}", role, discussion_id, e);
        }
    }

    fn index_turn_with_embedding(
        &self,
        discussion_id: &str,
        role: DiscussionRole,
        text: &str,
        embedding: Vec<f32>,
    ) -> Result<String> {
        let id = turn_document_id(discussion_id);
        self.discussion_index.add(vec![IndexedDocument {
            id: id.clone(),
            document: text.to_string(),
            embedding,
            metadata: turn_metadata(discussion_id, role),
        }])?;
        metrics::inc_documents_indexed("discussion", 1);
        Ok(id)
    }
}

/// Persists the assistant text of a streamed turn exactly once: through [`finish`] on the normal
/// path, or synchronously on drop when the stream is abandoned part way.
///
/// A model answer that ran to completion is stored even when empty. A failed or abandoned
/// stream only leaves a row behind if some text was produced.
///
/// [`finish`]: AssistantTurnGuard::finish
struct AssistantTurnGuard {
    engine: DiscussionEngine,
    discussion_id: String,
    text: String,
    completed: bool,
    finished: bool,
}

impl AssistantTurnGuard {
    fn new(engine: DiscussionEngine, discussion_id: String) -> Self {
        Self { engine, discussion_id, text: String::new(), completed: false, finished: false }
    }

    fn record(&mut self, full_text: &str) {
        self.text.clear();
        self.text.push_str(full_text);
    }

    fn completed(&mut self) {
        self.completed = true;
    }

    async fn finish(mut self) {
        self.finished = true;
        let text = std::mem::take(&mut self.text);
        if !self.completed && text.trim().is_empty() {
            debug!("Stream for discussion {} produced no text, nothing stored", self.discussion_id);
            return;
        }
        if let Err(e) = self.engine.persist_assistant_turn(&self.discussion_id, &text).await {
            error!("Failed to persist assistant turn for discussion {}: {}", self.discussion_id, e);
        }
    }
}

impl Drop for AssistantTurnGuard {
    fn drop(&mut self) {
        if self.finished || self.text.trim().is_empty() {
            return;
        }
        let text = std::mem::take(&mut self.text);
        warn!(
            "Stream for discussion {} ended early, keeping {} chars of partial reply",
            self.discussion_id,
            text.len()
        );
        if let Err(e) = self.engine.database.discussions.append_message(
            &self.discussion_id,
            DiscussionRole::Assistant,
            &text,
        ) {
            error!("Failed to persist partial reply for discussion {}: {}", self.discussion_id, e);
            return;
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let engine = self.engine.clone();
            let discussion_id = self.discussion_id.clone();
            handle.spawn(async move {
                engine.index_turn(&discussion_id, DiscussionRole::Assistant, &text).await;
            });
        }
    }
}

/// Trimmed message text, 1 to 8000 characters.
pub fn validate_message(text: &str) -> Result<&str> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ArgoError::validation("message must not be empty"));
    }
    if text.chars().count() > MAX_MESSAGE_CHARS {
        return Err(ArgoError::validation(format!(
            "message exceeds {} characters",
            MAX_MESSAGE_CHARS
        )));
    }
    Ok(text)
}

fn turn_document_id(discussion_id: &str) -> String {
    let mut suffix = [0u8; 6];
    rand::thread_rng().fill_bytes(&mut suffix);
    let hex: String = suffix.iter().map(|b| format!("{:02x}", b)).collect();
    format!("{}-{}", discussion_id, hex)
}

fn turn_metadata(discussion_id: &str, role: DiscussionRole) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert(keys::DISCUSSION_ID.into(), discussion_id.to_string());
    metadata.insert(keys::ROLE.into(), role.as_str().to_string());
    metadata.insert(keys::TS.into(), Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string());
    metadata
}
