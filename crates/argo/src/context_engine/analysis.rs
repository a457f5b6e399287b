//! Per-contact analysis: tone, durable facts and a narrative summary, cached until invalidated.
use crate::error::{ArgoError, Result};
use crate::message_source::{parse_thread_id, MessageSource, SourceMessage};
use crate::provider::{ChatMessage, LanguageModel};
use crate::vector_store::{keys, MetadataFilter, VectorIndex};
use dashmap::DashMap;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

const ANALYZE_SYSTEM: &str =
    "You analyze conversations, infer tone, extract durable facts, and summarize. Output JSON only.";
const RETRIEVAL_TOP_K: usize = 12;
const QUERY_MESSAGES: usize = 3;
pub const MAX_ANALYSIS_MESSAGES: usize = 1000;

lazy_static! {
    static ref FENCED_JSON: Regex = Regex::new(r"(?s)```(?:json)?\s*(\{.*\})\s*```").unwrap();
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisResult {
    pub contact_id: String,
    pub display_name: String,
    pub tone_summary: String,
    pub facts: Vec<String>,
    pub history_summary: String,
}

#[derive(Debug, Default, Deserialize)]
struct AnalysisPayload {
    #[serde(default)]
    tone_summary: String,
    #[serde(default)]
    facts: Vec<String>,
    #[serde(default)]
    history_summary: String,
}

/// Process-lifetime cache of analysis results keyed by contact id.
#[derive(Debug, Default)]
pub struct AnalysisCache {
    entries: DashMap<String, Arc<AnalysisResult>>,
}

impl AnalysisCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, contact_id: &str) -> Option<Arc<AnalysisResult>> {
        self.entries.get(contact_id).map(|e| Arc::clone(e.value()))
    }

    pub fn insert(&self, result: AnalysisResult) -> Arc<AnalysisResult> {
        let result = Arc::new(result);
        self.entries.insert(result.contact_id.clone(), Arc::clone(&result));
        result
    }

    pub fn invalidate(&self, contact_id: &str) -> bool {
        let removed = self.entries.remove(contact_id).is_some();
        if removed {
            debug!("Invalidated cached analysis for contact {}", contact_id);
        }
        removed
    }

    /// Returns the number of evicted entries.
    pub fn clear(&self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub struct AnalysisEngine {
    source: Arc<dyn MessageSource>,
    index: Arc<dyn VectorIndex>,
    model: Arc<dyn LanguageModel>,
    cache: Arc<AnalysisCache>,
}

impl AnalysisEngine {
    pub fn new(
        source: Arc<dyn MessageSource>,
        index: Arc<dyn VectorIndex>,
        model: Arc<dyn LanguageModel>,
        cache: Arc<AnalysisCache>,
    ) -> Self {
        Self { source, index, model, cache }
    }

    pub fn cache(&self) -> &AnalysisCache {
        &self.cache
    }

    pub async fn analyze_contact(
        &self,
        contact_id: &str,
        max_messages: usize,
        force_refresh: bool,
    ) -> Result<Arc<AnalysisResult>> {
        if max_messages == 0 || max_messages > MAX_ANALYSIS_MESSAGES {
            return Err(ArgoError::validation(format!(
                "max_messages must be between 1 and {}",
                MAX_ANALYSIS_MESSAGES
            )));
        }
        let thread = self.source.get_thread(parse_thread_id(contact_id)?)?;

        if !force_refresh {
            if let Some(cached) = self.cache.get(&thread.contact_id) {
                debug!("Analysis cache hit for contact {}", thread.contact_id);
                return Ok(cached);
            }
        }

        let recent = format_recent(&thread.messages, max_messages);
        let retrieved = self.retrieve_context(&thread.contact_id, &thread.messages).await?;
        let prompt = build_prompt(&recent, &retrieved);

        let raw = self
            .model
            .complete_json(&[ChatMessage::system(ANALYZE_SYSTEM), ChatMessage::user(prompt)])
            .await?;
        let payload = parse_analysis(&raw)?;

        info!(
            "Analyzed contact {} ({} messages, {} facts)",
            thread.contact_id,
            thread.messages.len(),
            payload.facts.len()
        );
        Ok(self.cache.insert(AnalysisResult {
            contact_id: thread.contact_id,
            display_name: thread.display_name,
            tone_summary: payload.tone_summary,
            facts: payload.facts,
            history_summary: payload.history_summary,
        }))
    }

    /// Semantic context for the contact, queried with its last few messages. Embedding errors
    /// propagate; an index failure degrades to no context.
    async fn retrieve_context(&self, contact_id: &str, messages: &[SourceMessage]) -> Result<String> {
        let recent_texts: Vec<&str> = messages[messages.len().saturating_sub(QUERY_MESSAGES)..]
            .iter()
            .map(|m| m.text.as_str())
            .collect();
        if recent_texts.is_empty() {
            return Ok(String::new());
        }

        let embedding = self.model.embed_one(&recent_texts.join("\n")).await?;
        let filter = MetadataFilter::eq(keys::CONTACT_ID, contact_id)?;
        match self.index.query(&embedding, RETRIEVAL_TOP_K, Some(&filter)) {
            Ok(hits) => Ok(hits.into_iter().map(|h| h.document).collect::<Vec<_>>().join("\n")),
            Err(e) => {
                warn!("Context retrieval for contact {} failed: {}", contact_id, e);
                Ok(String::new())
            }
        }
    }
}

/// Last `max_messages` messages, one `OUT: text` / `IN: text` line each, newest last.
fn format_recent(messages: &[SourceMessage], max_messages: usize) -> String {
    messages[messages.len().saturating_sub(max_messages)..]
        .iter()
        .map(|m| format!("{}: {}", m.direction.label(), m.text.replace('\n', " ").trim()))
        .collect::<Vec<_>>()
        .join("\n")
}

fn build_prompt(recent: &str, retrieved: &str) -> String {
    format!(
        r#"Return a JSON object:
{{
  "tone_summary": "string",
  "facts": ["string", "..."],
  "history_summary": "string"
}}

Guidelines:
- Tone: how the USER (OUT lines) typically writes to this person (casual/formal/emoji/length).
- Facts: only durable info (preferences, schedules, contact details, commitments).
- History summary: 3-5 sentences, note any promises with dates if present.

Recent window (newest last):
{}

Retrieved context (semantic):
{}
"#,
        recent, retrieved
    )
}

/// Accepts a bare JSON object or one wrapped in a fenced code block; missing fields are empty.
fn parse_analysis(raw: &str) -> Result<AnalysisPayload> {
    let trimmed = raw.trim();
    if let Ok(payload) = serde_json::from_str::<AnalysisPayload>(trimmed) {
        return Ok(payload);
    }
    if let Some(captures) = FENCED_JSON.captures(trimmed) {
        if let Ok(payload) = serde_json::from_str::<AnalysisPayload>(&captures[1]) {
            return Ok(payload);
        }
    }
    Err(ArgoError::provider(format!(
        "analysis reply was not a JSON object: {}",
        crate::utils::TextUtils::char_prefix(trimmed, 200)
    )))
}
