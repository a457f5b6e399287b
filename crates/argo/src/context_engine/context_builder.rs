//! Builds the bounded retrieval context and the `[system, user]` prompt for a chat turn

use crate::provider::ChatMessage;
use crate::utils::TextUtils;
use crate::vector_store::QueryHit;
use tracing::debug;

pub const SYSTEM_PROMPT: &str = "You are Argo, a helpful assistant that maintains long-term context across discussions. \
You can see two kinds of context: earlier turns from the current discussion, and relevant messages from the user's \
imported chat history with their contacts (lines marked IN were received, OUT were sent by the user). \
Refer to prior context where relevant, and say so when the context does not contain the answer.";

/// Retrieval sizes and character budgets for one chat turn
#[derive(Debug, Clone)]
pub struct ContextBuilderConfig {
    pub discussion_top_k: usize,
    pub history_top_k: usize,
    pub discussion_budget: usize,
    pub history_budget: usize,
    pub total_budget: usize,
}

impl Default for ContextBuilderConfig {
    fn default() -> Self {
        Self {
            discussion_top_k: 5,
            history_top_k: 8,
            discussion_budget: 3000,
            history_budget: 5000,
            total_budget: 8000,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ContextBuilder {
    config: ContextBuilderConfig,
}

impl ContextBuilder {
    pub fn new(config: ContextBuilderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ContextBuilderConfig {
        &self.config
    }

    /// Retrieved documents, one per line, in rank order.
    pub fn join_hits(hits: &[QueryHit]) -> String {
        hits.iter()
            .map(|h| h.document.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn truncate_discussion(&self, context: &str) -> String {
        TextUtils::truncate_tail(context, self.config.discussion_budget).into_owned()
    }

    pub fn truncate_history(&self, context: &str) -> String {
        TextUtils::truncate_tail(context, self.config.history_budget).into_owned()
    }

    /// Truncate each source to its own budget, label the non-empty ones and cap the result
    /// at the overall budget. Empty when neither source produced anything.
    pub fn combine(&self, discussion: &str, history: &str) -> String {
        let mut sections = Vec::new();
        let discussion = self.truncate_discussion(discussion.trim());
        if !discussion.is_empty() {
            sections.push(format!("From this discussion:\n{}", discussion));
        }
        let history = self.truncate_history(history.trim());
        if !history.is_empty() {
            sections.push(format!("From chat history:\n{}", history));
        }

        let combined = sections.join("\n\n");
        let combined = TextUtils::truncate_tail(&combined, self.config.total_budget).into_owned();
        debug!(
            "Combined context: {} chars (discussion {}, history {})",
            combined.chars().count(),
            discussion.chars().count(),
            history.chars().count()
        );
        combined
    }

    pub fn build_messages(&self, combined_context: &str, user_message: &str) -> Vec<ChatMessage> {
        let user_content = if combined_context.is_empty() {
            format!("User: {}", user_message)
        } else {
            format!("Context:\n{}\n\nUser: {}", combined_context, user_message)
        };
        vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(user_content)]
    }
}
