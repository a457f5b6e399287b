//! Embedding and completion provider seam.
//!
//! Everything that talks to a language model goes through [`LanguageModel`]; provider failures
//! surface as [`ArgoError::Provider`] and are never replaced by a fallback answer.

pub mod openai;

pub use openai::OpenAiClient;

use crate::error::{ArgoError, Result};
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".to_string(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }
}

/// One increment of a streamed completion plus everything received so far.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CompletionChunk {
    pub chunk: String,
    pub full_text: String,
}

pub type CompletionStream = BoxStream<'static, Result<CompletionChunk>>;

#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// One vector per input text, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;

    async fn complete_stream(&self, messages: &[ChatMessage]) -> Result<CompletionStream>;

    /// Completion constrained to a JSON object; returns the raw reply text.
    async fn complete_json(&self, messages: &[ChatMessage]) -> Result<String>;

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ArgoError::provider("embedding response was empty"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeModel;

    #[test]
    fn test_embed_one_returns_first_vector() {
        let model = FakeModel::new();
        let embedding = tokio_test::block_on(model.embed_one("hello there")).unwrap();
        assert_eq!(embedding, FakeModel::embedding_for("hello there"));
    }

    #[test]
    fn test_embed_one_propagates_provider_errors() {
        let model = FakeModel::new();
        model.fail_embeddings_containing("boom");
        let err = tokio_test::block_on(model.embed_one("boom")).unwrap_err();
        assert_eq!(err.kind(), "provider_error");
    }

    #[test]
    fn test_chat_message_roles() {
        assert_eq!(ChatMessage::system("s").role, "system");
        assert_eq!(ChatMessage::user("u").role, "user");
    }
}
