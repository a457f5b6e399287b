//! OpenAI-compatible HTTP client (`/embeddings`, `/chat/completions`).
use super::{ChatMessage, CompletionChunk, CompletionStream, LanguageModel};
use crate::config::Config;
use crate::error::{ArgoError, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: Option<ChatDelta>,
}

#[derive(Debug, Deserialize)]
struct ChatDelta {
    content: Option<String>,
}

pub struct OpenAiClient {
    base_url: String,
    api_key: Option<String>,
    chat_model: String,
    embedding_model: String,
    http_client: reqwest::Client,
}

impl OpenAiClient {
    /// Proxy settings (`HTTPS_PROXY`/`HTTP_PROXY`) are honoured by reqwest's default builder.
    pub fn new(config: &Config) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()?;
        info!("Model provider client initialized with base URL: {}", config.openai_base_url);
        Ok(Self {
            base_url: config.openai_base_url.trim_end_matches('/').to_string(),
            api_key: config.openai_api_key.clone(),
            chat_model: config.chat_model.clone(),
            embedding_model: config.embedding_model.clone(),
            http_client,
        })
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn embeddings_url(&self) -> String {
        format!("{}/embeddings", self.base_url)
    }

    async fn post<T: Serialize + ?Sized>(&self, url: &str, body: &T) -> Result<reqwest::Response> {
        let mut request = self.http_client.post(url).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request
            .send()
            .await
            .map_err(|e| ArgoError::provider(format!("request to {} failed: {}", url, e)))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ArgoError::provider(format!("{} returned {}: {}", url, status, body)));
        }
        Ok(response)
    }

    async fn chat(&self, messages: &[ChatMessage], json_mode: bool) -> Result<String> {
        let request = ChatCompletionRequest {
            model: &self.chat_model,
            messages,
            stream: false,
            response_format: json_mode.then_some(ResponseFormat { kind: "json_object" }),
        };
        let completion: ChatCompletionResponse = self
            .post(&self.completions_url(), &request)
            .await?
            .json()
            .await
            .map_err(|e| ArgoError::provider(format!("failed to parse completion: {}", e)))?;
        completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .ok_or_else(|| ArgoError::provider("completion contained no message"))
    }
}

/// Content of one `data:` line; `None` for the `[DONE]` terminator.
fn parse_sse_data(data: &str) -> Result<Option<String>> {
    if data == "[DONE]" {
        return Ok(None);
    }
    let chunk: StreamChunk = serde_json::from_str(data)
        .map_err(|e| ArgoError::provider(format!("malformed stream chunk: {}", e)))?;
    Ok(Some(
        chunk
            .choices
            .into_iter()
            .filter_map(|c| c.delta.and_then(|d| d.content))
            .collect(),
    ))
}

#[async_trait]
impl LanguageModel for OpenAiClient {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        debug!("Requesting embeddings for {} text(s)", texts.len());
        let request = EmbeddingRequest { model: &self.embedding_model, input: texts };
        let response: EmbeddingResponse = self
            .post(&self.embeddings_url(), &request)
            .await?
            .json()
            .await
            .map_err(|e| ArgoError::provider(format!("failed to parse embeddings: {}", e)))?;

        let mut data = response.data;
        data.sort_by_key(|d| d.index.unwrap_or(usize::MAX));
        if data.len() != texts.len() {
            return Err(ArgoError::provider(format!(
                "expected {} embeddings, received {}",
                texts.len(),
                data.len()
            )));
        }
        let embeddings: Vec<Vec<f32>> = data.into_iter().map(|d| d.embedding).collect();
        debug!(
            "Received {} embeddings (dim={})",
            embeddings.len(),
            embeddings.first().map(|e| e.len()).unwrap_or(0)
        );
        Ok(embeddings)
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        self.chat(messages, false).await
    }

    async fn complete_json(&self, messages: &[ChatMessage]) -> Result<String> {
        self.chat(messages, true).await
    }

    async fn complete_stream(&self, messages: &[ChatMessage]) -> Result<CompletionStream> {
        let request = ChatCompletionRequest {
            model: &self.chat_model,
            messages,
            stream: true,
            response_format: None,
        };
        let response = self.post(&self.completions_url(), &request).await?;
        let byte_stream = response.bytes_stream();

        let stream = async_stream::try_stream! {
            let mut buffer: Vec<u8> = Vec::new();
            let mut full_text = String::new();
            futures_util::pin_mut!(byte_stream);
            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = chunk_result
                    .map_err(|e| ArgoError::provider(format!("stream read error: {}", e)))?;
                buffer.extend_from_slice(&bytes);

                while let Some(line) = take_line(&mut buffer) {
                    let Some(data) = line.strip_prefix("data:") else {
                        continue;
                    };
                    match parse_sse_data(data.trim())? {
                        None => return,
                        Some(content) if content.is_empty() => {}
                        Some(content) => {
                            full_text.push_str(&content);
                            yield CompletionChunk { chunk: content, full_text: full_text.clone() };
                        }
                    }
                }
            }
        };
        Ok(Box::pin(stream))
    }
}

/// Pop one complete `\n`-terminated line off the byte buffer. Bytes are only decoded once the
/// whole line is present, so multibyte characters split across network reads survive.
fn take_line(buffer: &mut Vec<u8>) -> Option<String> {
    let newline_pos = buffer.iter().position(|&b| b == b'\n')?;
    let line: Vec<u8> = buffer.drain(..=newline_pos).collect();
    Some(String::from_utf8_lossy(&line).trim().to_string())
}
