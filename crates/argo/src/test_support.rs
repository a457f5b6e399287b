//! Test doubles: a deterministic language model and a synthetic `chat.db`.

use crate::config::Config;
use crate::context_engine::AnalysisResult;
use crate::error::{ArgoError, Result};
use crate::message_source::ChatDbSource;
use crate::provider::{ChatMessage, CompletionChunk, CompletionStream, LanguageModel};
use async_trait::async_trait;
use rusqlite::{params, Connection};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

pub const FAKE_DIMENSION: usize = 64;

const DEFAULT_REPLY: &str = "ok";
const DEFAULT_JSON: &str = r#"{"tone_summary":"","facts":[],"history_summary":""}"#;

/// Bag-of-words embeddings hashed into a fixed number of buckets, plus scripted completions.
/// Unscripted completions answer `"ok"`.
#[derive(Default)]
pub struct FakeModel {
    failing_terms: Mutex<Vec<String>>,
    replies: Mutex<VecDeque<std::result::Result<String, String>>>,
    json_replies: Mutex<VecDeque<String>>,
    streams: Mutex<VecDeque<(Vec<String>, Option<String>)>>,
    prompts: Mutex<Vec<String>>,
    embed_calls: AtomicUsize,
    json_calls: AtomicUsize,
}

impl FakeModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Any embedding request with a text containing `term` fails.
    pub fn fail_embeddings_containing(&self, term: &str) {
        self.failing_terms.lock().unwrap().push(term.to_string());
    }

    pub fn push_reply(&self, reply: &str) {
        self.replies.lock().unwrap().push_back(Ok(reply.to_string()));
    }

    pub fn fail_next_completion(&self, message: &str) {
        self.replies.lock().unwrap().push_back(Err(message.to_string()));
    }

    pub fn push_json_reply(&self, reply: &str) {
        self.json_replies.lock().unwrap().push_back(reply.to_string());
    }

    /// Next streamed completion yields `chunks`, then fails with `error` if given.
    pub fn push_stream(&self, chunks: &[&str], error: Option<&str>) {
        self.streams.lock().unwrap().push_back((
            chunks.iter().map(|c| c.to_string()).collect(),
            error.map(str::to_string),
        ));
    }

    pub fn embed_calls(&self) -> usize {
        self.embed_calls.load(Ordering::SeqCst)
    }

    pub fn json_calls(&self) -> usize {
        self.json_calls.load(Ordering::SeqCst)
    }

    /// Content of the last message of the most recent completion request.
    pub fn last_prompt(&self) -> Option<String> {
        self.prompts.lock().unwrap().last().cloned()
    }

    pub fn embedding_for(text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; FAKE_DIMENSION];
        vector[0] = 1.0;
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let hash = blake3::hash(word.to_lowercase().as_bytes());
            let bucket = 1 + (hash.as_bytes()[0] as usize) % (FAKE_DIMENSION - 1);
            vector[bucket] += 1.0;
        }
        vector
    }

    fn record_prompt(&self, messages: &[ChatMessage]) {
        if let Some(last) = messages.last() {
            self.prompts.lock().unwrap().push(last.content.clone());
        }
    }
}

#[async_trait]
impl LanguageModel for FakeModel {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self.failing_terms.lock().unwrap().clone();
        if let Some(term) = failing.iter().find(|t| texts.iter().any(|text| text.contains(t.as_str()))) {
            return Err(ArgoError::provider(format!("embedding rejected ({})", term)));
        }
        Ok(texts.iter().map(|t| Self::embedding_for(t)).collect())
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        self.record_prompt(messages);
        match self.replies.lock().unwrap().pop_front() {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(e)) => Err(ArgoError::provider(e)),
            None => Ok(DEFAULT_REPLY.to_string()),
        }
    }

    async fn complete_stream(&self, messages: &[ChatMessage]) -> Result<CompletionStream> {
        self.record_prompt(messages);
        let (chunks, error) = self
            .streams
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| (vec![DEFAULT_REPLY.to_string()], None));

        let mut full_text = String::new();
        let mut items: Vec<Result<CompletionChunk>> = chunks
            .into_iter()
            .map(|chunk| {
                full_text.push_str(&chunk);
                Ok(CompletionChunk { chunk, full_text: full_text.clone() })
            })
            .collect();
        if let Some(e) = error {
            items.push(Err(ArgoError::provider(e)));
        }
        Ok(Box::pin(futures::stream::iter(items)))
    }

    async fn complete_json(&self, messages: &[ChatMessage]) -> Result<String> {
        self.record_prompt(messages);
        self.json_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .json_replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| DEFAULT_JSON.to_string()))
    }
}

/// A throwaway `chat.db` with the tables and columns the reader touches.
pub struct ChatDbFixture {
    _dir: tempfile::TempDir,
    path: PathBuf,
}

impl ChatDbFixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chat.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE handle (ROWID INTEGER PRIMARY KEY AUTOINCREMENT, id TEXT NOT NULL);
             CREATE TABLE chat (ROWID INTEGER PRIMARY KEY AUTOINCREMENT, display_name TEXT);
             CREATE TABLE message (
                 ROWID INTEGER PRIMARY KEY AUTOINCREMENT,
                 text TEXT,
                 date INTEGER NOT NULL DEFAULT 0,
                 is_from_me INTEGER NOT NULL DEFAULT 0,
                 handle_id INTEGER NOT NULL DEFAULT 0
             );
             CREATE TABLE chat_message_join (chat_id INTEGER, message_id INTEGER);
             CREATE TABLE chat_handle_join (chat_id INTEGER, handle_id INTEGER);",
        )
        .unwrap();
        Self { _dir: dir, path }
    }

    fn conn(&self) -> Connection {
        Connection::open(&self.path).unwrap()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn add_handle(&self, id: &str) -> i64 {
        let conn = self.conn();
        conn.execute("INSERT INTO handle (id) VALUES (?1)", [id]).unwrap();
        conn.last_insert_rowid()
    }

    pub fn add_chat(&self, display_name: Option<&str>, handles: &[i64]) -> i64 {
        let conn = self.conn();
        conn.execute("INSERT INTO chat (display_name) VALUES (?1)", params![display_name])
            .unwrap();
        let chat = conn.last_insert_rowid();
        for handle in handles {
            conn.execute(
                "INSERT INTO chat_handle_join (chat_id, handle_id) VALUES (?1, ?2)",
                params![chat, handle],
            )
            .unwrap();
        }
        chat
    }

    /// Returns the new message ROWID. `date` is in Apple-epoch seconds.
    pub fn add_message(
        &self,
        chat: i64,
        handle: Option<i64>,
        is_from_me: bool,
        text: Option<&str>,
        date: i64,
    ) -> i64 {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO message (text, date, is_from_me, handle_id) VALUES (?1, ?2, ?3, ?4)",
            params![text, date, is_from_me as i64, handle.unwrap_or(0)],
        )
        .unwrap();
        let id = conn.last_insert_rowid();
        conn.execute(
            "INSERT INTO chat_message_join (chat_id, message_id) VALUES (?1, ?2)",
            params![chat, id],
        )
        .unwrap();
        id
    }

    pub fn source(&self) -> ChatDbSource {
        ChatDbSource::new(&self.path)
    }
}

pub fn test_config(dir: &Path) -> Config {
    Config {
        api_host: "127.0.0.1".to_string(),
        api_port: 0,
        database_path: dir.join("argo.db"),
        vector_db_path: dir.join("vectors.db"),
        chat_db_path: dir.join("chat.db"),
        legacy_unread_state_path: dir.join("unread_state.json"),
        openai_base_url: "http://127.0.0.1:9/v1".to_string(),
        openai_api_key: None,
        chat_model: "gpt-4o-mini".to_string(),
        embedding_model: "text-embedding-3-small".to_string(),
        request_timeout_seconds: 5,
        import_batch_size: 128,
        unread_poll_interval_seconds: 5,
        analysis_max_messages: 80,
        contacts_page_size: 100,
    }
}

pub fn analysis_result(contact_id: &str) -> AnalysisResult {
    AnalysisResult {
        contact_id: contact_id.to_string(),
        display_name: "Alice".to_string(),
        tone_summary: "casual".to_string(),
        facts: vec!["likes sushi".to_string()],
        history_summary: "Old friends.".to_string(),
    }
}

/// Fully wired application state over temp stores, a synthetic message store and [`FakeModel`].
pub struct TestApp {
    _dir: tempfile::TempDir,
    pub fx: ChatDbFixture,
    pub model: std::sync::Arc<FakeModel>,
    pub state: crate::shared_state::AppState,
}

impl TestApp {
    pub fn new() -> Self {
        use crate::memory_db::Database;
        use crate::vector_store::VectorStore;
        use std::sync::Arc;

        let dir = tempfile::tempdir().unwrap();
        let fx = ChatDbFixture::new();
        let model = Arc::new(FakeModel::new());
        let state = crate::shared_state::AppState::new(
            test_config(dir.path()),
            Arc::new(Database::open(&dir.path().join("argo.db")).unwrap()),
            Arc::new(VectorStore::open(&dir.path().join("vectors.db")).unwrap()),
            Arc::new(fx.source()),
            model.clone(),
        );
        Self { _dir: dir, fx, model, state }
    }

    pub fn router(&self) -> axum::Router {
        crate::server::build_router(self.state.clone())
    }
}

/// Send one request through `router` and decode the JSON body.
pub async fn send_json(
    router: axum::Router,
    method: &str,
    uri: &str,
    body: Option<serde_json::Value>,
) -> (axum::http::StatusCode, serde_json::Value) {
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| {
            serde_json::Value::String(String::from_utf8_lossy(&bytes).into_owned())
        })
    };
    (status, value)
}
