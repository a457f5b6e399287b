//! Application state shared by the HTTP handlers, the CLI and the background poller.
//!
//! Everything is wired once at startup and handed around as `Arc`s; the only mutable in-process
//! state is the analysis cache.

use std::sync::Arc;
use std::time::Instant;
use tracing::info;

use crate::{
    config::Config,
    context_engine::{AnalysisCache, AnalysisEngine, DiscussionEngine},
    error::Result,
    history::{HistoryImporter, UnreadTracker},
    memory_db::Database,
    message_source::{ChatDbSource, MessageSource},
    provider::{LanguageModel, OpenAiClient},
    vector_store::VectorStore,
};

/// Single state type used by the axum router.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub database: Arc<Database>,
    pub vectors: Arc<VectorStore>,
    pub source: Arc<dyn MessageSource>,
    pub analysis_cache: Arc<AnalysisCache>,
    pub discussions: DiscussionEngine,
    pub analysis: Arc<AnalysisEngine>,
    pub importer: Arc<HistoryImporter>,
    pub unread: Arc<UnreadTracker>,
    pub started_at: Instant,
}

impl AppState {
    /// Open both stores, point the message reader at `chat_db_path` and build the provider
    /// client from `config`.
    pub fn open(config: Config) -> Result<Self> {
        let database = Arc::new(Database::open(&config.database_path)?);
        let vectors = Arc::new(VectorStore::open(&config.vector_db_path)?);
        let source: Arc<dyn MessageSource> = Arc::new(ChatDbSource::new(&config.chat_db_path));
        let model: Arc<dyn LanguageModel> = Arc::new(OpenAiClient::new(&config)?);
        Ok(Self::new(config, database, vectors, source, model))
    }

    pub fn new(
        config: Config,
        database: Arc<Database>,
        vectors: Arc<VectorStore>,
        source: Arc<dyn MessageSource>,
        model: Arc<dyn LanguageModel>,
    ) -> Self {
        let analysis_cache = Arc::new(AnalysisCache::new());
        let discussions = DiscussionEngine::new(
            Arc::clone(&database),
            Arc::clone(&vectors.discussions),
            Arc::clone(&vectors.messages),
            Arc::clone(&model),
        );
        let analysis = Arc::new(AnalysisEngine::new(
            Arc::clone(&source),
            Arc::clone(&vectors.messages),
            Arc::clone(&model),
            Arc::clone(&analysis_cache),
        ));
        let importer = Arc::new(HistoryImporter::new(
            Arc::clone(&source),
            Arc::clone(&vectors.messages),
            Arc::clone(&model),
            Arc::clone(&analysis_cache),
            config.import_batch_size,
        ));
        let unread = Arc::new(UnreadTracker::new(
            Arc::clone(&source),
            Arc::clone(&database),
            Arc::clone(&vectors.messages),
            model,
            Arc::clone(&analysis_cache),
            config.import_batch_size,
        ));
        info!("Application state initialized");

        Self {
            config: Arc::new(config),
            database,
            vectors,
            source,
            analysis_cache,
            discussions,
            analysis,
            importer,
            unread,
            started_at: Instant::now(),
        }
    }
}
