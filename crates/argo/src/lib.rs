// argo/crates/argo/src/lib.rs

pub mod api;
pub mod config;
pub mod context_engine;
pub mod error;
pub mod history;
pub mod memory_db;
pub mod message_source;
pub mod metrics;
pub mod provider;
pub mod server;
pub mod shared_state;
pub mod telemetry;
pub mod utils;
pub mod vector_store;

#[cfg(test)]
pub(crate) mod test_support;

// Public API exports
pub use config::Config;
pub use error::{ArgoError, Result};
pub use server::{build_router, run_server};
pub use shared_state::AppState;

pub use context_engine::{AnalysisCache, AnalysisEngine, AnalysisResult, ChatEvent, DiscussionEngine};
pub use history::{HistoryImporter, ImportMode, ImportReport, UnreadMessage, UnreadTracker};
pub use memory_db::Database;
pub use message_source::{ChatDbSource, MessageSource};
pub use provider::{LanguageModel, OpenAiClient};
pub use vector_store::{VectorIndex, VectorStore};
