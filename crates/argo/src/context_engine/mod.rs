//! Context engine - chat turns with retrieval over discussions and message history, and
//! per-contact analysis

pub mod analysis;
pub mod context_builder;
pub mod discussion_engine;

pub use analysis::{AnalysisCache, AnalysisEngine, AnalysisResult, MAX_ANALYSIS_MESSAGES};
pub use context_builder::{ContextBuilder, ContextBuilderConfig, SYSTEM_PROMPT};
pub use discussion_engine::{
    ChatEvent, ChatEventStream, DetailMessage, DiscussionDetail, DiscussionEngine,
    DiscussionSummary, RebuildReport, MAX_MESSAGE_CHARS,
};
