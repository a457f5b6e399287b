//! HTTP handlers. Every handler takes [`AppState`](crate::shared_state::AppState) and returns
//! [`ArgoError`](crate::error::ArgoError) as its error type, which renders as `{error, type}`.

pub mod admin_api;
pub mod contacts_api;
pub mod discussion_api;
pub mod unread_api;

pub use admin_api::{
    clear_analysis_cache, health, rebuild_discussion_rag, rebuild_imessage_rag, stats,
    sync_imessage_rag,
};
pub use contacts_api::{analyze_contact, get_contact, list_contacts};
pub use discussion_api::{
    chat, chat_stream, delete_discussion, get_discussion, list_discussions, start_discussion,
};
pub use unread_api::{list_unread, mark_read, reset_unread, unread_count};
