//! Utilities module - text helpers shared by the importer, the context builder and the API

pub mod text_utils;

pub use text_utils::TextUtils;
