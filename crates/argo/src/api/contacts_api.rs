//! Contacts read from the external message store, and per-contact analysis.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use tracing::info;
use validator::Validate;

use crate::context_engine::{AnalysisResult, MAX_ANALYSIS_MESSAGES};
use crate::error::ArgoError;
use crate::message_source::{parse_thread_id, Thread, ThreadSummary};
use crate::shared_state::AppState;

#[derive(Debug, Default, Deserialize, Validate)]
pub struct ContactsQuery {
    #[validate(range(min = 1, max = 10000))]
    pub limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct AnalyzeRequest {
    #[validate(range(min = 1, max = 1000))]
    pub max_messages: Option<usize>,
    #[serde(default)]
    pub force_refresh: bool,
}

/// GET /contacts?limit=
pub async fn list_contacts(
    State(state): State<AppState>,
    Query(query): Query<ContactsQuery>,
) -> Result<Json<Vec<ThreadSummary>>, ArgoError> {
    query.validate()?;
    let limit = query.limit.unwrap_or(state.config.contacts_page_size);
    let contacts = state.source.list_threads(Some(limit))?;
    info!("Listed {} contacts", contacts.len());
    Ok(Json(contacts))
}

/// GET /contacts/:id
pub async fn get_contact(
    State(state): State<AppState>,
    Path(contact_id): Path<String>,
) -> Result<Json<Thread>, ArgoError> {
    let thread = state.source.get_thread(parse_thread_id(&contact_id)?)?;
    Ok(Json(thread))
}

/// POST /contacts/:id/analyze. The body is optional.
pub async fn analyze_contact(
    State(state): State<AppState>,
    Path(contact_id): Path<String>,
    body: Option<Json<AnalyzeRequest>>,
) -> Result<Json<AnalysisResult>, ArgoError> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    req.validate()?;
    let max_messages = req
        .max_messages
        .unwrap_or(state.config.analysis_max_messages)
        .min(MAX_ANALYSIS_MESSAGES);

    let result = state
        .analysis
        .analyze_contact(&contact_id, max_messages, req.force_refresh)
        .await?;
    Ok(Json(result.as_ref().clone()))
}
