//! Discussion endpoints, including the server-sent-event chat stream.
//!
//! The stream endpoint answers with a JSON error before any event is sent when the request is
//! invalid or the discussion does not exist; once streaming has started, failures arrive as an
//! `{error, type}` event followed by the terminal `{done: true}`.

use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::stream::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::convert::Infallible;
use tracing::{error, info};
use validator::Validate;

use crate::context_engine::{ChatEvent, DiscussionDetail, DiscussionSummary};
use crate::error::ArgoError;
use crate::shared_state::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct StartDiscussionRequest {
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[serde(default)]
    #[validate(length(max = 32))]
    pub tags: Vec<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ChatRequest {
    #[validate(length(min = 1, max = 8000))]
    pub message: String,
}

pub async fn list_discussions(
    State(state): State<AppState>,
) -> Result<Json<Vec<DiscussionSummary>>, ArgoError> {
    Ok(Json(state.discussions.list()?))
}

/// POST /discussions/start
pub async fn start_discussion(
    State(state): State<AppState>,
    Json(req): Json<StartDiscussionRequest>,
) -> Result<Json<Value>, ArgoError> {
    req.validate()?;
    let id = state.discussions.create(&req.title, &req.tags)?;
    Ok(Json(json!({ "id": id })))
}

pub async fn get_discussion(
    State(state): State<AppState>,
    Path(discussion_id): Path<String>,
) -> Result<Json<DiscussionDetail>, ArgoError> {
    Ok(Json(state.discussions.get(&discussion_id)?))
}

pub async fn delete_discussion(
    State(state): State<AppState>,
    Path(discussion_id): Path<String>,
) -> Result<Json<Value>, ArgoError> {
    state.discussions.delete(&discussion_id)?;
    Ok(Json(json!({ "status": "ok", "id": discussion_id })))
}

/// POST /discussions/:id/chat
pub async fn chat(
    State(state): State<AppState>,
    Path(discussion_id): Path<String>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<Value>, ArgoError> {
    req.validate()?;
    let reply = state.discussions.chat(&discussion_id, &req.message).await?;
    Ok(Json(json!({ "reply": reply })))
}

/// POST /discussions/:id/chat/stream
pub async fn chat_stream(
    State(state): State<AppState>,
    Path(discussion_id): Path<String>,
    Json(req): Json<ChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ArgoError> {
    req.validate()?;
    info!("Streaming chat turn for discussion {}", discussion_id);
    let events = state.discussions.chat_stream(&discussion_id, &req.message).await?;
    Ok(Sse::new(events.map(|event| Ok(to_sse_event(&event)))).keep_alive(KeepAlive::default()))
}

fn to_sse_event(event: &ChatEvent) -> Event {
    Event::default().json_data(event).unwrap_or_else(|e| {
        error!("Failed to encode chat event: {}", e);
        Event::default().data(r#"{"error":"event encoding failed","type":"storage_error"}"#)
    })
}
