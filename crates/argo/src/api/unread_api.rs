use axum::{extract::State, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use validator::Validate;

use crate::error::ArgoError;
use crate::shared_state::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct MarkReadRequest {
    #[validate(length(min = 1, max = 64))]
    pub contact_id: String,
    #[validate(range(min = 0))]
    pub message_id: i64,
}

/// GET /unread
pub async fn list_unread(State(state): State<AppState>) -> Result<Json<Value>, ArgoError> {
    let unread = state.unread.get_unread().await?;
    Ok(Json(json!({ "count": unread.len(), "unread": unread })))
}

/// GET /unread/count
pub async fn unread_count(State(state): State<AppState>) -> Result<Json<Value>, ArgoError> {
    let unread = state.unread.get_unread().await?;
    Ok(Json(json!({ "count": unread.len() })))
}

/// POST /unread/mark-read
pub async fn mark_read(
    State(state): State<AppState>,
    Json(req): Json<MarkReadRequest>,
) -> Result<Json<Value>, ArgoError> {
    req.validate()?;
    state.unread.mark_as_read(&req.contact_id, req.message_id)?;
    Ok(Json(json!({ "status": "ok", "contact_id": req.contact_id, "message_id": req.message_id })))
}

/// POST /unread/reset
pub async fn reset_unread(State(state): State<AppState>) -> Result<Json<Value>, ArgoError> {
    let watermarks = state.unread.reset()?;
    Ok(Json(json!({ "status": "ok", "contacts": watermarks.len(), "state": watermarks })))
}

#[cfg(test)]
mod tests {
    use crate::test_support::{send_json, TestApp};
    use axum::http::StatusCode;
    use serde_json::json;

    #[tokio::test]
    async fn test_unread_flow() {
        let app = TestApp::new();
        let handle = app.fx.add_handle("+15550001");
        let chat = app.fx.add_chat(Some("Alice"), &[handle]);
        app.fx.add_message(chat, Some(handle), false, Some("old news"), 100);

        let (status, body) = send_json(app.router(), "GET", "/unread", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 0);

        let new_id = app.fx.add_message(chat, Some(handle), false, Some("ping"), 200);
        let (_, body) = send_json(app.router(), "GET", "/unread", None).await;
        assert_eq!(body["count"], 1);
        assert_eq!(body["unread"][0]["message"], "ping");
        assert_eq!(body["unread"][0]["message_id"], new_id);

        let (status, _) = send_json(
            app.router(),
            "POST",
            "/unread/mark-read",
            Some(json!({"contact_id": chat.to_string(), "message_id": new_id})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = send_json(app.router(), "GET", "/unread/count", None).await;
        assert_eq!(body, json!({"count": 0}));
    }

    #[tokio::test]
    async fn test_reset_marks_everything_read() {
        let app = TestApp::new();
        let handle = app.fx.add_handle("+15550001");
        let chat = app.fx.add_chat(None, &[handle]);
        let last = app.fx.add_message(chat, Some(handle), false, Some("hello"), 100);

        let (status, body) = send_json(app.router(), "POST", "/unread/reset", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["contacts"], 1);
        assert_eq!(body["state"][chat.to_string()], last);
    }

    #[tokio::test]
    async fn test_mark_read_validation() {
        let app = TestApp::new();
        let (status, body) = send_json(
            app.router(),
            "POST",
            "/unread/mark-read",
            Some(json!({"contact_id": "", "message_id": 3})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["type"], "validation_error");
    }

    #[tokio::test]
    async fn test_missing_message_store_is_503() {
        let app = TestApp::new();
        let mut state = app.state.clone();
        state.unread = std::sync::Arc::new(crate::history::UnreadTracker::new(
            std::sync::Arc::new(crate::message_source::ChatDbSource::new("/nonexistent/chat.db")),
            std::sync::Arc::clone(&state.database),
            std::sync::Arc::clone(&state.vectors.messages),
            app.model.clone(),
            std::sync::Arc::clone(&state.analysis_cache),
            8,
        ));
        let router = crate::server::build_router(state);
        let (status, body) = send_json(router, "GET", "/unread", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["type"], "source_unavailable");
    }
}
