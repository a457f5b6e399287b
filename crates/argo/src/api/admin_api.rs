//! Administrative endpoints: index maintenance, cache control and diagnostics.
use axum::{extract::State, Json};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::info;

use crate::error::ArgoError;
use crate::history::ImportMode;
use crate::memory_db::DatabaseStats;
use crate::shared_state::AppState;
use crate::vector_store::VectorStats;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub vectors: VectorStats,
    pub database: DatabaseStats,
    pub analysis_cache_entries: usize,
    pub uptime_seconds: u64,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
    })
}

/// POST /admin/rebuild_imessage_rag
pub async fn rebuild_imessage_rag(State(state): State<AppState>) -> Result<Json<Value>, ArgoError> {
    let report = state.importer.import(ImportMode::Full).await?;
    Ok(Json(json!({
        "status": "ok",
        "message": format!("Imported {} messages into the history index.", report.added),
        "report": report,
    })))
}

/// POST /admin/sync_imessage_rag
pub async fn sync_imessage_rag(State(state): State<AppState>) -> Result<Json<Value>, ArgoError> {
    let report = state.importer.import(ImportMode::Incremental).await?;
    Ok(Json(json!({
        "status": "ok",
        "message": format!("Synced {} new messages into the history index.", report.added),
        "report": report,
    })))
}

/// POST /admin/rebuild_discussion_rag
pub async fn rebuild_discussion_rag(State(state): State<AppState>) -> Result<Json<Value>, ArgoError> {
    let report = state.discussions.rebuild_index().await?;
    Ok(Json(json!({ "status": "ok", "report": report })))
}

/// POST /admin/clear_analysis_cache
pub async fn clear_analysis_cache(State(state): State<AppState>) -> Json<Value> {
    let cleared = state.analysis_cache.clear();
    info!("Cleared {} cached analyses", cleared);
    Json(json!({ "status": "ok", "cleared": cleared }))
}

pub async fn stats(State(state): State<AppState>) -> Result<Json<StatsResponse>, ArgoError> {
    Ok(Json(StatsResponse {
        vectors: state.vectors.get_stats()?,
        database: state.database.get_stats()?,
        analysis_cache_entries: state.analysis_cache.len(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
    }))
}

#[cfg(test)]
mod tests {
    use crate::test_support::{analysis_result, send_json, TestApp};
    use axum::http::StatusCode;

    fn seeded() -> TestApp {
        let app = TestApp::new();
        let handle = app.fx.add_handle("+15550001");
        let chat = app.fx.add_chat(Some("Alice"), &[handle]);
        app.fx.add_message(chat, Some(handle), false, Some("hey"), 100);
        app.fx.add_message(chat, None, true, Some("hi!"), 200);
        app
    }

    #[tokio::test]
    async fn test_sync_then_rebuild() {
        let app = seeded();
        let (status, body) = send_json(app.router(), "POST", "/admin/sync_imessage_rag", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["report"]["added"], 2);

        let (_, body) = send_json(app.router(), "POST", "/admin/sync_imessage_rag", None).await;
        assert_eq!(body["report"]["added"], 0);
        assert_eq!(body["report"]["skipped"], 2);

        let (_, body) = send_json(app.router(), "POST", "/admin/rebuild_imessage_rag", None).await;
        assert_eq!(body["report"]["mode"], "full");
        assert_eq!(body["report"]["cleared"], 2);
        assert_eq!(body["report"]["added"], 2);

        let (status, stats) = send_json(app.router(), "GET", "/admin/stats", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(stats["vectors"]["messages"], 2);
        assert_eq!(stats["vectors"]["discussions"], 0);
    }

    #[tokio::test]
    async fn test_clear_analysis_cache() {
        let app = seeded();
        app.state.analysis_cache.insert(analysis_result("1"));
        let (_, body) = send_json(app.router(), "POST", "/admin/clear_analysis_cache", None).await;
        assert_eq!(body["cleared"], 1);
        assert!(app.state.analysis_cache.is_empty());
    }

    #[tokio::test]
    async fn test_rebuild_discussion_rag() {
        let app = seeded();
        let id = app.state.discussions.create("d", &[]).unwrap();
        app.state.discussions.chat(&id, "hello").await.unwrap();

        let (status, body) = send_json(app.router(), "POST", "/admin/rebuild_discussion_rag", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["report"]["messages"], 2);
        assert_eq!(body["report"]["added"], 2);
    }

    #[tokio::test]
    async fn test_health_and_metrics() {
        let app = seeded();
        let (status, body) = send_json(app.router(), "GET", "/healthz", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");

        crate::metrics::init_metrics();
        let (status, body) = send_json(app.router(), "GET", "/metrics", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.as_str().unwrap().contains("argo_"));
    }
}
