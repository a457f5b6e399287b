//! HTTP server startup and routing.
//!
//! Startup opens both stores, migrates the legacy watermark file if one is present, starts the
//! background unread poller and serves the router until Ctrl-C.

use std::sync::Arc;
use std::time::Duration;
use axum::{
    extract::{MatchedPath, Request},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{info, warn};

use crate::{api, config::Config, metrics, shared_state::AppState};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(600);

pub async fn run_server(cfg: Config) -> anyhow::Result<()> {
    metrics::init_metrics();
    cfg.print_config();

    let addr = cfg.api_addr()?;
    let poll_interval = Duration::from_secs(cfg.unread_poll_interval_seconds);
    let legacy_path = cfg.legacy_unread_state_path.clone();

    let state = AppState::open(cfg)?;
    migrate_legacy_unread_state(&state, &legacy_path);

    let poller = Arc::clone(&state.unread).spawn_poller(poll_interval);

    info!("Starting HTTP server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    poller.abort();
    info!("Server stopped");
    Ok(())
}

/// One-time import of the JSON watermark file; failures are logged and startup continues.
pub fn migrate_legacy_unread_state(state: &AppState, path: &std::path::Path) {
    match state.database.watermarks.import_legacy_json(path) {
        Ok(0) => {}
        Ok(n) => info!("Migrated {} watermarks from {}", n, path.display()),
        Err(e) => warn!("Legacy unread state migration from {} failed: {}", path.display(), e),
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::DELETE,
        ])
        .allow_headers(Any);

    Router::new()
        .route("/contacts", get(api::list_contacts))
        .route("/contacts/:id", get(api::get_contact))
        .route("/contacts/:id/analyze", post(api::analyze_contact))
        .route("/discussions", get(api::list_discussions))
        .route("/discussions/start", post(api::start_discussion))
        .route(
            "/discussions/:id",
            get(api::get_discussion).delete(api::delete_discussion),
        )
        .route("/discussions/:id/chat", post(api::chat))
        .route("/discussions/:id/chat/stream", post(api::chat_stream))
        .route("/unread", get(api::list_unread))
        .route("/unread/count", get(api::unread_count))
        .route("/unread/mark-read", post(api::mark_read))
        .route("/unread/reset", post(api::reset_unread))
        .route("/admin/rebuild_imessage_rag", post(api::rebuild_imessage_rag))
        .route("/admin/sync_imessage_rag", post(api::sync_imessage_rag))
        .route("/admin/rebuild_discussion_rag", post(api::rebuild_discussion_rag))
        .route("/admin/clear_analysis_cache", post(api::clear_analysis_cache))
        .route("/admin/stats", get(api::stats))
        .route("/healthz", get(api::health))
        .route("/metrics", get(metrics::get_metrics))
        .route_layer(middleware::from_fn(track_requests))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .with_state(state)
}

async fn track_requests(matched: Option<MatchedPath>, req: Request, next: Next) -> Response {
    let route = matched
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let response = next.run(req).await;
    metrics::inc_request(&route, response.status().as_str());
    response
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{send_json, TestApp};
    use axum::http::StatusCode;

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let app = TestApp::new();
        let (status, _) = send_json(app.router(), "GET", "/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_legacy_state_is_migrated_once() {
        let app = TestApp::new();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("unread_state.json");
        std::fs::write(&path, r#"{"12": 40, "13": 7}"#).unwrap();

        migrate_legacy_unread_state(&app.state, &path);
        assert_eq!(app.state.database.watermarks.get("12").unwrap(), Some(40));
        assert!(!path.exists());
        assert!(dir.path().join("unread_state.json.backup").exists());

        migrate_legacy_unread_state(&app.state, &path);
        assert_eq!(app.state.database.watermarks.count().unwrap(), 2);
    }
}
