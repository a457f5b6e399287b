use prometheus::{Encoder, IntCounter, IntCounterVec, Registry, TextEncoder};
use lazy_static::lazy_static;
use std::sync::OnceLock;
use axum::response::IntoResponse;
use axum::http::StatusCode;
use tracing::error;

lazy_static! {
    static ref REGISTRY: Registry = Registry::new();
}
static REQ_COUNTER: OnceLock<IntCounterVec> = OnceLock::new();
static DOCUMENTS_INDEXED: OnceLock<IntCounterVec> = OnceLock::new();
static INDEX_BATCH_FAILURES: OnceLock<IntCounter> = OnceLock::new();
static UNREAD_POLL_TICKS: OnceLock<IntCounterVec> = OnceLock::new();

/// Register the counters. Safe to call more than once; until it runs every `inc_*` is a no-op.
pub fn init_metrics() {
    let registered = (|| -> prometheus::Result<()> {
        let req_counter = match REQ_COUNTER.get() {
            Some(c) => c.clone(),
            None => IntCounterVec::new(
                prometheus::opts!("argo_requests_total", "Total requests per route"),
                &["route", "status"],
            )?,
        };
        let documents_indexed = match DOCUMENTS_INDEXED.get() {
            Some(c) => c.clone(),
            None => IntCounterVec::new(
                prometheus::opts!("argo_documents_indexed_total", "Documents written to the vector index"),
                &["source"],
            )?,
        };
        let batch_failures = match INDEX_BATCH_FAILURES.get() {
            Some(c) => c.clone(),
            None => IntCounter::new("argo_index_batch_failures_total", "Embedding batches that failed")?,
        };
        let poll_ticks = match UNREAD_POLL_TICKS.get() {
            Some(c) => c.clone(),
            None => IntCounterVec::new(
                prometheus::opts!("argo_unread_poll_ticks_total", "Background unread checks by outcome"),
                &["status"],
            )?,
        };

        if REQ_COUNTER.set(req_counter.clone()).is_ok() {
            REGISTRY.register(Box::new(req_counter))?;
        }
        if DOCUMENTS_INDEXED.set(documents_indexed.clone()).is_ok() {
            REGISTRY.register(Box::new(documents_indexed))?;
        }
        if INDEX_BATCH_FAILURES.set(batch_failures.clone()).is_ok() {
            REGISTRY.register(Box::new(batch_failures))?;
        }
        if UNREAD_POLL_TICKS.set(poll_ticks.clone()).is_ok() {
            REGISTRY.register(Box::new(poll_ticks))?;
        }
        Ok(())
    })();
    if let Err(e) = registered {
        error!("Failed to register metrics: {}", e);
    }
}

pub fn inc_request(route: &str, status: &str) {
    if let Some(counter) = REQ_COUNTER.get() {
        counter.with_label_values(&[route, status]).inc();
    }
}

/// `source` is `history` or `discussion`.
pub fn inc_documents_indexed(source: &str, count: usize) {
    if let Some(counter) = DOCUMENTS_INDEXED.get() {
        counter.with_label_values(&[source]).inc_by(count as u64);
    }
}

pub fn inc_index_batch_failures() {
    if let Some(counter) = INDEX_BATCH_FAILURES.get() {
        counter.inc();
    }
}

pub fn inc_unread_poll_tick(status: &str) {
    if let Some(counter) = UNREAD_POLL_TICKS.get() {
        counter.with_label_values(&[status]).inc();
    }
}

pub fn render() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = vec![];
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

pub async fn get_metrics() -> impl IntoResponse {
    match render() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            body,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; version=0.0.4")],
            format!("failed to encode metrics: {}", e),
        ),
    }
}
