//! Prometheus /metrics + health check HTTP endpoints
//!
//! Endpoints:
//!   GET /metrics  Prometheus text format (unless disabled in config)
//!   GET /healthz  Liveness probe (always 200 if process is running)

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use prometheus_client::{
    encoding::text::encode,
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};
use std::sync::Arc;

use crate::api::AppState;

/// Snippet store counters and the registry they are exported from.
#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    snippets_created: Counter,
    snippet_fetches: Family<Vec<(String, String)>, Counter>,
    snippets_expired: Counter,
}

/// How a fetch request was answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Found,
    Missing,
    Expired,
    Error,
}

impl FetchOutcome {
    fn as_str(self) -> &'static str {
        match self {
            FetchOutcome::Found => "found",
            FetchOutcome::Missing => "missing",
            FetchOutcome::Expired => "expired",
            FetchOutcome::Error => "error",
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();
        let snippets_created = Counter::default();
        let snippet_fetches = Family::<Vec<(String, String)>, Counter>::default();
        let snippets_expired = Counter::default();

        // counters gain the `_total` suffix on export
        registry.register(
            "veil_snippets_created",
            "Snippets successfully stored",
            snippets_created.clone(),
        );
        registry.register(
            "veil_snippet_fetches",
            "Snippet fetch requests by outcome",
            snippet_fetches.clone(),
        );
        registry.register(
            "veil_snippets_expired",
            "Expired snippets removed by the background sweep",
            snippets_expired.clone(),
        );

        Metrics {
            registry: Arc::new(registry),
            snippets_created,
            snippet_fetches,
            snippets_expired,
        }
    }

    pub fn record_created(&self) {
        self.snippets_created.inc();
    }

    pub fn record_fetch(&self, outcome: FetchOutcome) {
        self.snippet_fetches
            .get_or_create(&vec![("outcome".to_string(), outcome.as_str().to_string())])
            .inc();
    }

    pub fn record_swept(&self, removed: usize) {
        self.snippets_expired.inc_by(removed as u64);
    }

    pub fn render(&self) -> Result<String, std::fmt::Error> {
        let mut body = String::new();
        encode(&mut body, &self.registry)?;
        Ok(body)
    }
}

pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state.metrics.render() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            body,
        ),
        Err(e) => {
            tracing::error!("metrics encode failed: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                e.to_string(),
            )
        }
    }
}

/// Liveness probe: returns 200 if the process is running.
pub async fn healthz_handler() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_all_families() {
        let metrics = Metrics::new();
        metrics.record_created();
        metrics.record_fetch(FetchOutcome::Found);
        metrics.record_fetch(FetchOutcome::Expired);
        metrics.record_swept(3);

        let body = metrics.render().unwrap();
        assert!(body.contains("veil_snippets_created_total 1"));
        assert!(body.contains(r#"veil_snippet_fetches_total{outcome="found"} 1"#));
        assert!(body.contains(r#"veil_snippet_fetches_total{outcome="expired"} 1"#));
        assert!(body.contains("veil_snippets_expired_total 3"));
    }
}
